//! API endpoint implementations

pub mod market;
pub mod token;

pub use market::MarketEndpoints;
pub use token::TokenEndpoints;
