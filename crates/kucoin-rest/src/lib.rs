//! REST collaborator for the KuCoin market-data client
//!
//! The websocket layer needs three things from REST: a connection token, a
//! signed request path, and full-depth book snapshots to calibrate against.
//! Everything goes through the [`RestClient`] trait so the websocket crate
//! can run against [`MockRestClient`] in tests.
//!
//! # Example
//!
//! ```no_run
//! use kucoin_rest::{HttpRestClient, RestConfig, TokenEndpoints};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpRestClient::new(RestConfig::spot())?;
//!     let token = TokenEndpoints::new(&client).bullet(false).await?;
//!     println!("endpoint: {}", token.server()?.endpoint);
//!     Ok(())
//! }
//! ```
//!
//! # Rate Limiting
//!
//! Calls through one client are spaced by a [`RequestThrottle`]
//! (250ms by default). Share one throttle between the spot and futures
//! clients with [`RestConfig::with_throttle`].

pub mod client;
pub mod credentials;
pub mod endpoints;
pub mod error;
pub mod throttle;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{HttpRestClient, Method, RestClient, RestConfig, FUTURES_BASE_URL, SPOT_BASE_URL};
pub use credentials::Credentials;
pub use endpoints::{MarketEndpoints, TokenEndpoints};
pub use error::{RestError, RestResult};
pub use throttle::{RequestThrottle, SharedThrottle};
pub use types::{BulletToken, InstanceServer};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockRestClient;
