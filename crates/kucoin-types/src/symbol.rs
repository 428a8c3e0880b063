//! Trading pair symbols (BTC-USDT format)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading pair symbol (`BASE-QUOTE` for spot, contract code for futures)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub const BTC_USDT: &'static str = "BTC-USDT";
    pub const ETH_USDT: &'static str = "ETH-USDT";

    /// Create a new symbol without validation
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base currency ("BTC" from "BTC-USDT"), `None` for contract codes
    pub fn base(&self) -> Option<&str> {
        self.0.split_once('-').map(|(base, _)| base)
    }

    /// Quote currency ("USDT" from "BTC-USDT"), `None` for contract codes
    pub fn quote(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, quote)| quote)
    }
}

impl FromStr for Symbol {
    type Err = SymbolParseError;

    /// Accepts `BASE-QUOTE` pairs and bare contract codes such as `XBTUSDTM`.
    /// Characters that would break a topic (`:`, `,`, whitespace) are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SymbolParseError::Empty);
        }

        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SymbolParseError::InvalidCharacter(s.to_string(), bad));
        }

        if s.contains('-') {
            let parts: Vec<&str> = s.split('-').collect();
            if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
                return Err(SymbolParseError::InvalidFormat(s.to_string()));
            }
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

/// Error parsing a symbol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolParseError {
    #[error("Symbol is empty")]
    Empty,

    #[error("Symbol {0} contains invalid character {1:?}")]
    InvalidCharacter(String, char),

    #[error("Invalid symbol format: {0}")]
    InvalidFormat(String),
}
