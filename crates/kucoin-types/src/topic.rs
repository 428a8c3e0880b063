//! Topic strings: `{base}:{symbol1,symbol2,...}`

use std::fmt;

use crate::enums::Market;

/// Spot Level 2 incremental diffs
pub const LEVEL2: &str = "/market/level2";
/// Spot Level 3 (full match) order messages
pub const LEVEL3: &str = "/spotMarket/level3";
/// Futures Level 2 incremental diffs
pub const FUTURES_LEVEL2: &str = "/contractMarket/level2";
/// Spot ticker; subscribe with suffix `all` for every symbol
pub const TICKER: &str = "/market/ticker";

/// Level 2 topic base for a market
pub fn level2_base(market: Market) -> &'static str {
    match market {
        Market::Spot => LEVEL2,
        Market::Futures => FUTURES_LEVEL2,
    }
}

/// A subscription topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    base: String,
    symbols: Vec<String>,
}

impl Topic {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            symbols: Vec::new(),
        }
    }

    /// Topic for a batch of symbols
    pub fn with_symbols<I, S>(base: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base: base.into(),
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse `base:a,b` (or a bare base)
    pub fn parse(topic: &str) -> Self {
        match topic.split_once(':') {
            Some((base, list)) => Self {
                base: base.to_string(),
                symbols: list
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            },
            None => Self::new(topic),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.symbols.is_empty() {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}:{}", self.base, self.symbols.join(","))
        }
    }
}
