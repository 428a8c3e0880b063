//! Price level types with decimal precision, plus the lenient number
//! decoders shared by every wire record in this crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// A single aggregated price level in the orderbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Price of this level
    #[serde(deserialize_with = "deserialize_decimal")]
    pub price: Decimal,
    /// Aggregate size at this price
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size: Decimal,
}

impl Level {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Check if this level has zero size (should be removed)
    pub fn is_zero(&self) -> bool {
        self.size.is_zero()
    }
}

/// A Level 2 change row: `[price, size, sequence]`
///
/// The exchange stamps every row with the sequence it was produced at, so a
/// batched update straddling a snapshot can be applied partially.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceChange {
    pub price: Decimal,
    pub size: Decimal,
    /// Row sequence, 0 when the row carried none
    pub sequence: u64,
}

impl PriceChange {
    pub fn new(price: Decimal, size: Decimal, sequence: u64) -> Self {
        Self {
            price,
            size,
            sequence,
        }
    }
}

impl<'de> Deserialize<'de> for PriceChange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let row = Vec::<StringOrNumber>::deserialize(deserializer)?;
        if row.len() < 2 {
            return Err(D::Error::custom(format!(
                "price change row needs at least 2 columns, got {}",
                row.len()
            )));
        }
        let price = row[0].to_decimal().map_err(D::Error::custom)?;
        let size = row[1].to_decimal().map_err(D::Error::custom)?;
        let sequence = match row.get(2) {
            Some(s) => s.to_u64().map_err(D::Error::custom)?,
            None => 0,
        };
        Ok(Self::new(price, size, sequence))
    }
}

/// Wire scalar that may arrive as a JSON string or number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl StringOrNumber {
    pub(crate) fn to_decimal(&self) -> Result<Decimal, String> {
        match self {
            Self::String(s) => parse_decimal(s),
            Self::Number(n) => {
                let s = n.to_string();
                // Scientific notation has to go through f64
                if s.contains('e') || s.contains('E') {
                    use rust_decimal::prelude::FromPrimitive;
                    let f = n.as_f64().ok_or_else(|| "invalid number".to_string())?;
                    Decimal::from_f64(f).ok_or_else(|| "cannot convert to decimal".to_string())
                } else {
                    parse_decimal(&s)
                }
            }
        }
    }

    pub(crate) fn to_u64(&self) -> Result<u64, String> {
        match self {
            Self::String(s) => s
                .parse::<u64>()
                .map_err(|e| format!("invalid sequence {s:?}: {e}")),
            Self::Number(n) => n
                .as_u64()
                .ok_or_else(|| format!("invalid sequence {n}")),
        }
    }

    pub(crate) fn to_i64(&self) -> Result<i64, String> {
        match self {
            Self::String(s) => s
                .parse::<i64>()
                .map_err(|e| format!("invalid integer {s:?}: {e}")),
            Self::Number(n) => n.as_i64().ok_or_else(|| format!("invalid integer {n}")),
        }
    }

    pub(crate) fn into_string(self) -> String {
        match self {
            Self::String(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Parse a decimal from its wire text, accepting scientific notation
pub fn parse_decimal(s: &str) -> Result<Decimal, String> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| format!("invalid decimal {s:?}: {e}"))
}

/// CRITICAL: decimals arrive as strings; f64 would lose precision
pub(crate) fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    StringOrNumber::deserialize(deserializer)?
        .to_decimal()
        .map_err(D::Error::custom)
}

pub(crate) fn deserialize_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) if s.is_empty() => Ok(None),
        Some(v) => v.to_decimal().map(Some).map_err(D::Error::custom),
        None => Ok(None),
    }
}

/// Sequences are sent as strings on some channels and numbers on others
pub(crate) fn deserialize_sequence<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    StringOrNumber::deserialize(deserializer)?
        .to_u64()
        .map_err(D::Error::custom)
}

pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(v) => v.to_i64().map_err(D::Error::custom),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_level_from_json_string() {
        let json = r#"{"price": "88813.5", "size": "0.00460208"}"#;
        let level: Level = serde_json::from_str(json).unwrap();

        assert_eq!(level.price, dec!(88813.5));
        assert_eq!(level.size.to_string(), "0.00460208");
    }

    #[test]
    fn test_level_from_json_number() {
        let json = r#"{"price": 88813.5, "size": 0.00460208}"#;
        let level: Level = serde_json::from_str(json).unwrap();
        assert_eq!(level.size.to_string(), "0.00460208");
    }

    #[test]
    fn test_level_is_zero() {
        assert!(Level::new(dec!(100), Decimal::ZERO).is_zero());
        assert!(!Level::new(dec!(100), Decimal::ONE).is_zero());
    }

    #[test]
    fn test_price_change_row() {
        let change: PriceChange = serde_json::from_str(r#"["6500.12","0.45","1545896669105"]"#).unwrap();
        assert_eq!(change.price, dec!(6500.12));
        assert_eq!(change.size, dec!(0.45));
        assert_eq!(change.sequence, 1545896669105);
    }

    #[test]
    fn test_price_change_without_sequence() {
        let change: PriceChange = serde_json::from_str(r#"["1.5", 2]"#).unwrap();
        assert_eq!(change.size, dec!(2));
        assert_eq!(change.sequence, 0);
    }

    #[test]
    fn test_price_change_too_short() {
        assert!(serde_json::from_str::<PriceChange>(r#"["1.5"]"#).is_err());
    }

    #[test]
    fn test_parse_decimal_scientific() {
        assert_eq!(parse_decimal("5e-6").unwrap(), dec!(0.000005));
        assert!(parse_decimal("abc").is_err());
    }
}
