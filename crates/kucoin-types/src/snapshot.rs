//! Full-depth REST snapshots used to calibrate a book

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::level::{deserialize_sequence, deserialize_timestamp, Level, StringOrNumber};

/// Level 2 snapshot: `{"sequence","time","asks":[[price,size]],"bids":[...]}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Level2Snapshot {
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: u64,
    #[serde(default, alias = "ts", deserialize_with = "deserialize_timestamp")]
    pub time: i64,
    #[serde(default, deserialize_with = "deserialize_level_rows")]
    pub asks: Vec<Level>,
    #[serde(default, deserialize_with = "deserialize_level_rows")]
    pub bids: Vec<Level>,
}

/// One resting order in a Level 3 snapshot: `[orderId, price, size, time]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOrder {
    pub order_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub time: i64,
}

/// Level 3 snapshot: resting orders per side plus the sequence they reflect
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Level3Snapshot {
    #[serde(deserialize_with = "deserialize_sequence")]
    pub sequence: u64,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub time: i64,
    #[serde(default, deserialize_with = "deserialize_order_rows")]
    pub asks: Vec<SnapshotOrder>,
    #[serde(default, deserialize_with = "deserialize_order_rows")]
    pub bids: Vec<SnapshotOrder>,
}

fn deserialize_level_rows<'de, D>(deserializer: D) -> Result<Vec<Level>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let rows = Option::<Vec<Vec<StringOrNumber>>>::deserialize(deserializer)?.unwrap_or_default();
    rows.into_iter()
        .map(|row| {
            if row.len() < 2 {
                return Err(D::Error::custom("level row needs [price, size]"));
            }
            let price = row[0].to_decimal().map_err(D::Error::custom)?;
            let size = row[1].to_decimal().map_err(D::Error::custom)?;
            Ok(Level::new(price, size))
        })
        .collect()
}

fn deserialize_order_rows<'de, D>(deserializer: D) -> Result<Vec<SnapshotOrder>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let rows = Option::<Vec<Vec<StringOrNumber>>>::deserialize(deserializer)?.unwrap_or_default();
    rows.into_iter()
        .map(|row| {
            let mut cols = row.into_iter();
            let (Some(id), Some(price), Some(size)) = (cols.next(), cols.next(), cols.next())
            else {
                return Err(D::Error::custom("order row needs [orderId, price, size, time]"));
            };
            let time = match cols.next() {
                Some(t) => t.to_i64().map_err(D::Error::custom)?,
                None => 0,
            };
            Ok(SnapshotOrder {
                order_id: id.into_string(),
                price: price.to_decimal().map_err(D::Error::custom)?,
                size: size.to_decimal().map_err(D::Error::custom)?,
                time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_level2_snapshot() {
        let json = r#"{"sequence":"3262786978","time":1550653727731,"bids":[["6500.12","0.45054140"],["6500.11","0.45054140"]],"asks":[["6500.16","0.57753524"]]}"#;
        let snap: Level2Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.sequence, 3262786978);
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks[0].price, dec!(6500.16));
    }

    #[test]
    fn test_futures_snapshot_numbers() {
        let json = r#"{"symbol":"XBTUSDTM","sequence":100,"ts":1604643655040584408,"asks":[[5000.0,1000]],"bids":[[3200.0,800]]}"#;
        let snap: Level2Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.sequence, 100);
        assert_eq!(snap.asks[0].size, dec!(1000));
        assert_eq!(snap.time, 1604643655040584408);
    }

    #[test]
    fn test_level3_snapshot() {
        let json = r#"{"sequence":"1573503933086","time":1573520918000,"asks":[["5e0d672c1f311300093ac522","0.1917","390.9275",1577936689346546088]],"bids":[["5e0d672c1f311300093ac533","0.1800","10",1577936689346546090]]}"#;
        let snap: Level3Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.asks[0].order_id, "5e0d672c1f311300093ac522");
        assert_eq!(snap.asks[0].size, dec!(390.9275));
        assert_eq!(snap.bids[0].time, 1577936689346546090);
    }

    #[test]
    fn test_level3_short_row_rejected() {
        let json = r#"{"sequence":"1","asks":[["id","1"]],"bids":[]}"#;
        assert!(serde_json::from_str::<Level3Snapshot>(json).is_err());
    }

    #[test]
    fn test_empty_sides() {
        let snap: Level2Snapshot = serde_json::from_str(r#"{"sequence":5,"asks":null}"#).unwrap();
        assert!(snap.asks.is_empty());
        assert!(snap.bids.is_empty());
    }
}
