//! Wire envelope shared by both directions of the websocket
//!
//! Every frame on a KuCoin feed is one JSON object discriminated by `type`.
//! Inbound data frames carry `topic`, `subject` and `data`; control frames
//! carry an `id` that echoes the request. Multiplexed frames additionally
//! carry `tunnelId`; its absence means the host/default tunnel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KucoinError, KucoinResult};

/// Envelope discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Welcome,
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
    Message,
    Ack,
    OpenTunnel,
    CloseTunnel,
    Error,
    /// Anything this client does not know about
    #[serde(other)]
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Message => "message",
            Self::Ack => "ack",
            Self::OpenTunnel => "openTunnel",
            Self::CloseTunnel => "closeTunnel",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// True for frames that never reach a feed handler
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Welcome | Self::Ping | Self::Pong)
    }
}

/// One websocket frame, decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    /// Tunnel being opened or closed by an `openTunnel`/`closeTunnel` request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tunnel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_channel: Option<bool>,

    /// Ask the server to acknowledge the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error code on `type: error` frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl Envelope {
    /// Bare envelope of the given type
    pub fn new(kind: MessageType) -> Self {
        Self {
            id: None,
            kind,
            topic: None,
            subject: None,
            tunnel_id: None,
            new_tunnel_id: None,
            private_channel: None,
            response: None,
            data: None,
            code: None,
        }
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(MessageType::Ping)
        }
    }

    pub fn subscribe(id: impl Into<String>, topic: impl Into<String>, private: bool) -> Self {
        Self {
            id: Some(id.into()),
            topic: Some(topic.into()),
            private_channel: Some(private),
            response: Some(true),
            ..Self::new(MessageType::Subscribe)
        }
    }

    pub fn unsubscribe(id: impl Into<String>, topic: impl Into<String>, private: bool) -> Self {
        Self {
            id: Some(id.into()),
            topic: Some(topic.into()),
            private_channel: Some(private),
            response: Some(true),
            ..Self::new(MessageType::Unsubscribe)
        }
    }

    pub fn open_tunnel(id: impl Into<String>, tunnel_id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            new_tunnel_id: Some(tunnel_id.into()),
            response: Some(true),
            ..Self::new(MessageType::OpenTunnel)
        }
    }

    pub fn close_tunnel(id: impl Into<String>, tunnel_id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            new_tunnel_id: Some(tunnel_id.into()),
            response: Some(true),
            ..Self::new(MessageType::CloseTunnel)
        }
    }

    /// Stamp the tunnel this envelope travels on
    pub fn with_tunnel(mut self, tunnel_id: Option<&str>) -> Self {
        self.tunnel_id = tunnel_id.map(str::to_string);
        self
    }

    /// Decode a frame
    pub fn parse(frame: &str) -> KucoinResult<Self> {
        serde_json::from_str(frame).map_err(|e| KucoinError::InvalidJson {
            message: e.to_string(),
            raw: Some(truncate_raw(frame)),
        })
    }

    /// Encode for sending
    pub fn to_json(&self) -> KucoinResult<String> {
        serde_json::to_string(self).map_err(|e| KucoinError::InvalidJson {
            message: e.to_string(),
            raw: None,
        })
    }

    /// The part of the topic after `:`, e.g. `BTC-USDT` in `/market/level2:BTC-USDT`
    pub fn topic_suffix(&self) -> Option<&str> {
        self.topic
            .as_deref()
            .and_then(|t| t.split_once(':'))
            .map(|(_, suffix)| suffix)
    }

    /// The part of the topic before `:`
    pub fn topic_base(&self) -> Option<&str> {
        self.topic
            .as_deref()
            .map(|t| t.split_once(':').map_or(t, |(base, _)| base))
    }

    /// Deserialize `data` into a typed record
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> KucoinResult<T> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| KucoinError::UnexpectedMessage("message has no data".to_string()))?;
        T::deserialize(data).map_err(|e| KucoinError::InvalidJson {
            message: e.to_string(),
            raw: None,
        })
    }
}

fn truncate_raw(frame: &str) -> String {
    const MAX: usize = 256;
    if frame.len() <= MAX {
        return frame.to_string();
    }
    let mut end = MAX;
    while !frame.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &frame[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_welcome() {
        let env = Envelope::parse(r#"{"id":"hQvf8jkno","type":"welcome"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Welcome);
        assert_eq!(env.id.as_deref(), Some("hQvf8jkno"));
        assert!(env.tunnel_id.is_none());
    }

    #[test]
    fn test_parse_message_with_tunnel() {
        let frame = r#"{"type":"message","topic":"/market/level2:BTC-USDT","subject":"trade.l2update","tunnelId":"bt1","data":{"sequenceStart":1}}"#;
        let env = Envelope::parse(frame).unwrap();
        assert_eq!(env.kind, MessageType::Message);
        assert_eq!(env.tunnel_id.as_deref(), Some("bt1"));
        assert_eq!(env.topic_base(), Some("/market/level2"));
        assert_eq!(env.topic_suffix(), Some("BTC-USDT"));
        assert!(env.data.is_some());
    }

    #[test]
    fn test_unknown_type() {
        let env = Envelope::parse(r#"{"type":"somethingNew"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Unknown);
    }

    #[test]
    fn test_parse_invalid() {
        let err = Envelope::parse("{not json").unwrap_err();
        assert!(matches!(err, KucoinError::InvalidJson { .. }));
    }

    #[test]
    fn test_subscribe_serialization() {
        let env = Envelope::subscribe("7", "/market/level2:BTC-USDT,ETH-USDT", false)
            .with_tunnel(Some("bt1"));
        let json: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["topic"], "/market/level2:BTC-USDT,ETH-USDT");
        assert_eq!(json["privateChannel"], false);
        assert_eq!(json["response"], true);
        assert_eq!(json["tunnelId"], "bt1");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_open_tunnel_serialization() {
        let json: Value =
            serde_json::from_str(&Envelope::open_tunnel("1", "bt2").to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "openTunnel");
        assert_eq!(json["newTunnelId"], "bt2");
    }

    #[test]
    fn test_topic_without_suffix() {
        let env = Envelope {
            topic: Some("/market/ticker".into()),
            ..Envelope::new(MessageType::Message)
        };
        assert_eq!(env.topic_base(), Some("/market/ticker"));
        assert_eq!(env.topic_suffix(), None);
    }

    #[test]
    fn test_truncate_raw() {
        let long = "x".repeat(1000);
        assert!(truncate_raw(&long).len() < 300);
    }
}
