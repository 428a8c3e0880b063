//! Types for REST responses consumed by the websocket layer

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{RestError, RestResult, SUCCESS_CODE};

// ============================================================================
// API Response Wrapper
// ============================================================================

/// Standard response body: `{"code":"200000","data":...}` or `{"code":"400100","msg":"..."}`
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ApiResponse {
    /// Business code as text; numbers are accepted too
    pub fn code_str(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code_str().map_or(true, |c| c == SUCCESS_CODE)
    }

    /// The `data` member, or the business error
    pub fn into_result(self) -> RestResult<Value> {
        match self.code_str() {
            Some(code) if code != SUCCESS_CODE => Err(RestError::Api {
                code,
                message: self.msg.unwrap_or_default(),
            }),
            _ => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// Bullet Token
// ============================================================================

/// One websocket server advertised with a bullet token
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub protocol: String,
    /// Milliseconds
    pub ping_interval: u64,
    /// Milliseconds
    pub ping_timeout: u64,
}

impl InstanceServer {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }
}

/// Response of `bullet-public` / `bullet-private`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletToken {
    pub token: String,
    pub instance_servers: Vec<InstanceServer>,
}

impl BulletToken {
    /// First advertised server
    pub fn server(&self) -> RestResult<&InstanceServer> {
        self.instance_servers
            .first()
            .ok_or_else(|| RestError::Parse("bullet token has no instance servers".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let resp: ApiResponse =
            serde_json::from_str(r#"{"code":"200000","data":{"sequence":"1"}}"#).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.into_result().unwrap()["sequence"], "1");
    }

    #[test]
    fn test_business_error() {
        let resp: ApiResponse =
            serde_json::from_str(r#"{"code":"400100","msg":"Parameter error"}"#).unwrap();
        assert!(!resp.is_success());
        match resp.into_result() {
            Err(RestError::Api { code, message }) => {
                assert_eq!(code, "400100");
                assert_eq!(message, "Parameter error");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_code() {
        let resp: ApiResponse = serde_json::from_str(r#"{"code":200000,"data":[]}"#).unwrap();
        assert!(resp.is_success());
    }

    #[test]
    fn test_bullet_token() {
        let json = r#"{"token":"2neAiuYvAU61ZD","instanceServers":[{"endpoint":"wss://ws-api-spot.kucoin.com/","encrypt":true,"protocol":"websocket","pingInterval":18000,"pingTimeout":10000}]}"#;
        let token: BulletToken = serde_json::from_str(json).unwrap();
        let server = token.server().unwrap();
        assert_eq!(server.ping_interval(), Duration::from_secs(18));
        assert_eq!(server.ping_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_bullet_without_servers() {
        let token = BulletToken {
            token: "t".into(),
            instance_servers: vec![],
        };
        assert!(token.server().is_err());
    }
}
