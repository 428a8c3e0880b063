//! Websocket connection tokens

use serde_json::Value;
use tracing::{debug, instrument};

use crate::client::{Method, RestClient};
use crate::error::{RestError, RestResult};
use crate::types::BulletToken;

pub const PUBLIC_BULLET_PATH: &str = "/api/v1/bullet-public";
pub const PRIVATE_BULLET_PATH: &str = "/api/v1/bullet-private";

/// Token endpoints
pub struct TokenEndpoints<'a> {
    client: &'a dyn RestClient,
}

impl<'a> TokenEndpoints<'a> {
    pub fn new(client: &'a dyn RestClient) -> Self {
        Self { client }
    }

    /// Request a bullet token; private tokens need credentials
    #[instrument(skip(self))]
    pub async fn bullet(&self, private: bool) -> RestResult<BulletToken> {
        let path = if private {
            PRIVATE_BULLET_PATH
        } else {
            PUBLIC_BULLET_PATH
        };
        debug!(path, "Requesting websocket token");

        let data = self
            .client
            .make_request(Method::Post, path, None, private)
            .await?;
        decode(data)
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(data: Value) -> RestResult<T> {
    serde_json::from_value(data).map_err(|e| RestError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRestClient;
    use serde_json::json;

    fn bullet_json() -> Value {
        json!({
            "token": "2neAiuYvAU61ZDXANAGAsiL4",
            "instanceServers": [{
                "endpoint": "wss://ws-api-spot.kucoin.com/",
                "encrypt": true,
                "protocol": "websocket",
                "pingInterval": 18000,
                "pingTimeout": 10000
            }]
        })
    }

    #[tokio::test]
    async fn test_public_bullet() {
        let mock = MockRestClient::new();
        mock.respond(PUBLIC_BULLET_PATH, bullet_json());

        let token = TokenEndpoints::new(&mock).bullet(false).await.unwrap();
        assert_eq!(token.token, "2neAiuYvAU61ZDXANAGAsiL4");

        let calls = mock.requests();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Post);
        assert!(!calls[0].requires_auth);
    }

    #[tokio::test]
    async fn test_private_bullet_is_authenticated() {
        let mock = MockRestClient::new();
        mock.respond(PRIVATE_BULLET_PATH, bullet_json());

        TokenEndpoints::new(&mock).bullet(true).await.unwrap();
        assert!(mock.requests()[0].requires_auth);
    }

    #[tokio::test]
    async fn test_bullet_error_propagates() {
        let mock = MockRestClient::new();
        mock.fail_with(PUBLIC_BULLET_PATH, "400003", "KC-API-KEY not exists");

        let err = TokenEndpoints::new(&mock).bullet(false).await.unwrap_err();
        assert!(matches!(err, RestError::Api { ref code, .. } if code == "400003"));
    }
}
