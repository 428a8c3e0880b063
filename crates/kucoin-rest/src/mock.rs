//! In-memory [`RestClient`] for tests
//!
//! Responses are registered per path and persist, so repeated calls (for
//! example a resync fetching the same snapshot again) keep succeeding.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Method, RestClient};
use crate::error::{RestError, RestResult};

/// One call seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub params: Option<Value>,
    pub requires_auth: bool,
}

#[derive(Debug, Clone)]
enum Reply {
    Data(Value),
    Fail { code: String, message: String },
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, Reply>,
    requests: Vec<RecordedRequest>,
    delay: Option<Duration>,
}

/// Mock REST client; clones share state
#[derive(Clone, Default)]
pub struct MockRestClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with `data` until replaced
    pub fn respond(&self, path: impl Into<String>, data: Value) {
        self.state.lock().replies.insert(path.into(), Reply::Data(data));
    }

    /// Answer `path` with a business error until replaced
    pub fn fail_with(&self, path: impl Into<String>, code: &str, message: &str) {
        self.state.lock().replies.insert(
            path.into(),
            Reply::Fail {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Delay every reply
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of calls made to `path`
    pub fn count(&self, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

#[async_trait]
impl RestClient for MockRestClient {
    async fn make_request(
        &self,
        method: Method,
        path: &str,
        params: Option<Value>,
        requires_auth: bool,
    ) -> RestResult<Value> {
        let (reply, delay) = {
            let mut state = self.state.lock();
            state.requests.push(RecordedRequest {
                method,
                path: path.to_string(),
                params,
                requires_auth,
            });
            (state.replies.get(path).cloned(), state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Data(data)) => Ok(data),
            Some(Reply::Fail { code, message }) => Err(RestError::Api { code, message }),
            None => Err(RestError::Status {
                status: 404,
                code: None,
                message: format!("no mock response for {path}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let mock = MockRestClient::new();
        let err = mock
            .make_request(Method::Get, "/nope", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_responses_persist() {
        let mock = MockRestClient::new();
        mock.respond("/a", json!({"x": 1}));
        for _ in 0..3 {
            let data = mock.make_request(Method::Get, "/a", None, false).await.unwrap();
            assert_eq!(data["x"], 1);
        }
        assert_eq!(mock.count("/a"), 3);
    }
}
