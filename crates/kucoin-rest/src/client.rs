//! REST client: the `RestClient` seam and its reqwest implementation

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::credentials::{Credentials, KEY_VERSION};
use crate::error::{RestError, RestResult};
use crate::throttle::{RequestThrottle, DEFAULT_MIN_INTERVAL};
use crate::types::ApiResponse;

/// Spot REST base
pub const SPOT_BASE_URL: &str = "https://api.kucoin.com";
/// Futures REST base
pub const FUTURES_BASE_URL: &str = "https://api-futures.kucoin.com";

/// Default request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP method of a REST call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// "Make a request, get back the `data` JSON"
///
/// Implementations raise [`RestError::Status`] on non-2xx responses and
/// [`RestError::Api`] on a non-success business code.
#[async_trait]
pub trait RestClient: Send + Sync {
    async fn make_request(
        &self,
        method: Method,
        path: &str,
        params: Option<Value>,
        requires_auth: bool,
    ) -> RestResult<Value>;
}

/// REST client configuration
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub credentials: Option<Credentials>,
    /// Minimum spacing between requests; ignored when `throttle` is set
    pub min_request_interval: Duration,
    /// Throttle shared with other clients
    pub throttle: Option<Arc<RequestThrottle>>,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: SPOT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: None,
            credentials: None,
            min_request_interval: DEFAULT_MIN_INTERVAL,
            throttle: None,
        }
    }
}

impl RestConfig {
    pub fn spot() -> Self {
        Self::default()
    }

    pub fn futures() -> Self {
        Self {
            base_url: FUTURES_BASE_URL.to_string(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }
}

/// reqwest-backed [`RestClient`]
///
/// # Example
///
/// ```no_run
/// use kucoin_rest::{HttpRestClient, MarketEndpoints, RestConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = HttpRestClient::new(RestConfig::spot())?;
///     let book = MarketEndpoints::new(&client).level2_partial("BTC-USDT", 20).await?;
///     println!("sequence {}", book.sequence);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct HttpRestClient {
    http_client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    throttle: Arc<RequestThrottle>,
}

impl HttpRestClient {
    pub fn new(config: RestConfig) -> RestResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_deref().unwrap_or("kucoin-rest/0.1.0"))
            .build()?;

        let throttle = config
            .throttle
            .unwrap_or_else(|| Arc::new(RequestThrottle::new(config.min_request_interval)));

        info!(base_url = %config.base_url, "Created KuCoin REST client");

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: config.credentials,
            throttle,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }
}

/// Flatten a params object into `k=v` pairs for the query string
pub fn query_pairs(params: &Value) -> RestResult<Vec<(String, String)>> {
    let Value::Object(map) = params else {
        return Err(RestError::InvalidParameter(
            "query parameters must be a JSON object".to_string(),
        ));
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => v.to_string(),
                _ => {
                    return Err(RestError::InvalidParameter(format!(
                        "query parameter {k} must be a scalar"
                    )))
                }
            };
            Ok((k.clone(), text))
        })
        .collect()
}

#[async_trait]
impl RestClient for HttpRestClient {
    #[instrument(skip(self, params), fields(method = method.as_str()))]
    async fn make_request(
        &self,
        method: Method,
        path: &str,
        params: Option<Value>,
        requires_auth: bool,
    ) -> RestResult<Value> {
        // GET/DELETE carry params in the query, POST in a JSON body
        let (path_with_query, body) = match (method, params) {
            (Method::Post, Some(p)) => {
                let body = serde_json::to_string(&p)
                    .map_err(|e| RestError::InvalidParameter(e.to_string()))?;
                (path.to_string(), body)
            }
            (Method::Post, None) => (path.to_string(), String::new()),
            (_, Some(p)) => {
                let query = serde_urlencoded::to_string(query_pairs(&p)?)
                    .map_err(|e| RestError::InvalidParameter(e.to_string()))?;
                if query.is_empty() {
                    (path.to_string(), String::new())
                } else {
                    (format!("{path}?{query}"), String::new())
                }
            }
            (_, None) => (path.to_string(), String::new()),
        };

        let creds = if requires_auth {
            Some(
                self.credentials
                    .as_ref()
                    .ok_or_else(|| RestError::AuthRequired(path.to_string()))?,
            )
        } else {
            None
        };

        // Sign after the throttle wait so the timestamp is fresh on arrival
        self.throttle.acquire().await;

        let url = format!("{}{}", self.base_url, path_with_query);
        let mut request = match method {
            Method::Get => self.http_client.get(&url),
            Method::Post => self.http_client.post(&url),
            Method::Delete => self.http_client.delete(&url),
        };
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        if let Some(creds) = creds {
            let timestamp = chrono::Utc::now().timestamp_millis().to_string();
            let signature = creds.sign(&timestamp, method.as_str(), &path_with_query, &body)?;
            request = request
                .header("KC-API-KEY", creds.api_key())
                .header("KC-API-SIGN", signature)
                .header("KC-API-TIMESTAMP", timestamp)
                .header("KC-API-PASSPHRASE", creds.signed_passphrase()?)
                .header("KC-API-KEY-VERSION", KEY_VERSION);
        }

        debug!(%url, "Sending REST request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RestError::Timeout
            } else {
                RestError::Http(e)
            }
        })?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: Option<ApiResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            warn!(status = status.as_u16(), "REST request failed");
            return Err(RestError::Status {
                status: status.as_u16(),
                code: parsed.as_ref().and_then(ApiResponse::code_str),
                message: parsed
                    .and_then(|p| p.msg)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string()),
            });
        }

        parsed
            .ok_or_else(|| RestError::Parse(format!("response is not JSON: {}", truncate(&text))))?
            .into_result()
    }
}

fn truncate(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
