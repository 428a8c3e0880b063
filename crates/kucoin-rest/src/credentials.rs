//! API credentials and request signing
//!
//! KuCoin API key version 2 signs every private request with HMAC-SHA256:
//!
//! 1. prehash = `timestamp + METHOD + path_with_query + body`
//! 2. `KC-API-SIGN` = base64(HMAC-SHA256(secret, prehash))
//! 3. `KC-API-PASSPHRASE` = base64(HMAC-SHA256(secret, passphrase))
//!
//! # Security
//!
//! The secret and passphrase are held in `secrecy` containers, which zeroize
//! on drop and keep them out of `Debug` output.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::{RestError, RestResult};

type HmacSha256 = Hmac<Sha256>;

/// API key version sent in `KC-API-KEY-VERSION`
pub const KEY_VERSION: &str = "2";

/// API credentials for authenticated requests
pub struct Credentials {
    api_key: String,
    secret: SecretString,
    passphrase: SecretString,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> RestResult<Self> {
        let api_key = api_key.into();
        let secret = secret.into();
        if api_key.is_empty() || secret.is_empty() {
            return Err(RestError::InvalidCredentials(
                "api key and secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            secret: SecretString::from(secret),
            passphrase: SecretString::from(passphrase.into()),
        })
    }

    /// Read `KUCOIN_API_KEY`, `KUCOIN_API_SECRET` and `KUCOIN_API_PASSPHRASE`
    pub fn from_env() -> RestResult<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| RestError::EnvVarNotSet(name.to_string()))
        };
        Self::new(
            var("KUCOIN_API_KEY")?,
            var("KUCOIN_API_SECRET")?,
            var("KUCOIN_API_PASSPHRASE")?,
        )
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn hmac_base64(&self, message: &[u8]) -> RestResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| RestError::InvalidCredentials(e.to_string()))?;
        mac.update(message);
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Signature for one request
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path_with_query: &str,
        body: &str,
    ) -> RestResult<String> {
        let prehash = format!("{timestamp}{method}{path_with_query}{body}");
        self.hmac_base64(prehash.as_bytes())
    }

    /// Passphrase as sent with key version 2
    pub fn signed_passphrase(&self) -> RestResult<String> {
        self.hmac_base64(self.passphrase.expose_secret().as_bytes())
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            api_key: self.api_key.clone(),
            secret: SecretString::from(self.secret.expose_secret().to_string()),
            passphrase: SecretString::from(self.passphrase.expose_secret().to_string()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown: String = self.api_key.chars().take(8).collect();
        f.debug_struct("Credentials")
            .field("api_key", &format!("{shown}..."))
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}
