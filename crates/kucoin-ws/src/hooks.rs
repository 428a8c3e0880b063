//! Observability hooks for connection lifecycle monitoring
//!
//! Hooks are plain callbacks invoked inline from the connection tasks. They
//! sit beside the event broadcast for logging or metrics integrations that
//! want a callback rather than a receiver. Keep them fast: `on_json_received`
//! runs on the pump loop for every frame.
//!
//! # Example
//!
//! ```
//! use kucoin_ws::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_connect(|info| println!("connected: {}", info.connect_id))
//!     .on_disconnect(|reason| eprintln!("disconnected: {:?}", reason))
//!     .on_pong(|latency| println!("latency {:?}", latency));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kucoin_types::KucoinError;

use crate::events::DisconnectReason;

/// Information about a successful connection
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    /// Client-generated `connectId` sent in the URL
    pub connect_id: String,
    /// Tunnel this connection's traffic uses, if any
    pub tunnel_id: Option<String>,
}

pub type ConnectHook = Arc<dyn Fn(&ConnectInfo) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
pub type JsonHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type PongHook = Arc<dyn Fn(Duration) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&KucoinError) + Send + Sync>;

/// Observability hooks container
#[derive(Clone, Default)]
pub struct Hooks {
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    on_json_received: Option<JsonHook>,
    on_pong: Option<PongHook>,
    on_error: Option<ErrorHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_json_received", &self.on_json_received.is_some())
            .field("on_pong", &self.on_pong.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called each time the welcome frame arrives
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectInfo) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called when the connection is lost or disposed
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called with the raw text of every decoded frame
    pub fn on_json_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_json_received = Some(Arc::new(f));
        self
    }

    /// Called with the round trip of each answered ping
    pub fn on_pong<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_pong = Some(Arc::new(f));
        self
    }

    /// Called for handler failures, malformed frames and server errors
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&KucoinError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn invoke_connect(&self, info: &ConnectInfo) {
        if let Some(ref hook) = self.on_connect {
            hook(info);
        }
    }

    pub(crate) fn invoke_disconnect(&self, reason: &DisconnectReason) {
        if let Some(ref hook) = self.on_disconnect {
            hook(reason);
        }
    }

    pub(crate) fn invoke_json_received(&self, frame: &str) {
        if let Some(ref hook) = self.on_json_received {
            hook(frame);
        }
    }

    pub(crate) fn invoke_pong(&self, latency: Duration) {
        if let Some(ref hook) = self.on_pong {
            hook(latency);
        }
    }

    pub(crate) fn invoke_error(&self, error: &KucoinError) {
        if let Some(ref hook) = self.on_error {
            hook(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_hooks_builder() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let hooks = Hooks::new().on_connect(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        hooks.invoke_connect(&ConnectInfo {
            connect_id: "c1".into(),
            tunnel_id: None,
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hooks_clone_shares_callbacks() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = seen.clone();
        let hooks = Hooks::new().on_json_received(move |frame| {
            seen_clone.fetch_add(frame.len() as u32, Ordering::SeqCst);
        });

        let cloned = hooks.clone();
        cloned.invoke_json_received("{}");
        hooks.invoke_json_received("{}");
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_empty_hooks_are_noops() {
        let hooks = Hooks::default();
        hooks.invoke_disconnect(&DisconnectReason::Shutdown);
        hooks.invoke_error(&KucoinError::Disposed);
        hooks.invoke_pong(Duration::from_millis(3));
        assert!(format!("{hooks:?}").contains("on_pong: false"));
    }
}
