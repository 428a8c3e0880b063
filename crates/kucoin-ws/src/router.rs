//! Frame routing
//!
//! Every connection owns one [`MessageRouter`]. The pump loop hands it each
//! complete frame; the router decodes it once and then:
//!
//! - `pong` goes to the pinger over a channel,
//! - `welcome` completes the connect handshake,
//! - frames for this router's tunnel (or untunnelled frames when it has no
//!   tunnel) go to the local [`MessageHandler`],
//! - frames for a child tunnel are passed, already decoded, to the child's
//!   router.
//!
//! Handler errors and malformed frames are logged, recorded in the
//! [`ErrorLog`] and dropped; they never stop the pump.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kucoin_types::{Envelope, KucoinError, KucoinResult, MessageType};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::events::ConnectionEvent;
use crate::hooks::Hooks;
use crate::scan::{self, Inbound};

/// Receives the data frames addressed to one connection
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Inbound) -> KucoinResult<()>;
}

/// A pong as seen by the router
#[derive(Debug, Clone)]
pub struct PongReceipt {
    pub id: Option<String>,
    pub received_at: Instant,
}

// ============================================================================
// Error Log
// ============================================================================

/// One recorded failure
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub error: KucoinError,
}

/// Bounded log of recent routing failures, oldest dropped first
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
        }
    }

    pub fn push(&self, error: KucoinError) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ErrorRecord {
            at: Utc::now(),
            error,
        });
    }

    /// Oldest first
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

// ============================================================================
// Router
// ============================================================================

/// Decodes frames and dispatches them to a handler or a child tunnel
pub struct MessageRouter {
    tunnel_id: RwLock<Option<String>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    children: DashMap<String, Arc<MessageRouter>>,
    host: AtomicBool,
    fast_path: AtomicBool,
    pong_tx: Mutex<Option<mpsc::UnboundedSender<PongReceipt>>>,
    welcome_tx: Mutex<Option<oneshot::Sender<()>>>,
    hooks: Hooks,
    errors: ErrorLog,
    events: broadcast::Sender<ConnectionEvent>,
}

impl MessageRouter {
    pub fn new(
        fast_path: bool,
        error_log_capacity: usize,
        hooks: Hooks,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self {
            tunnel_id: RwLock::new(None),
            handler: RwLock::new(None),
            children: DashMap::new(),
            host: AtomicBool::new(false),
            fast_path: AtomicBool::new(fast_path),
            pong_tx: Mutex::new(None),
            welcome_tx: Mutex::new(None),
            hooks,
            errors: ErrorLog::new(error_log_capacity),
            events,
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn tunnel_id(&self) -> Option<String> {
        self.tunnel_id.read().clone()
    }

    pub fn set_tunnel_id(&self, tunnel_id: Option<String>) {
        *self.tunnel_id.write() = tunnel_id;
    }

    pub fn set_host(&self, host: bool) {
        self.host.store(host, Ordering::Release);
    }

    pub fn is_host(&self) -> bool {
        self.host.load(Ordering::Acquire)
    }

    pub fn set_fast_path(&self, enabled: bool) {
        self.fast_path.store(enabled, Ordering::Release);
    }

    pub fn add_child(&self, tunnel_id: impl Into<String>, child: Arc<MessageRouter>) {
        self.children.insert(tunnel_id.into(), child);
    }

    pub fn remove_child(&self, tunnel_id: &str) -> bool {
        self.children.remove(tunnel_id).is_some()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub(crate) fn set_pong_sender(&self, tx: Option<mpsc::UnboundedSender<PongReceipt>>) {
        *self.pong_tx.lock() = tx;
    }

    /// Arm the handshake; the receiver fires on the next `welcome`
    pub(crate) fn expect_welcome(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.welcome_tx.lock() = Some(tx);
        rx
    }

    /// Drop a pending handshake so its waiter fails fast
    pub(crate) fn cancel_welcome(&self) {
        self.welcome_tx.lock().take();
    }

    /// Decode and dispatch one frame
    pub fn route(&self, frame: &str) {
        let message = match scan::decode(frame, self.fast_path.load(Ordering::Acquire)) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.record(e);
                return;
            }
        };
        self.hooks.invoke_json_received(frame);
        self.dispatch(message);
    }

    /// Dispatch an already decoded frame
    pub fn dispatch(&self, message: Inbound) {
        match message.kind() {
            MessageType::Pong => {
                let id = match &message {
                    Inbound::Envelope(env) => env.id.clone(),
                    Inbound::Level3 { .. } => None,
                };
                if let Some(tx) = self.pong_tx.lock().as_ref() {
                    let _ = tx.send(PongReceipt {
                        id,
                        received_at: Instant::now(),
                    });
                }
                return;
            }
            MessageType::Welcome => {
                debug!("Welcome received");
                if let Some(tx) = self.welcome_tx.lock().take() {
                    let _ = tx.send(());
                }
                return;
            }
            MessageType::Ping => {
                trace!("Server ping");
                return;
            }
            _ => {}
        }

        let own = self.tunnel_id.read().clone();
        if message.tunnel_id() == own.as_deref() {
            self.deliver(message);
            return;
        }

        if self.is_host() {
            if let Some(tunnel_id) = message.tunnel_id() {
                let child = self.children.get(tunnel_id).map(|c| c.value().clone());
                if let Some(child) = child {
                    child.dispatch(message);
                    return;
                }
            }
        }

        trace!(tunnel_id = ?message.tunnel_id(), "No route for frame, dropping");
    }

    fn deliver(&self, message: Inbound) {
        match message.kind() {
            MessageType::Message => {
                let handler = self.handler.read().clone();
                match handler {
                    Some(handler) => {
                        if let Err(e) = handler.handle(message) {
                            warn!(error = %e, "Handler failed");
                            self.record(e);
                        }
                    }
                    None => trace!("No handler registered, dropping message"),
                }
            }
            MessageType::Error => {
                let (code, text) = match &message {
                    Inbound::Envelope(env) => error_details(env),
                    Inbound::Level3 { .. } => (String::new(), String::new()),
                };
                warn!(%code, message = %text, "Server error");
                let _ = self.events.send(ConnectionEvent::ServerError {
                    code: code.clone(),
                    message: text.clone(),
                });
                self.record(KucoinError::Server {
                    code,
                    message: text,
                });
            }
            MessageType::Ack => {
                if let Inbound::Envelope(env) = &message {
                    debug!(id = ?env.id, "Ack");
                }
            }
            kind => trace!(kind = kind.as_str(), "Ignoring frame"),
        }
    }

    fn record(&self, error: KucoinError) {
        self.hooks.invoke_error(&error);
        self.errors.push(error);
    }
}

fn error_details(env: &Envelope) -> (String, String) {
    let code = match &env.code {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let message = match &env.data {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    (code, message)
}
