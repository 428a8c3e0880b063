//! WebSocket connection management
//!
//! A [`FeedConnection`] owns one socket session at a time. A session is four
//! tokio tasks sharing a child [`CancellationToken`]:
//!
//! - **receive loop**: reads raw chunks, runs the [`FrameExtractor`] and
//!   queues complete frames. It never handles a message itself.
//! - **pump loop**: drains the queue wholesale and routes frames in arrival
//!   order.
//! - **writer**: the only task that touches the sink.
//! - **pinger**: pings on the server's schedule and declares the session
//!   lost when a pong is late.
//!
//! # Tunnels
//!
//! A connection can become a multiplex host with
//! [`init_as_multiplex_host`](FeedConnection::init_as_multiplex_host). Other
//! connections then [`attach_as_child`](FeedConnection::attach_as_child) and
//! ride the host's socket: their traffic is stamped with their tunnel id and
//! the host's router hands their frames to the child's router.
//!
//! There is no automatic reconnect. Watch for
//! [`ConnectionEvent::Disconnected`] and call [`connect`](FeedConnection::connect)
//! again.

use kucoin_rest::{BulletToken, RestClient, TokenEndpoints};
use kucoin_types::{Envelope, KucoinError, KucoinResult, Market};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT};
use crate::events::{ConnectionEvent, ConnectionState, DisconnectReason};
use crate::framer::FrameExtractor;
use crate::hooks::{ConnectInfo, Hooks};
use crate::router::{ErrorRecord, MessageHandler, MessageRouter, PongReceipt};
use crate::transport::{Connector, TransportError, TransportSink, TransportStream};

/// Most tunnels one host carries
pub const MAX_TUNNEL_CHILDREN: usize = 4;

static TUNNEL_COUNTER: AtomicU64 = AtomicU64::new(1);
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_tunnel_id() -> String {
    format!("tunnel-{}", TUNNEL_COUNTER.fetch_add(1, Ordering::Relaxed))
}

// ============================================================================
// Frame Queue
// ============================================================================

/// Frames waiting for the pump, swapped out wholesale
#[derive(Default)]
struct FrameQueue {
    frames: Mutex<Vec<String>>,
    notify: Notify,
}

impl FrameQueue {
    /// Returns the queue length after the push
    fn push_all(&self, frames: Vec<String>) -> usize {
        let len = {
            let mut queue = self.frames.lock();
            queue.extend(frames);
            queue.len()
        };
        self.notify.notify_one();
        len
    }

    fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.frames.lock())
    }
}

// ============================================================================
// Connection
// ============================================================================

struct Session {
    generation: u64,
    cancel: CancellationToken,
    writer: mpsc::UnboundedSender<String>,
}

enum Role {
    Standalone,
    Host { children: Vec<FeedConnection> },
    Child { host: Weak<Inner> },
}

struct Inner {
    config: ConnectionConfig,
    rest: Arc<dyn RestClient>,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    hooks: Hooks,
    events: broadcast::Sender<ConnectionEvent>,
    state: RwLock<ConnectionState>,
    token: Mutex<Option<BulletToken>>,
    /// Interval and timeout advertised with the last token
    server_ping: RwLock<Option<(Duration, Duration)>>,
    ping_override: RwLock<Option<Duration>>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    role: RwLock<Role>,
    latency: RwLock<Option<Duration>>,
    connect_id: RwLock<Option<String>>,
    disposed: AtomicBool,
    root: CancellationToken,
}

/// One websocket connection, or one tunnel on a host's connection
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct FeedConnection {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`FeedConnection`]
#[derive(Clone, Default)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<FeedConnection> {
        self.inner.upgrade().map(|inner| FeedConnection { inner })
    }
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("market", &self.inner.config.market)
            .field("state", &self.state())
            .field("tunnel_id", &self.tunnel_id())
            .finish()
    }
}

impl FeedConnection {
    pub fn new(
        config: ConnectionConfig,
        rest: Arc<dyn RestClient>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::with_hooks(config, rest, connector, Hooks::default())
    }

    pub fn with_hooks(
        config: ConnectionConfig,
        rest: Arc<dyn RestClient>,
        connector: Arc<dyn Connector>,
        hooks: Hooks,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let router = Arc::new(MessageRouter::new(
            config.fast_path,
            config.error_log_capacity,
            hooks.clone(),
            events.clone(),
        ));
        Self {
            inner: Arc::new(Inner {
                config,
                rest,
                connector,
                router,
                hooks,
                events,
                state: RwLock::new(ConnectionState::Disconnected),
                token: Mutex::new(None),
                server_ping: RwLock::new(None),
                ping_override: RwLock::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                role: RwLock::new(Role::Standalone),
                latency: RwLock::new(None),
                connect_id: RwLock::new(None),
                disposed: AtomicBool::new(false),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Open the socket and wait for the server's `welcome`
    ///
    /// Returns `Ok(false)` when the attempt failed; the reason goes out as
    /// [`ConnectionEvent::ConnectFailed`]. Connecting an open connection is
    /// a no-op returning `Ok(true)`.
    #[instrument(skip(self), fields(market = ?self.inner.config.market))]
    pub async fn connect(&self) -> KucoinResult<bool> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(KucoinError::Disposed);
        }
        if matches!(*inner.role.read(), Role::Child { .. }) {
            return Err(KucoinError::precondition(
                "a tunnel child connects through its host",
            ));
        }
        if inner.session.lock().is_some() {
            return Ok(true);
        }

        match inner.establish().await {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(error = %e, "Connect failed");
                inner.set_state(ConnectionState::Disconnected);
                inner.emit(ConnectionEvent::ConnectFailed { error: e.clone() });
                inner.hooks.invoke_error(&e);
                Ok(false)
            }
        }
    }

    /// Queue an envelope for sending
    ///
    /// A tunnel child stamps its tunnel id and sends through its host.
    pub fn send(&self, envelope: &Envelope) -> KucoinResult<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(KucoinError::Disposed);
        }
        let tunnel_id = inner.router.tunnel_id();
        let host = match &*inner.role.read() {
            Role::Child { host } => Some(host.upgrade().ok_or(KucoinError::NotConnected)?),
            _ => None,
        };

        let stamped;
        let envelope = match tunnel_id.as_deref() {
            Some(id) => {
                stamped = envelope.clone().with_tunnel(Some(id));
                &stamped
            }
            None => envelope,
        };
        match host {
            Some(host) => host.send_raw(envelope),
            None => inner.send_raw(envelope),
        }
    }

    /// Send without tunnel stamping, through the host for a child
    pub(crate) fn send_control(&self, envelope: &Envelope) -> KucoinResult<()> {
        let host = match &*self.inner.role.read() {
            Role::Child { host } => Some(host.upgrade().ok_or(KucoinError::NotConnected)?),
            _ => None,
        };
        match host {
            Some(host) => host.send_raw(envelope),
            None => self.inner.send_raw(envelope),
        }
    }

    /// Unique id for an outbound request
    pub fn next_request_id(&self) -> String {
        REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Override the ping interval
    ///
    /// Must be non-zero and no longer than the interval the server
    /// advertised with its token, once one is known.
    pub fn set_ping_interval(&self, interval: Duration) -> KucoinResult<()> {
        if self.inner.is_disposed() {
            return Err(KucoinError::Disposed);
        }
        if interval.is_zero() {
            return Err(KucoinError::precondition("ping interval must be non-zero"));
        }
        if let Some((server, _)) = *self.inner.server_ping.read() {
            if interval > server {
                return Err(KucoinError::precondition(format!(
                    "ping interval {interval:?} exceeds server interval {server:?}"
                )));
            }
        }
        *self.inner.ping_override.write() = Some(interval);
        Ok(())
    }

    /// Make this connection a tunnel host
    ///
    /// With a tunnel id, the host's own traffic uses that tunnel too.
    pub fn init_as_multiplex_host(&self, tunnel_id: Option<String>) -> KucoinResult<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(KucoinError::Disposed);
        }
        {
            let mut role = inner.role.write();
            match &*role {
                Role::Standalone => {}
                Role::Host { .. } => {
                    return Err(KucoinError::precondition("already a multiplex host"))
                }
                Role::Child { .. } => {
                    return Err(KucoinError::precondition("a tunnel child cannot host"))
                }
            }
            *role = Role::Host {
                children: Vec::new(),
            };
        }
        inner.router.set_host(true);
        inner.router.set_tunnel_id(tunnel_id.clone());
        info!(tunnel_id = ?tunnel_id, "Initialized as multiplex host");

        if let Some(id) = tunnel_id {
            if inner.session.lock().is_some() {
                inner.open_tunnel(&id)?;
            }
        }
        Ok(())
    }

    /// Ride `host`'s socket on a tunnel
    ///
    /// All preconditions are checked before anything is sent. Returns the
    /// tunnel id, generated as `tunnel-<n>` when none is given.
    pub fn attach_as_child(
        &self,
        host: &FeedConnection,
        tunnel_id: Option<String>,
    ) -> KucoinResult<String> {
        let (me, host_inner) = (&self.inner, &host.inner);
        if me.is_disposed() || host_inner.is_disposed() {
            return Err(KucoinError::Disposed);
        }
        if Arc::ptr_eq(me, host_inner) {
            return Err(KucoinError::precondition("cannot attach a connection to itself"));
        }
        if me.config.market != host_inner.config.market {
            return Err(KucoinError::precondition(format!(
                "cannot attach a {} feed to a {} host",
                market_name(me.config.market),
                market_name(host_inner.config.market)
            )));
        }
        if me.config.private && !host_inner.config.private {
            return Err(KucoinError::precondition(
                "a private feed cannot attach to a public host",
            ));
        }

        let tunnel_id = tunnel_id.unwrap_or_else(next_tunnel_id);
        {
            // Address order, so reciprocal attaches cannot deadlock
            let (mut host_role, mut my_role) = if Arc::as_ptr(host_inner) < Arc::as_ptr(me) {
                let host_role = host_inner.role.write();
                (host_role, me.role.write())
            } else {
                let my_role = me.role.write();
                (host_inner.role.write(), my_role)
            };
            let Role::Host { children } = &mut *host_role else {
                return Err(KucoinError::precondition("host is not a multiplex host"));
            };
            if !matches!(*my_role, Role::Standalone) {
                return Err(KucoinError::precondition("connection is already a host or child"));
            }
            if me.session.lock().is_some() || *me.state.read() != ConnectionState::Disconnected {
                return Err(KucoinError::precondition(
                    "connection is already connected on its own",
                ));
            }
            if children.len() >= MAX_TUNNEL_CHILDREN {
                return Err(KucoinError::precondition(format!(
                    "host already carries {MAX_TUNNEL_CHILDREN} tunnels"
                )));
            }
            let duplicate = host_inner.router.tunnel_id().as_deref() == Some(tunnel_id.as_str())
                || children
                    .iter()
                    .any(|c| c.tunnel_id().as_deref() == Some(tunnel_id.as_str()));
            if duplicate {
                return Err(KucoinError::precondition(format!(
                    "tunnel {tunnel_id} is already in use"
                )));
            }

            children.push(self.clone());
            *my_role = Role::Child {
                host: Arc::downgrade(host_inner),
            };
        }

        me.router.set_tunnel_id(Some(tunnel_id.clone()));
        if me.config.fast_path {
            host_inner.router.set_fast_path(true);
        }
        host_inner.router.add_child(tunnel_id.clone(), me.router.clone());
        info!(tunnel_id = %tunnel_id, "Attached as tunnel child");

        if host_inner.session.lock().is_some() {
            host_inner.open_tunnel(&tunnel_id)?;
            let connect_id = host_inner.connect_id.read().clone().unwrap_or_default();
            me.tunnel_up(connect_id, &tunnel_id);
        }
        Ok(tunnel_id)
    }

    /// Tear down for good; a no-op the second time
    ///
    /// A host disposes its children first. A child closes its tunnel and
    /// leaves the host running.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let role = std::mem::replace(&mut *inner.role.write(), Role::Standalone);
        match role {
            Role::Host { children } => {
                for child in children {
                    child.dispose();
                }
            }
            Role::Child { host } => {
                if let (Some(host), Some(tunnel_id)) = (host.upgrade(), inner.router.tunnel_id()) {
                    let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed).to_string();
                    if let Err(e) = host.send_raw(&Envelope::close_tunnel(id, tunnel_id.clone())) {
                        debug!(error = %e, "closeTunnel not sent");
                    }
                    host.router.remove_child(&tunnel_id);
                    if let Role::Host { children } = &mut *host.role.write() {
                        children.retain(|c| !Arc::ptr_eq(&c.inner, inner));
                    }
                    host.emit(ConnectionEvent::TunnelClosed { tunnel_id });
                }
            }
            Role::Standalone => {}
        }

        let was_open = inner.state().is_open();
        if let Some(session) = inner.session.lock().take() {
            session.cancel.cancel();
        }
        inner.root.cancel();
        inner.router.set_pong_sender(None);
        inner.router.cancel_welcome();

        if was_open {
            inner.emit(ConnectionEvent::Disconnected {
                reason: DisconnectReason::Shutdown,
            });
            inner.hooks.invoke_disconnect(&DisconnectReason::Shutdown);
        }
        inner.set_state(ConnectionState::Disposed);
        info!("Connection disposed");
    }

    /// Route data frames to `handler`
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.router.set_handler(handler);
    }

    /// Move between the open states as subscriptions progress
    pub(crate) fn mark_state(&self, to: ConnectionState) {
        if self.inner.state().is_open() && to.is_open() {
            self.inner.set_state(to);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn market(&self) -> Market {
        self.inner.config.market
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Last measured ping round trip; a child reports its host's
    pub fn latency(&self) -> Option<Duration> {
        match self.host() {
            Some(host) => *host.latency.read(),
            None => *self.inner.latency.read(),
        }
    }

    /// `connectId` of the socket this connection uses
    pub fn connect_id(&self) -> Option<String> {
        match self.host() {
            Some(host) => host.connect_id.read().clone(),
            None => self.inner.connect_id.read().clone(),
        }
    }

    pub fn tunnel_id(&self) -> Option<String> {
        self.inner.router.tunnel_id()
    }

    /// Recent handler and protocol failures, oldest first
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.inner.router.errors().recent()
    }

    pub fn is_host(&self) -> bool {
        matches!(*self.inner.role.read(), Role::Host { .. })
    }

    pub fn is_child(&self) -> bool {
        matches!(*self.inner.role.read(), Role::Child { .. })
    }

    pub fn children_count(&self) -> usize {
        match &*self.inner.role.read() {
            Role::Host { children } => children.len(),
            _ => 0,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn host(&self) -> Option<Arc<Inner>> {
        match &*self.inner.role.read() {
            Role::Child { host } => host.upgrade(),
            _ => None,
        }
    }
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let mut state = self.state.write();
            if *state == to || *state == ConnectionState::Disposed {
                return;
            }
            std::mem::replace(&mut *state, to)
        };
        debug!(?from, ?to, "State changed");
        self.emit(ConnectionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn send_raw(&self, envelope: &Envelope) -> KucoinResult<()> {
        let json = envelope.to_json()?;
        let session = self.session.lock();
        let session = session.as_ref().ok_or(KucoinError::NotConnected)?;
        trace!(kind = envelope.kind.as_str(), "Queueing frame");
        session
            .writer
            .send(json)
            .map_err(|_| KucoinError::ChannelClosed)
    }

    fn open_tunnel(&self, tunnel_id: &str) -> KucoinResult<()> {
        let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed).to_string();
        self.send_raw(&Envelope::open_tunnel(id, tunnel_id))?;
        self.emit(ConnectionEvent::TunnelOpened {
            tunnel_id: tunnel_id.to_string(),
        });
        Ok(())
    }

    /// A child's tunnel is usable
    fn tunnel_up(&self, connect_id: String, tunnel_id: &str) {
        self.set_state(ConnectionState::Connected);
        let info = ConnectInfo {
            connect_id: connect_id.clone(),
            tunnel_id: Some(tunnel_id.to_string()),
        };
        self.emit(ConnectionEvent::Connected {
            connect_id,
            tunnel_id: info.tunnel_id.clone(),
        });
        self.hooks.invoke_connect(&info);
    }

    async fn token(&self) -> KucoinResult<BulletToken> {
        if let Some(token) = self.token.lock().clone() {
            return Ok(token);
        }
        let token = TokenEndpoints::new(self.rest.as_ref())
            .bullet(self.config.private)
            .await
            .map_err(|e| KucoinError::TokenRequest(e.to_string()))?;
        *self.token.lock() = Some(token.clone());
        Ok(token)
    }

    /// Interval and pong deadline for the pinger
    fn ping_schedule(&self) -> (Duration, Duration) {
        let (server_interval, server_timeout) = self
            .server_ping
            .read()
            .unwrap_or((DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT));
        let preferred = self
            .ping_override
            .read()
            .or(self.config.ping_interval)
            .unwrap_or(server_interval);
        (preferred.min(server_interval), server_timeout)
    }

    async fn establish(self: &Arc<Self>) -> KucoinResult<()> {
        self.set_state(ConnectionState::Connecting);

        let token = self.token().await?;
        let server = token
            .server()
            .map_err(|e| KucoinError::TokenRequest(e.to_string()))?
            .clone();
        *self.server_ping.write() = Some((server.ping_interval(), server.ping_timeout()));

        let connect_id = Uuid::new_v4().to_string();
        let url = format!(
            "{}?token={}&connectId={}",
            server.endpoint, token.token, connect_id
        );
        info!(endpoint = %server.endpoint, %connect_id, "Connecting");

        let pair = match self.connector.connect(&url, self.config.connect_timeout).await {
            Ok(pair) => pair,
            Err(e) => {
                // The token may be stale; ask for a new one next time
                self.token.lock().take();
                return Err(match e {
                    TransportError::Timeout(timeout) => KucoinError::ConnectionTimeout {
                        url: server.endpoint.clone(),
                        timeout,
                    },
                    other => KucoinError::ConnectionFailed {
                        url: server.endpoint.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.root.child_token();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(FrameQueue::default());

        self.router.set_pong_sender(Some(pong_tx));
        let welcome = self.router.expect_welcome();
        *self.session.lock() = Some(Session {
            generation,
            cancel: cancel.clone(),
            writer: writer_tx,
        });

        tokio::spawn(writer_task(pair.sink, writer_rx, cancel.clone()));
        tokio::spawn(receive_loop(
            Arc::downgrade(self),
            generation,
            pair.stream,
            queue.clone(),
            self.config.queue_warn_threshold,
            cancel.clone(),
        ));
        tokio::spawn(pump_loop(self.router.clone(), queue, cancel.clone()));
        tokio::spawn(pinger(Arc::downgrade(self), generation, pong_rx, cancel));

        match timeout(self.config.welcome_timeout, welcome).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.abandon(generation);
                return Err(KucoinError::ConnectionFailed {
                    url: server.endpoint,
                    reason: "connection closed before welcome".to_string(),
                });
            }
            Err(_) => {
                self.abandon(generation);
                self.token.lock().take();
                return Err(KucoinError::ConnectionTimeout {
                    url: server.endpoint,
                    timeout: self.config.welcome_timeout,
                });
            }
        }

        *self.connect_id.write() = Some(connect_id.clone());
        self.set_state(ConnectionState::Connected);
        let own_tunnel = self.router.tunnel_id();
        info!(%connect_id, "Connected");
        let info = ConnectInfo {
            connect_id: connect_id.clone(),
            tunnel_id: own_tunnel.clone(),
        };
        self.emit(ConnectionEvent::Connected {
            connect_id: connect_id.clone(),
            tunnel_id: own_tunnel.clone(),
        });
        self.hooks.invoke_connect(&info);

        let children = match &*self.role.read() {
            Role::Host { children } => children.clone(),
            _ => Vec::new(),
        };
        if let Some(id) = own_tunnel {
            self.open_tunnel(&id)?;
        }
        for child in children {
            if let Some(id) = child.tunnel_id() {
                self.open_tunnel(&id)?;
                child.inner.tunnel_up(connect_id.clone(), &id);
            }
        }
        Ok(())
    }

    /// Drop a session that never completed the handshake
    fn abandon(&self, generation: u64) {
        let mut session = self.session.lock();
        if session.as_ref().map(|s| s.generation) == Some(generation) {
            if let Some(s) = session.take() {
                s.cancel.cancel();
            }
        }
        drop(session);
        self.router.set_pong_sender(None);
    }

    /// The session `generation` died; later sessions are left alone
    fn connection_lost(&self, generation: u64, reason: DisconnectReason) {
        {
            let mut session = self.session.lock();
            match session.as_ref() {
                Some(s) if s.generation == generation => {}
                _ => return,
            }
            if let Some(s) = session.take() {
                s.cancel.cancel();
            }
        }
        self.router.set_pong_sender(None);
        self.router.cancel_welcome();

        let was_open = self.state().is_open();
        self.set_state(ConnectionState::Disconnected);
        if !was_open {
            return;
        }

        warn!(?reason, "Connection lost");
        self.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });
        self.hooks.invoke_disconnect(&reason);

        let children = match &*self.role.read() {
            Role::Host { children } => children.clone(),
            _ => Vec::new(),
        };
        for child in children {
            child.inner.host_lost();
        }
    }

    fn host_lost(&self) {
        if !self.state().is_open() {
            return;
        }
        self.set_state(ConnectionState::Disconnected);
        let reason = DisconnectReason::HostDisconnected;
        self.emit(ConnectionEvent::Disconnected {
            reason: reason.clone(),
        });
        self.hooks.invoke_disconnect(&reason);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn market_name(market: Market) -> &'static str {
    match market {
        Market::Spot => "spot",
        Market::Futures => "futures",
    }
}

// ============================================================================
// Session Tasks
// ============================================================================

async fn writer_task(
    mut sink: Box<dyn TransportSink>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "Send failed");
                        break;
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => {
                // Flush what was queued before the cancel
                while let Ok(message) = rx.try_recv() {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close failed");
    }
}

async fn receive_loop(
    conn: Weak<Inner>,
    generation: u64,
    mut stream: Box<dyn TransportStream>,
    queue: Arc<FrameQueue>,
    warn_threshold: usize,
    cancel: CancellationToken,
) {
    let mut framer = FrameExtractor::new();
    let mut backlogged = false;

    let reason = loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.recv() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                let mut frames = Vec::new();
                framer.feed(&bytes, |frame| frames.push(frame));
                if frames.is_empty() {
                    continue;
                }
                let pending = queue.push_all(frames);
                if pending >= warn_threshold && !backlogged {
                    warn!(pending, "Frame queue is backing up");
                    backlogged = true;
                } else if pending < warn_threshold / 2 {
                    backlogged = false;
                }
            }
            Ok(None) | Err(TransportError::ConnectionClosed) => {
                break DisconnectReason::ServerClosed;
            }
            Err(e) => break DisconnectReason::NetworkError(e.to_string()),
        }
    };

    if let Some(inner) = conn.upgrade() {
        inner.connection_lost(generation, reason);
    }
}

async fn pump_loop(router: Arc<MessageRouter>, queue: Arc<FrameQueue>, cancel: CancellationToken) {
    loop {
        let frames = queue.drain();
        if frames.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = queue.notify.notified() => continue,
            }
        }
        for frame in frames {
            router.route(&frame);
        }
    }
}

async fn pinger(
    conn: Weak<Inner>,
    generation: u64,
    mut pongs: mpsc::UnboundedReceiver<PongReceipt>,
    cancel: CancellationToken,
) {
    loop {
        let Some((interval, deadline)) = conn.upgrade().map(|inner| inner.ping_schedule()) else {
            return;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(interval) => {}
        }

        let id = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed).to_string();
        let sent_at = Instant::now();
        match conn.upgrade() {
            Some(inner) => {
                if inner.send_raw(&Envelope::ping(id.clone())).is_err() {
                    return;
                }
            }
            None => return,
        }

        let expiry = sleep(deadline);
        tokio::pin!(expiry);
        let answered = loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = &mut expiry => break None,
                pong = pongs.recv() => match pong {
                    Some(pong) if pong.id.as_deref() == Some(id.as_str()) => {
                        break Some(pong.received_at.saturating_duration_since(sent_at));
                    }
                    Some(_) => continue,
                    None => return,
                },
            }
        };

        let Some(inner) = conn.upgrade() else { return };
        match answered {
            Some(latency) => {
                trace!(?latency, "Pong");
                *inner.latency.write() = Some(latency);
                inner.hooks.invoke_pong(latency);
            }
            None => {
                warn!(?deadline, "No pong in time");
                inner.connection_lost(generation, DisconnectReason::PongTimeout);
                return;
            }
        }
    }
}
