//! Connection and observation events

use kucoin_types::KucoinError;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Token request or socket handshake in progress
    Connecting,
    /// Welcome received
    Connected,
    /// At least one subscribe sent
    Subscribed,
    /// A snapshot is being fetched
    Initializing,
    /// A book is calibrated and live
    Running,
    /// Last subscription removed
    Unsubscribed,
    /// Terminal
    Disposed,
}

impl ConnectionState {
    /// States in which the socket is up
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::Subscribed
                | Self::Initializing
                | Self::Running
                | Self::Unsubscribed
        )
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server closed the connection
    ServerClosed,
    /// Network error occurred
    NetworkError(String),
    /// No pong within the server's ping timeout
    PongTimeout,
    /// The host this tunnel rides on went away
    HostDisconnected,
    /// Client disposed the connection
    Shutdown,
}

/// Connection lifecycle events
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Welcome received
    Connected {
        connect_id: String,
        tunnel_id: Option<String>,
    },
    /// `connect()` gave up
    ConnectFailed { error: KucoinError },
    /// Connection was lost
    Disconnected { reason: DisconnectReason },
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    TunnelOpened { tunnel_id: String },
    TunnelClosed { tunnel_id: String },
    /// Server sent `type: error`
    ServerError { code: String, message: String },
}

/// Calibration events for one symbol
#[derive(Debug, Clone)]
pub enum ObservationEvent {
    /// Book built from a snapshot
    Initialized { symbol: String, sequence: u64 },
    /// Buffered diffs replayed; the book is live
    Calibrated {
        symbol: String,
        sequence: u64,
        applied: usize,
        discarded: usize,
    },
    /// A diff skipped sequence numbers; the book is being rebuilt
    Desynchronized {
        symbol: String,
        expected: u64,
        received: u64,
    },
    /// Snapshot request failed; call `reset()` to retry
    SnapshotFailed { symbol: String, error: KucoinError },
    /// Buffers cleared after `reset()`
    Reset { symbol: String },
}

impl ObservationEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Initialized { symbol, .. }
            | Self::Calibrated { symbol, .. }
            | Self::Desynchronized { symbol, .. }
            | Self::SnapshotFailed { symbol, .. }
            | Self::Reset { symbol } => symbol,
        }
    }
}
