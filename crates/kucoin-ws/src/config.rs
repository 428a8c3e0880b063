//! Connection and observation configuration

use kucoin_book::DEFAULT_PIECES;
use kucoin_types::Market;
use std::time::Duration;

/// Ping interval used until the server advertises its own
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(18);
/// Pong deadline used until the server advertises its own
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one websocket connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Spot or futures; decides REST host and tunnel compatibility
    pub market: Market,
    /// Request a private token; private feeds never attach to public hosts
    pub private: bool,
    /// Preferred ping interval, clamped to the server's advertised interval
    pub ping_interval: Option<Duration>,
    /// Socket connect timeout
    pub connect_timeout: Duration,
    /// How long to wait for the `welcome` frame after the socket opens
    pub welcome_timeout: Duration,
    /// Scan Level 3 diffs without a full deserialize
    pub fast_path: bool,
    /// Number of recent handler/protocol errors kept for diagnostics
    pub error_log_capacity: usize,
    /// Warn when this many frames are waiting for the pump
    pub queue_warn_threshold: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            market: Market::Spot,
            private: false,
            ping_interval: None,
            connect_timeout: Duration::from_secs(10),
            welcome_timeout: Duration::from_secs(10),
            fast_path: false,
            error_log_capacity: 64,
            queue_warn_threshold: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spot() -> Self {
        Self::default()
    }

    pub fn futures() -> Self {
        Self::default().with_market(Market::Futures)
    }

    pub fn with_market(mut self, market: Market) -> Self {
        self.market = market;
        self
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_welcome_timeout(mut self, timeout: Duration) -> Self {
        self.welcome_timeout = timeout;
        self
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    pub fn with_error_log_capacity(mut self, capacity: usize) -> Self {
        self.error_log_capacity = capacity;
        self
    }

    pub fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }
}

/// What a calibrated observation does when a diff skips sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Drop the book, buffer from the gapping diff and fetch a new snapshot
    #[default]
    Resync,
    /// Apply the diff anyway and log a warning
    Permissive,
}

/// Configuration for per-symbol calibration and live pushes
#[derive(Debug, Clone)]
pub struct ObservationConfig {
    /// Depth of the live book; 0 keeps every level
    pub pieces: usize,
    /// Time after the first buffered diff before the snapshot is fetched
    pub cycle: Duration,
    /// Minimum time between live book pushes
    pub update_interval: Duration,
    /// How often the observation loop wakes up
    pub push_tick: Duration,
    /// Bound on the snapshot request
    pub snapshot_timeout: Duration,
    pub gap_policy: GapPolicy,
    /// Broadcast buffer per distributor; slow observers lag past this
    pub channel_capacity: usize,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            pieces: DEFAULT_PIECES,
            cycle: Duration::from_millis(500),
            update_interval: Duration::from_millis(100),
            push_tick: Duration::from_millis(5),
            snapshot_timeout: Duration::from_secs(60),
            gap_policy: GapPolicy::Resync,
            channel_capacity: 1024,
        }
    }
}

impl ObservationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pieces(mut self, pieces: usize) -> Self {
        self.pieces = pieces;
        self
    }

    pub fn with_cycle(mut self, cycle: Duration) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_push_tick(mut self, tick: Duration) -> Self {
        self.push_tick = tick;
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config() {
        let config = ConnectionConfig::futures()
            .with_private(true)
            .with_ping_interval(Duration::from_secs(5))
            .with_fast_path(true);

        assert_eq!(config.market, Market::Futures);
        assert!(config.private);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(5)));
        assert!(config.fast_path);
    }

    #[test]
    fn test_observation_defaults() {
        let config = ObservationConfig::default();
        assert_eq!(config.pieces, 50);
        assert_eq!(config.cycle, Duration::from_millis(500));
        assert_eq!(config.push_tick, Duration::from_millis(5));
        assert_eq!(config.snapshot_timeout, Duration::from_secs(60));
        assert_eq!(config.gap_policy, GapPolicy::Resync);
    }

    #[test]
    fn test_channel_capacity_floor() {
        assert_eq!(ObservationConfig::new().with_channel_capacity(0).channel_capacity, 1);
    }
}
