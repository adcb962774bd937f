use std::{path::PathBuf, time::Duration};

/// Rotate the incremental log once it exceeds this many bytes.
pub const DEFAULT_ROTATE_THRESHOLD: u64 = 100_000_000;

/// A publisher pulses whenever this much time has passed at `serve`.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Directory entries older than this are purged after every batch.
pub const ENTRY_TTL_MINUTES: i64 = 3;

/// Payloads a publisher keeps from its peers before dropping the oldest.
pub const PUBLISHER_INBOX_LEN: usize = 128;

/// Data frames a subscriber buffers before dropping the oldest.
pub const SUBSCRIBER_BUFFER_LEN: usize = 512;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub bind_addr: String,
    pub bind_port: u16,
    pub log_dir: PathBuf,
    pub rotate_threshold_bytes: u64,
}

impl AggregatorConfig {
    pub fn new(bind_addr: impl Into<String>, bind_port: u16, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            bind_port,
            log_dir: log_dir.into(),
            rotate_threshold_bytes: DEFAULT_ROTATE_THRESHOLD,
        }
    }

    pub fn with_rotate_threshold(mut self, bytes: u64) -> Self {
        self.rotate_threshold_bytes = bytes;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Unique within the fabric; the directory indexes data by it.
    pub name: String,
    pub aggregator_addr: String,
    pub aggregator_port: u16,
    pub heartbeat_interval: Duration,
}

impl PublisherConfig {
    pub fn new(
        name: impl Into<String>,
        aggregator_addr: impl Into<String>,
        aggregator_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            aggregator_addr: aggregator_addr.into(),
            aggregator_port,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub aggregator_addr: String,
    pub aggregator_port: u16,
}

impl SubscriberConfig {
    pub fn new(aggregator_addr: impl Into<String>, aggregator_port: u16) -> Self {
        Self { aggregator_addr: aggregator_addr.into(), aggregator_port }
    }
}
