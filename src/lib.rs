//! Link Rate Tester
//!
//! Measures throughput, packet loss, corruption and latency of a
//! point-to-point serial or serial-radio link. A sender writes framed test
//! packets at a fixed interval, a receiver recovers frame boundaries from the
//! raw byte stream, and both feed one statistics accumulator. Runs can be
//! repeated across a matrix of packet sizes and write intervals.

pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod output;
pub mod stats;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ClockSource};
pub use codec::{DecodeError, Packet};
pub use error::{AppError, Result};
pub use executor::{RunController, RunOptions, SweepOrchestrator, SweepPlan, SweepReport};
pub use models::{Config, RunResult, RunSnapshot, SweepPoint, TestConfiguration};
pub use output::{ColoredFormatter, OutputCoordinator, OutputFormatter, OutputFormatterFactory, PlainFormatter};
pub use stats::{LatencyWindow, StatsAggregator};
pub use transport::{ImpairmentConfig, Transport, TransportSpec};
pub use types::{RunState, VaryMode};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_TRANSPORT: &str = "loopback";
    pub const DEFAULT_PACKET_SIZE: usize = 700;
    pub const DEFAULT_WRITE_INTERVAL_SECS: f64 = 0.1;
    pub const DEFAULT_TEST_DURATION_SECS: f64 = 10.0;

    /// Accepted non-corrupt packets kept for latency summaries
    pub const LATENCY_WINDOW: usize = 1000;
    /// Cadence of the published live snapshot
    pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(100);
    /// Minimum time the receiver keeps draining after the sender's last packet
    pub const DRAIN_GRACE: Duration = Duration::from_millis(500);
    /// How long a cancelled role may take to exit before it is aborted
    pub const STOP_GRACE: Duration = Duration::from_secs(2);
    /// Receiver read timeout; on expiry the read loop simply polls again
    pub const READ_TIMEOUT: Duration = Duration::from_millis(50);
    pub const READ_CHUNK_SIZE: usize = 4096;
    /// Forward distance from the expected sequence still accepted without resync
    pub const SEQUENCE_WINDOW: u32 = 64;
    /// Receivers one loopback sender may feed
    pub const MAX_RECEIVERS: usize = 8;

    pub const DEFAULT_ARTIFACT_LOSS_RATE: f64 = 0.10;
    pub const ARTIFACT_TOLERANCE: f64 = 1e-9;
    pub const DEFAULT_REPEATS: u32 = 1;
    pub const SWEEP_PACKET_COUNT: u64 = 100;
    pub const SETTLE_DELAY: Duration = Duration::from_millis(200);
    pub const MAX_POINT_DURATION: Duration = Duration::from_secs(300);

    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
