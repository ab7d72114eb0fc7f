//! Timestamp source for packet send times and receive-side latency
//!
//! Latency is the receiver's clock minus the timestamp the sender wrote into
//! the frame. That difference is only absolute when both ends read the same
//! clock. With [`ClockSource::Monotonic`] the sender and receiver must live in
//! one process and share one [`Clock`]. [`ClockSource::Wall`] uses seconds
//! since the Unix epoch so two hosts can compare timestamps, at the cost of
//! whatever offset exists between their system clocks.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Where timestamps come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// Seconds since the clock was created, from the tokio monotonic clock
    #[default]
    Monotonic,
    /// Seconds since the Unix epoch
    Wall,
}

impl FromStr for ClockSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "monotonic" | "mono" => Ok(Self::Monotonic),
            "wall" | "system" | "unix" => Ok(Self::Wall),
            other => Err(AppError::parse(format!(
                "Invalid clock source '{}' (expected monotonic or wall)",
                other
            ))),
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Monotonic => f.write_str("monotonic"),
            Self::Wall => f.write_str("wall"),
        }
    }
}

/// Shared clock read by both roles of a run
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    source: ClockSource,
    epoch: Instant,
}

impl Clock {
    pub fn new(source: ClockSource) -> Self {
        Self {
            source,
            epoch: Instant::now(),
        }
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    /// Current time in seconds as written into a frame header
    pub fn now_secs(&self) -> f64 {
        match self.source {
            ClockSource::Monotonic => self.epoch.elapsed().as_secs_f64(),
            ClockSource::Wall => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(ClockSource::default())
    }
}
