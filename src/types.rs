//! Type definitions shared across the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Lifecycle state of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not started
    Idle,
    /// Sender and receiver are active
    Running,
    /// The sender reached its bound and the receiver drained
    Completed,
    /// Cancelled before the bound was reached
    Stopped,
    /// A transport error ended the run
    Failed,
}

impl RunState {
    /// Whether the run has reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sweep axes are varied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VaryMode {
    /// Every packet size at the first write interval
    PacketSize,
    /// Every write interval at the first packet size
    WriteInterval,
    /// Full cartesian product
    #[default]
    Both,
}

impl FromStr for VaryMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "packet-size" | "size" => Ok(Self::PacketSize),
            "write-interval" | "interval" | "write-freq" => Ok(Self::WriteInterval),
            "both" => Ok(Self::Both),
            other => Err(AppError::parse(format!(
                "Invalid vary mode '{}' (expected packet-size, write-interval or both)",
                other
            ))),
        }
    }
}

impl fmt::Display for VaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PacketSize => "packet-size",
            Self::WriteInterval => "write-interval",
            Self::Both => "both",
        };
        f.write_str(name)
    }
}
