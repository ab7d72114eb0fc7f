//! Data models and structures for the link rate tester

pub mod config;
pub mod metrics;

// Re-export main model types
pub use config::{Config, StopRule, TestConfiguration};
pub use metrics::{RunResult, RunSnapshot, SweepPoint};
