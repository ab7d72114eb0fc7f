//! Test execution: the sender and receiver roles, the single-run controller
//! and the sweep orchestrator
//!
//! A run owns one sender task, a receiver task per receive link and one
//! statistics accumulator per receiver. The roles share nothing mutable except
//! those accumulators and a fault slot: the first transport error recorded
//! there cancels the run.

pub mod controller;
pub mod receiver;
pub mod sender;
pub mod sweep;

pub use controller::RunController;
pub use receiver::{FrameEvent, FrameSync};
pub use sweep::{
    ArtifactFilter, SweepOrchestrator, SweepPlan, SweepPlanPoint, SweepProgress, SweepProgressEvent,
    SweepReport,
};

use crate::clock::{Clock, ClockSource};
use crate::error::AppError;
use crate::logging::EngineLogger;
use crate::stats::RunStats;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine tuning for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub clock: ClockSource,
    /// Forward distance from the expected sequence accepted without resync
    pub sequence_window: u32,
    /// Cadence of the published live snapshot
    pub snapshot_interval: Duration,
    /// Minimum receiver drain after the sender's bound; never less than one write interval
    pub drain_grace: Duration,
    /// How long cancelled roles get before they are aborted
    pub stop_grace: Duration,
    pub read_timeout: Duration,
    pub latency_window: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        use crate::defaults;

        Self {
            clock: ClockSource::default(),
            sequence_window: defaults::SEQUENCE_WINDOW,
            snapshot_interval: defaults::SNAPSHOT_INTERVAL,
            drain_grace: defaults::DRAIN_GRACE,
            stop_grace: defaults::STOP_GRACE,
            read_timeout: defaults::READ_TIMEOUT,
            latency_window: defaults::LATENCY_WINDOW,
        }
    }
}

/// First error raised by either role; raising cancels the run
#[derive(Debug)]
pub(crate) struct RunFault {
    error: Mutex<Option<AppError>>,
    token: CancellationToken,
}

impl RunFault {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            error: Mutex::new(None),
            token,
        }
    }

    pub(crate) fn raise(&self, error: AppError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn get(&self) -> Option<AppError> {
        self.error.lock().clone()
    }
}

/// Everything a role needs, cheap to clone into a task
#[derive(Clone)]
pub(crate) struct RoleContext {
    pub run_id: Uuid,
    pub transport: Transport,
    pub stats: Arc<RunStats>,
    pub clock: Clock,
    pub logger: EngineLogger,
    pub fault: Arc<RunFault>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fault_wins_and_cancels() {
        let token = CancellationToken::new();
        let fault = RunFault::new(token.clone());
        assert!(fault.get().is_none());

        fault.raise(AppError::transport_write("first"));
        fault.raise(AppError::transport_read("second"));

        assert!(token.is_cancelled());
        assert_eq!(fault.get(), Some(AppError::transport_write("first")));
    }

    #[test]
    fn test_default_options() {
        let options = RunOptions::default();
        assert_eq!(options.sequence_window, 64);
        assert_eq!(options.snapshot_interval, Duration::from_millis(100));
        assert_eq!(options.drain_grace, Duration::from_millis(500));
    }
}
