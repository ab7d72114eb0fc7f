//! Run snapshots, final run results and sweep rows

use crate::models::config::TestConfiguration;
use crate::types::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time view of one run's counters and derived rates.
///
/// Rates are bytes per second; use the `_kbps` helpers for display.
/// `packets_received` includes corrupt packets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_corrupt: u64,
    /// Inferred from gaps between accepted sequence numbers
    pub packets_missing: u64,

    pub bytes_sent: u64,
    /// Every accepted frame, header included
    pub bytes_received: u64,
    /// Frames of non-corrupt packets only
    pub bytes_valid: u64,
    /// Bytes skipped while re-aligning on frame boundaries
    pub bytes_discarded: u64,

    pub resync_events: u64,
    pub resync_failures: u64,
    /// Latency samples clamped to zero because the send time was in the future
    pub clock_skew_samples: u64,
    pub latency_samples: usize,

    /// `(sent - received) / sent`
    pub loss_rate: f64,
    /// `corrupt / received`
    pub corruption_rate: f64,
    pub speed_total: f64,
    pub speed_valid: f64,
    pub send_rate: f64,

    pub latency_avg_ms: Option<f64>,
    pub latency_min_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,

    pub elapsed_secs: f64,
}

impl RunSnapshot {
    pub fn loss_percent(&self) -> f64 {
        self.loss_rate * 100.0
    }

    pub fn corruption_percent(&self) -> f64 {
        self.corruption_rate * 100.0
    }

    pub fn speed_total_kbps(&self) -> f64 {
        bytes_per_sec_to_kbps(self.speed_total)
    }

    pub fn speed_valid_kbps(&self) -> f64 {
        bytes_per_sec_to_kbps(self.speed_valid)
    }

    pub fn send_rate_kbps(&self) -> f64 {
        bytes_per_sec_to_kbps(self.send_rate)
    }

    /// Sent packets the receiver has either accepted or inferred as lost
    pub fn all_accounted(&self) -> bool {
        self.packets_received + self.packets_missing >= self.packets_sent
    }

    /// Mean of several receivers' views of the same run.
    ///
    /// Send-side fields come from the first snapshot. Receive counts are
    /// rounded means, rates are plain means, the latency average is weighted
    /// by sample count and the latency range spans every receiver.
    pub fn average(snapshots: &[RunSnapshot]) -> RunSnapshot {
        let Some(first) = snapshots.first() else {
            return RunSnapshot::default();
        };
        if snapshots.len() == 1 {
            return first.clone();
        }

        let mean = |field: fn(&RunSnapshot) -> f64| mean_of(snapshots, field);
        let count = |field: fn(&RunSnapshot) -> u64| mean_of(snapshots, |s| field(s) as f64).round() as u64;

        let samples: usize = snapshots.iter().map(|s| s.latency_samples).sum();
        let weighted: f64 = snapshots
            .iter()
            .filter_map(|s| s.latency_avg_ms.map(|avg| avg * s.latency_samples as f64))
            .sum();
        let latency_avg_ms = (samples > 0).then(|| weighted / samples as f64);
        let latency_min_ms = snapshots.iter().filter_map(|s| s.latency_min_ms).reduce(f64::min);
        let latency_max_ms = snapshots.iter().filter_map(|s| s.latency_max_ms).reduce(f64::max);

        RunSnapshot {
            packets_sent: first.packets_sent,
            packets_received: count(|s| s.packets_received),
            packets_corrupt: count(|s| s.packets_corrupt),
            packets_missing: count(|s| s.packets_missing),
            bytes_sent: first.bytes_sent,
            bytes_received: count(|s| s.bytes_received),
            bytes_valid: count(|s| s.bytes_valid),
            bytes_discarded: count(|s| s.bytes_discarded),
            resync_events: count(|s| s.resync_events),
            resync_failures: count(|s| s.resync_failures),
            clock_skew_samples: count(|s| s.clock_skew_samples),
            latency_samples: mean(|s| s.latency_samples as f64).round() as usize,
            loss_rate: mean(|s| s.loss_rate),
            corruption_rate: mean(|s| s.corruption_rate),
            speed_total: mean(|s| s.speed_total),
            speed_valid: mean(|s| s.speed_valid),
            send_rate: first.send_rate,
            latency_avg_ms,
            latency_min_ms,
            latency_max_ms,
            elapsed_secs: first.elapsed_secs,
        }
    }
}

fn mean_of(snapshots: &[RunSnapshot], field: impl Fn(&RunSnapshot) -> f64) -> f64 {
    snapshots.iter().map(field).sum::<f64>() / snapshots.len() as f64
}

/// Convert bytes per second to kilobits per second
pub fn bytes_per_sec_to_kbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1000.0
}

/// Final (or partial, after a failure) outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub config: TestConfiguration,
    pub state: RunState,
    #[serde(flatten)]
    pub stats: RunSnapshot,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the run failed or was cut short
    pub error: Option<String>,
    /// Per-receiver views when the run had more than one receiver; the
    /// flattened totals are their average
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<RunSnapshot>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }
}

/// One row of a sweep: the parameter pair, its repeat index and its result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepPoint {
    /// Position in execution order, starting at 0
    pub index: usize,
    pub packet_size: usize,
    pub write_interval_secs: f64,
    /// Starts at 0
    pub repeat: u32,
    pub result: RunResult,
    /// Marked by the artifact filter; excluded rows stay in the table
    pub excluded: bool,
    pub exclusion_reason: Option<String>,
}

impl SweepPoint {
    /// Identity of the point; repeats share it
    pub fn key(&self) -> (usize, u64) {
        (self.packet_size, self.write_interval_secs.to_bits())
    }
}
