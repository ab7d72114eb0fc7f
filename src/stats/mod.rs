//! Running statistics shared by the sender and receivers of one run
//!
//! Each receiver writes into its own accumulator behind a short-lived lock;
//! the sender's counts go to all of them. Readers take point-in-time
//! [`RunSnapshot`] copies; rates are derived at snapshot time, so the write
//! path only bumps counters.

pub mod window;

pub use window::LatencyWindow;

use crate::models::RunSnapshot;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of one frame the receiver accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketOutcome {
    pub sequence: u32,
    pub frame_len: usize,
    pub corrupt: bool,
    /// Present for non-corrupt packets only
    pub latency_ms: Option<f64>,
    /// The latency was negative and has been clamped to zero
    pub clock_skew: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    packets_sent: u64,
    packets_received: u64,
    packets_corrupt: u64,
    packets_missing: u64,
    bytes_sent: u64,
    bytes_received: u64,
    bytes_valid: u64,
    bytes_discarded: u64,
    resync_events: u64,
    resync_failures: u64,
    clock_skew_samples: u64,
    last_sequence: Option<u32>,
    sequence_closed: bool,
    latencies: LatencyWindow,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Accumulator {
    fn elapsed_secs(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let end = self.finished_at.unwrap_or_else(Instant::now);
                end.saturating_duration_since(start).as_secs_f64()
            }
            None => 0.0,
        }
    }

    fn snapshot(&self) -> RunSnapshot {
        let elapsed = self.elapsed_secs();
        let per_sec = |bytes: u64| if elapsed > 0.0 { bytes as f64 / elapsed } else { 0.0 };

        let loss_rate = if self.packets_sent > 0 {
            self.packets_sent.saturating_sub(self.packets_received) as f64 / self.packets_sent as f64
        } else {
            0.0
        };
        let corruption_rate = if self.packets_received > 0 {
            self.packets_corrupt as f64 / self.packets_received as f64
        } else {
            0.0
        };

        RunSnapshot {
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            packets_corrupt: self.packets_corrupt,
            packets_missing: self.packets_missing,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            bytes_valid: self.bytes_valid,
            bytes_discarded: self.bytes_discarded,
            resync_events: self.resync_events,
            resync_failures: self.resync_failures,
            clock_skew_samples: self.clock_skew_samples,
            latency_samples: self.latencies.len(),
            loss_rate,
            corruption_rate,
            speed_total: per_sec(self.bytes_received),
            speed_valid: per_sec(self.bytes_valid),
            send_rate: per_sec(self.bytes_sent),
            latency_avg_ms: self.latencies.average(),
            latency_min_ms: self.latencies.min(),
            latency_max_ms: self.latencies.max(),
            elapsed_secs: elapsed,
        }
    }
}

/// Concurrency-safe accumulator for one run
#[derive(Debug)]
pub struct StatsAggregator {
    inner: Mutex<Accumulator>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::with_latency_window(crate::defaults::LATENCY_WINDOW)
    }

    pub fn with_latency_window(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Accumulator {
                latencies: LatencyWindow::with_capacity(capacity),
                ..Default::default()
            }),
        }
    }

    /// Start the elapsed-time clock; later calls are ignored
    pub fn mark_started(&self) {
        let mut acc = self.inner.lock();
        if acc.started_at.is_none() {
            acc.started_at = Some(Instant::now());
        }
    }

    /// Freeze elapsed time; later calls are ignored
    pub fn mark_finished(&self) {
        let mut acc = self.inner.lock();
        if acc.started_at.is_some() && acc.finished_at.is_none() {
            acc.finished_at = Some(Instant::now());
        }
    }

    pub fn record_sent(&self, bytes: usize) {
        let mut acc = self.inner.lock();
        acc.packets_sent += 1;
        acc.bytes_sent += bytes as u64;
    }

    /// Count an accepted frame and infer loss from the gap since the previous one
    pub fn record_received(&self, outcome: PacketOutcome) {
        let mut acc = self.inner.lock();

        let gap = match acc.last_sequence {
            None => u64::from(outcome.sequence),
            Some(last) => u64::from(outcome.sequence.wrapping_sub(last).saturating_sub(1)),
        };
        acc.packets_missing += gap;
        acc.last_sequence = Some(outcome.sequence);

        acc.packets_received += 1;
        acc.bytes_received += outcome.frame_len as u64;

        if outcome.corrupt {
            acc.packets_corrupt += 1;
        } else {
            acc.bytes_valid += outcome.frame_len as u64;
            if let Some(latency) = outcome.latency_ms {
                acc.latencies.push(latency);
            }
        }

        if outcome.clock_skew {
            acc.clock_skew_samples += 1;
        }
    }

    /// Bytes skipped while searching for a frame boundary
    pub fn record_discarded(&self, bytes: usize) {
        self.inner.lock().bytes_discarded += bytes as u64;
    }

    pub fn record_resync(&self) {
        self.inner.lock().resync_events += 1;
    }

    /// The discard bound ran out and the buffer was dropped
    pub fn record_resync_failure(&self, dropped: usize) {
        let mut acc = self.inner.lock();
        acc.resync_failures += 1;
        acc.bytes_discarded += dropped as u64;
    }

    /// Count packets sent after the last accepted sequence as missing.
    ///
    /// Called once the receiver has stopped; later calls are ignored.
    pub fn close_sequence(&self) {
        let mut acc = self.inner.lock();
        if acc.sequence_closed {
            return;
        }
        acc.sequence_closed = true;

        let next_expected = match acc.last_sequence {
            Some(last) => u64::from(last) + 1,
            None => 0,
        };
        let trailing = acc.packets_sent.saturating_sub(next_expected);
        acc.packets_missing += trailing;
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// One accumulator per receiver of a run, all fed by the same sender
#[derive(Debug)]
pub struct RunStats {
    receivers: Vec<Arc<StatsAggregator>>,
}

impl RunStats {
    /// At least one receiver is always tracked
    pub fn new(receivers: usize, latency_window: usize) -> Self {
        Self {
            receivers: (0..receivers.max(1))
                .map(|_| Arc::new(StatsAggregator::with_latency_window(latency_window)))
                .collect(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn receiver(&self, index: usize) -> Option<Arc<StatsAggregator>> {
        self.receivers.get(index).cloned()
    }

    pub fn mark_started(&self) {
        self.receivers.iter().for_each(|r| r.mark_started());
    }

    pub fn mark_finished(&self) {
        self.receivers.iter().for_each(|r| r.mark_finished());
    }

    pub fn record_sent(&self, bytes: usize) {
        self.receivers.iter().for_each(|r| r.record_sent(bytes));
    }

    pub fn close_sequence(&self) {
        self.receivers.iter().for_each(|r| r.close_sequence());
    }

    /// Every receiver has accepted or written off every sent packet
    pub fn all_accounted(&self) -> bool {
        self.receivers.iter().all(|r| r.snapshot().all_accounted())
    }

    pub fn receiver_snapshots(&self) -> Vec<RunSnapshot> {
        self.receivers.iter().map(|r| r.snapshot()).collect()
    }

    /// Totals averaged over the receivers
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot::average(&self.receiver_snapshots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn accepted(sequence: u32, frame_len: usize) -> PacketOutcome {
        PacketOutcome {
            sequence,
            frame_len,
            corrupt: false,
            latency_ms: Some(5.0),
            clock_skew: false,
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = StatsAggregator::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot, RunSnapshot::default());
    }

    #[test]
    fn test_gap_inference_and_loss_rate() {
        let stats = StatsAggregator::new();
        for _ in 0..10 {
            stats.record_sent(744);
        }
        for seq in [0, 1, 2, 5, 6, 7, 8] {
            stats.record_received(accepted(seq, 744));
        }
        stats.close_sequence();

        let snapshot = stats.snapshot();
        // 3 and 4 are a gap, 9 never arrived
        assert_eq!(snapshot.packets_missing, 3);
        assert!((snapshot.loss_rate - 0.3).abs() < 1e-12);
        assert!(snapshot.all_accounted());
    }

    #[test]
    fn test_leading_gap_counts_as_missing() {
        let stats = StatsAggregator::new();
        stats.record_received(accepted(2, 100));
        assert_eq!(stats.snapshot().packets_missing, 2);
    }

    #[test]
    fn test_corrupt_packets_are_received_but_not_valid() {
        let stats = StatsAggregator::new();
        stats.record_sent(100);
        stats.record_sent(100);
        stats.record_received(accepted(0, 100));
        stats.record_received(PacketOutcome {
            sequence: 1,
            frame_len: 100,
            corrupt: true,
            latency_ms: None,
            clock_skew: false,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.packets_corrupt, 1);
        assert_eq!(snapshot.bytes_received, 200);
        assert_eq!(snapshot.bytes_valid, 100);
        assert_eq!(snapshot.corruption_rate, 0.5);
        assert_eq!(snapshot.loss_rate, 0.0);
        assert_eq!(snapshot.latency_samples, 1);
    }

    #[test]
    fn test_clock_skew_is_counted() {
        let stats = StatsAggregator::new();
        stats.record_received(PacketOutcome {
            latency_ms: Some(0.0),
            clock_skew: true,
            ..accepted(0, 64)
        });
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.clock_skew_samples, 1);
        assert_eq!(snapshot.latency_min_ms, Some(0.0));
    }

    #[test]
    fn test_resync_counters() {
        let stats = StatsAggregator::new();
        stats.record_discarded(3);
        stats.record_resync();
        stats.record_resync_failure(40);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_discarded, 43);
        assert_eq!(snapshot.resync_events, 1);
        assert_eq!(snapshot.resync_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rates_use_frozen_elapsed_time() {
        let stats = StatsAggregator::new();
        stats.mark_started();
        for seq in 0..10 {
            stats.record_sent(744);
            stats.record_received(accepted(seq, 744));
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        stats.mark_finished();
        tokio::time::advance(Duration::from_secs(5)).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.elapsed_secs, 1.0);
        assert_eq!(snapshot.speed_total, 7440.0);
        assert_eq!(snapshot.send_rate, 7440.0);
    }

    proptest! {
        #[test]
        fn prop_speed_ordering_holds(
            outcomes in proptest::collection::vec((any::<bool>(), 45usize..2048), 1..200),
            extra_sent in 0usize..20,
        ) {
            let stats = StatsAggregator::new();
            stats.mark_started();
            std::thread::sleep(Duration::from_millis(1));

            for (seq, (corrupt, len)) in outcomes.iter().enumerate() {
                stats.record_sent(*len);
                stats.record_received(PacketOutcome {
                    sequence: seq as u32,
                    frame_len: *len,
                    corrupt: *corrupt,
                    latency_ms: if *corrupt { None } else { Some(1.0) },
                    clock_skew: false,
                });
            }
            for _ in 0..extra_sent {
                stats.record_sent(2048);
            }
            stats.mark_finished();

            let snapshot = stats.snapshot();
            prop_assert!(snapshot.speed_valid <= snapshot.speed_total);
            prop_assert!(snapshot.bytes_received <= snapshot.bytes_sent);
            prop_assert!(snapshot.speed_total <= snapshot.send_rate);
            prop_assert!(snapshot.loss_rate >= 0.0 && snapshot.loss_rate <= 1.0);
        }
    }

    #[test]
    fn test_run_stats_average_over_receivers() {
        let stats = RunStats::new(2, 100);
        stats.mark_started();
        for _ in 0..10 {
            stats.record_sent(100);
        }

        let near = stats.receiver(0).unwrap();
        let far = stats.receiver(1).unwrap();
        for sequence in 0..10 {
            near.record_received(accepted(sequence, 100));
            if sequence % 2 == 0 {
                far.record_received(accepted(sequence, 100));
            }
        }
        stats.close_sequence();

        let receivers = stats.receiver_snapshots();
        assert_eq!(receivers[0].loss_rate, 0.0);
        assert_eq!(receivers[1].loss_rate, 0.5);

        let total = stats.snapshot();
        assert_eq!(total.packets_sent, 10);
        assert_eq!(total.packets_received, 8);
        assert_eq!(total.loss_rate, 0.25);
        assert_eq!(total.latency_samples, 8);
        assert!(stats.all_accounted());
        assert!(stats.receiver(2).is_none());
    }

    #[test]
    fn test_single_receiver_snapshot_is_unchanged() {
        let stats = RunStats::new(0, 100);
        assert_eq!(stats.receiver_count(), 1);
        stats.record_sent(50);
        stats.receiver(0).unwrap().record_received(accepted(0, 50));
        assert_eq!(stats.snapshot(), stats.receiver(0).unwrap().snapshot());
    }
}
