//! Single-run controller: lifecycle of one sender, its receivers and their
//! statistics
//!
//! `Idle -> Running -> {Completed, Stopped, Failed}`. Stopping is cooperative:
//! every role watches a cancellation token, gets a grace period to exit, and
//! is aborted after it. Partial statistics survive every outcome.

use super::{receiver, sender, RoleContext, RunFault, RunOptions};
use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::logging::EngineLogger;
use crate::models::{RunResult, RunSnapshot, StopRule, TestConfiguration};
use crate::stats::RunStats;
use crate::transport::Transport;
use crate::types::RunState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DRAIN_POLL: Duration = Duration::from_millis(10);

struct RunTasks {
    sender: JoinHandle<Result<()>>,
    receivers: Vec<JoinHandle<Result<()>>>,
    reporter: JoinHandle<()>,
    write_interval: Duration,
}

/// Owns one run from validation to its final result
pub struct RunController {
    run_id: Uuid,
    options: RunOptions,
    logger: EngineLogger,
    run_token: CancellationToken,
    receiver_token: CancellationToken,
    fault: Arc<RunFault>,
    stats: Arc<RunStats>,
    snapshots: Arc<watch::Sender<RunSnapshot>>,
    state: RunState,
    config: Option<TestConfiguration>,
    started_at: Option<DateTime<Utc>>,
    tasks: Option<RunTasks>,
    final_result: Option<RunResult>,
}

impl RunController {
    pub fn new(options: RunOptions) -> Self {
        Self::with_token(options, CancellationToken::new())
    }

    /// Controller whose run is also cancelled when `parent` is
    pub fn with_parent(options: RunOptions, parent: &CancellationToken) -> Self {
        Self::with_token(options, parent.child_token())
    }

    fn with_token(options: RunOptions, run_token: CancellationToken) -> Self {
        let (snapshots, _) = watch::channel(RunSnapshot::default());
        Self {
            run_id: Uuid::new_v4(),
            options,
            logger: EngineLogger::disabled(),
            receiver_token: run_token.child_token(),
            fault: Arc::new(RunFault::new(run_token.clone())),
            run_token,
            stats: Arc::new(RunStats::new(1, options.latency_window)),
            snapshots: Arc::new(snapshots),
            state: RunState::Idle,
            config: None,
            started_at: None,
            tasks: None,
            final_result: None,
        }
    }

    pub fn with_logger(mut self, logger: EngineLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Token that stops this run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.run_token.clone()
    }

    /// Live view, refreshed every snapshot interval while running
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current counters, read directly from the accumulators and averaged
    /// over receivers
    pub fn snapshot(&self) -> RunSnapshot {
        self.stats.snapshot()
    }

    /// Current counters of each receiver
    pub fn receiver_snapshots(&self) -> Vec<RunSnapshot> {
        self.stats.receiver_snapshots()
    }

    /// Validate, flush stale input and start both roles
    pub async fn start(&mut self, config: TestConfiguration, transport: Transport) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(AppError::internal(format!(
                "run {} cannot start from state {}",
                self.run_id, self.state
            )));
        }

        let stop = config.validate()?;
        self.config = Some(config.clone());
        self.started_at = Some(Utc::now());
        self.stats = Arc::new(RunStats::new(transport.receiver_count(), self.options.latency_window));

        match transport.drain_input().await {
            Ok(flushed) => self.logger.input_flushed(&self.run_id, flushed).await,
            Err(e) => {
                self.logger.transport_error(&self.run_id, "receiver", &e).await;
                self.fault.raise(e.clone());
                self.finalize();
                return Err(e);
            }
        }

        self.logger.run_started(&self.run_id, &config, transport.description()).await;

        let ctx = RoleContext {
            run_id: self.run_id,
            transport,
            stats: Arc::clone(&self.stats),
            clock: Clock::new(self.options.clock),
            logger: self.logger.clone(),
            fault: Arc::clone(&self.fault),
        };

        self.stats.mark_started();

        let receivers = (0..self.stats.receiver_count())
            .map(|index| {
                tokio::spawn(receiver::run(
                    ctx.clone(),
                    index,
                    config.packet_size,
                    self.options.sequence_window,
                    self.options.read_timeout,
                    self.receiver_token.clone(),
                ))
            })
            .collect();
        let write_interval = config.write_interval();
        let sender = tokio::spawn(sender::run(ctx, config, stop, self.run_token.clone()));
        let reporter = tokio::spawn(publish_snapshots(
            Arc::clone(&self.stats),
            Arc::clone(&self.snapshots),
            self.options.snapshot_interval,
            self.receiver_token.clone(),
        ));

        self.tasks = Some(RunTasks {
            sender,
            receivers,
            reporter,
            write_interval,
        });
        self.state = RunState::Running;
        Ok(())
    }

    /// Request a cooperative stop.
    ///
    /// A running run reports `Stopped` from here on; [`wait`](Self::wait)
    /// still collects the roles and may turn it into `Failed` if one of them
    /// raised a transport error first.
    pub fn stop(&mut self) {
        self.run_token.cancel();
        if self.state == RunState::Running {
            self.state = RunState::Stopped;
        }
    }

    /// Wait for the run to end and return its result.
    ///
    /// Calling again returns the same result.
    pub async fn wait(&mut self) -> RunResult {
        if let Some(result) = &self.final_result {
            return result.clone();
        }

        let Some(tasks) = self.tasks.take() else {
            return self.result();
        };
        let RunTasks {
            mut sender,
            receivers,
            reporter,
            write_interval,
        } = tasks;

        let sender_outcome = tokio::select! {
            biased;
            joined = &mut sender => Some(joined),
            _ = self.run_token.cancelled() => {
                match tokio::time::timeout(self.options.stop_grace, &mut sender).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        sender.abort();
                        self.logger.role_aborted(&self.run_id, "sender").await;
                        None
                    }
                }
            }
        };
        if let Some(Err(join_error)) = sender_outcome {
            self.fault.raise(AppError::from(join_error));
        }
        self.stats.mark_finished();

        if !self.run_token.is_cancelled() {
            self.drain(write_interval).await;
        }

        self.receiver_token.cancel();
        for receiver in receivers {
            self.join_receiver(receiver).await;
        }
        join_reporter(reporter, &self.fault).await;

        self.stats.close_sequence();
        self.finalize();

        let result = self.result();
        self.logger.run_finished(&result).await;
        result
    }

    /// Start and wait in one call
    pub async fn run(&mut self, config: TestConfiguration, transport: Transport) -> Result<RunResult> {
        self.start(config, transport).await?;
        Ok(self.wait().await)
    }

    /// Current result: final once the run has ended, partial before that
    pub fn result(&self) -> RunResult {
        if let Some(result) = &self.final_result {
            return result.clone();
        }

        RunResult {
            run_id: self.run_id,
            config: self.config.clone().unwrap_or(TestConfiguration {
                packet_size: 0,
                write_interval_secs: 0.0,
                test_duration_secs: None,
                packet_count: None,
            }),
            state: self.state,
            stats: self.stats.snapshot(),
            started_at: self.started_at,
            completed_at: None,
            error: self.fault.get().map(|e| e.to_string()),
            receivers: self.per_receiver(),
        }
    }

    // Keep reading until every sent packet is accounted for or the grace runs out
    async fn drain(&self, write_interval: Duration) {
        let grace = self.options.drain_grace.max(write_interval);
        let deadline = Instant::now() + grace;

        while Instant::now() < deadline {
            if self.stats.all_accounted() {
                return;
            }
            tokio::select! {
                biased;
                _ = self.run_token.cancelled() => return,
                _ = tokio::time::sleep(DRAIN_POLL) => {}
            }
        }
    }

    async fn join_receiver(&self, mut receiver: JoinHandle<Result<()>>) {
        match tokio::time::timeout(self.options.stop_grace, &mut receiver).await {
            Ok(Ok(_)) => {}
            Ok(Err(join_error)) => self.fault.raise(AppError::from(join_error)),
            Err(_) => {
                receiver.abort();
                self.logger.role_aborted(&self.run_id, "receiver").await;
            }
        }
    }

    fn finalize(&mut self) {
        self.stats.mark_finished();

        self.state = if self.fault.get().is_some() {
            RunState::Failed
        } else if self.run_token.is_cancelled() {
            RunState::Stopped
        } else {
            RunState::Completed
        };

        let snapshot = self.stats.snapshot();
        self.snapshots.send_replace(snapshot.clone());

        let mut result = self.result();
        result.state = self.state;
        result.stats = snapshot;
        result.completed_at = Some(Utc::now());
        self.final_result = Some(result);
    }

    fn per_receiver(&self) -> Vec<RunSnapshot> {
        if self.stats.receiver_count() > 1 {
            self.stats.receiver_snapshots()
        } else {
            Vec::new()
        }
    }
}

/// A publisher that panicked or was aborted fails the run
async fn join_reporter(reporter: JoinHandle<()>, fault: &RunFault) {
    if let Err(join_error) = reporter.await {
        fault.raise(AppError::from(join_error));
    }
}

async fn publish_snapshots(
    stats: Arc<RunStats>,
    snapshots: Arc<watch::Sender<RunSnapshot>>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                snapshots.send_replace(stats.snapshot());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ImpairmentConfig;

    #[tokio::test(start_paused = true)]
    async fn test_rejects_invalid_configuration_before_start() {
        let mut controller = RunController::new(RunOptions::default());
        let config = TestConfiguration::with_count(0, 0.1, 10);

        let err = controller
            .start(config, Transport::loopback(ImpairmentConfig::default()))
            .await
            .unwrap_err();

        assert_eq!(err.category(), "INVALID_CONFIG");
        assert_eq!(controller.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_run_completes() {
        let mut controller = RunController::new(RunOptions::default());
        let result = controller
            .run(
                TestConfiguration::with_count(100, 0.05, 20),
                Transport::loopback(ImpairmentConfig::default()),
            )
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.stats.packets_sent, 20);
        assert_eq!(result.stats.packets_received, 20);
        // Count runs wait out the final interval
        assert!((result.stats.elapsed_secs - 1.0).abs() < 1e-9);
        assert!(result.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_yields_stopped_with_partial_stats() {
        let mut controller = RunController::new(RunOptions::default());
        controller
            .start(
                TestConfiguration::with_duration(100, 0.1, 60.0),
                Transport::loopback(ImpairmentConfig::default()),
            )
            .await
            .unwrap();

        let token = controller.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1050)).await;
            token.cancel();
        });

        let result = controller.wait().await;
        assert_eq!(result.state, RunState::Stopped);
        assert_eq!(result.stats.packets_sent, 11);
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_stopped_before_wait() {
        let mut controller = RunController::new(RunOptions::default());
        controller
            .start(
                TestConfiguration::with_duration(100, 0.1, 60.0),
                Transport::loopback(ImpairmentConfig::default()),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        controller.stop();
        assert_eq!(controller.state(), RunState::Stopped);
        assert_eq!(controller.result().state, RunState::Stopped);

        let result = controller.wait().await;
        assert_eq!(result.state, RunState::Stopped);
        assert!((4..=5).contains(&result.stats.packets_sent), "{:?}", result.stats);
    }

    #[tokio::test]
    async fn test_panicked_reporter_fails_the_run() {
        let token = CancellationToken::new();
        let fault = RunFault::new(token.clone());
        let reporter = tokio::spawn(async { panic!("snapshot publisher crashed") });

        join_reporter(reporter, &fault).await;
        assert!(fault.get().is_some());
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_receiver_reports_its_own_view() {
        let mut controller = RunController::new(RunOptions::default());
        let transport = Transport::loopback_fanout(vec![
            ImpairmentConfig::default(),
            ImpairmentConfig {
                drop_writes: vec![2, 5],
                ..Default::default()
            },
        ]);

        let result = controller
            .run(TestConfiguration::with_count(100, 0.05, 10), transport)
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(result.receivers.len(), 2);
        assert_eq!(result.receivers[0].packets_received, 10);
        assert_eq!(result.receivers[1].packets_received, 8);
        assert_eq!(result.receivers[1].packets_missing, 2);
        assert!((result.stats.loss_rate - 0.1).abs() < 1e-12);
        assert_eq!(result.stats.packets_received, 9);
        assert_eq!(controller.receiver_snapshots(), result.receivers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_fails_run_and_result_is_idempotent() {
        let mut controller = RunController::new(RunOptions::default());
        let transport = Transport::loopback(ImpairmentConfig {
            fail_writes_from: Some(5),
            ..Default::default()
        });

        let first = controller
            .run(TestConfiguration::with_count(100, 0.1, 50), transport)
            .await
            .unwrap();

        assert_eq!(first.state, RunState::Failed);
        assert_eq!(first.stats.packets_sent, 5);
        assert!(first.error.as_deref().unwrap_or("").contains("loopback write 5 rejected"));

        let second = controller.wait().await;
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.stats, first.stats);
        assert_eq!(controller.result().state, RunState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cannot_start_twice() {
        let mut controller = RunController::new(RunOptions::default());
        let transport = Transport::loopback(ImpairmentConfig::default());
        controller
            .run(TestConfiguration::with_count(10, 0.01, 3), transport.clone())
            .await
            .unwrap();

        let err = controller
            .start(TestConfiguration::with_count(10, 0.01, 3), transport)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "INTERNAL");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_snapshots_are_published() {
        let mut controller = RunController::new(RunOptions::default());
        let mut live = controller.subscribe();
        controller
            .start(
                TestConfiguration::with_duration(100, 0.1, 1.0),
                Transport::loopback(ImpairmentConfig::default()),
            )
            .await
            .unwrap();

        live.changed().await.unwrap();
        let result = controller.wait().await;
        assert_eq!(*live.borrow(), result.stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_run() {
        let parent = CancellationToken::new();
        let mut controller = RunController::with_parent(RunOptions::default(), &parent);
        controller
            .start(
                TestConfiguration::with_count(100, 0.1, 1000),
                Transport::loopback(ImpairmentConfig::default()),
            )
            .await
            .unwrap();

        parent.cancel();
        assert_eq!(controller.wait().await.state, RunState::Stopped);
    }
}
