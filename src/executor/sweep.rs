//! Sweep orchestration across a packet-size by write-interval matrix
//!
//! Points run strictly one after another, each with its own controller over
//! the same transport. Row order is packet size (outer), write interval
//! (inner), repeat (innermost). Once every point has run, rows matching the
//! artifact loss rate are marked excluded; they stay in the table.

use super::{RunController, RunOptions};
use crate::error::{AppError, Result};
use crate::logging::EngineLogger;
use crate::models::{RunResult, SweepPoint, TestConfiguration};
use crate::transport::Transport;
use crate::types::{RunState, VaryMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Slack for float ranges such as 0.1:0.5:0.1
const RANGE_EPSILON: f64 = 1e-9;

/// Packet sizes from `500,600,700` or `500:700:100`
pub fn parse_packet_sizes(spec: &str) -> Result<Vec<usize>> {
    let values = parse_axis(spec, "packet size")?;
    values
        .into_iter()
        .map(|value| {
            if value.fract() != 0.0 || value < 1.0 {
                Err(AppError::parse(format!(
                    "Packet sizes must be positive whole numbers, got {}",
                    value
                )))
            } else {
                Ok(value as usize)
            }
        })
        .collect()
}

/// Write intervals in seconds from `0.1,0.2` or `0.1:0.5:0.1`
pub fn parse_write_intervals(spec: &str) -> Result<Vec<f64>> {
    let values = parse_axis(spec, "write interval")?;
    if let Some(bad) = values.iter().find(|v| **v <= 0.0) {
        return Err(AppError::parse(format!("Write intervals must be positive, got {}", bad)));
    }
    Ok(values)
}

fn parse_axis(spec: &str, what: &str) -> Result<Vec<f64>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(AppError::parse(format!("Empty {} list", what)));
    }

    let number = |text: &str| -> Result<f64> {
        let value: f64 = text.trim().parse()
            .map_err(|_| AppError::parse(format!("Invalid {} '{}'", what, text.trim())))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(AppError::parse(format!("Invalid {} '{}'", what, text.trim())))
        }
    };

    if spec.contains(':') {
        let parts: Vec<&str> = spec.split(':').collect();
        if parts.len() != 3 {
            return Err(AppError::parse(format!(
                "A {} range must be min:max:step, got '{}'",
                what, spec
            )));
        }
        let (min, max, step) = (number(parts[0])?, number(parts[1])?, number(parts[2])?);
        if step <= 0.0 {
            return Err(AppError::parse(format!("The {} range step must be positive", what)));
        }
        if max < min {
            return Err(AppError::parse(format!("The {} range ends before it starts", what)));
        }

        let steps = ((max - min) / step + RANGE_EPSILON).floor() as usize;
        // Round away accumulated float error so 0.1:0.3:0.1 yields 0.3, not 0.30000000000000004
        return Ok((0..=steps)
            .map(|i| round_to(min + step * i as f64, 12))
            .collect());
    }

    spec.split(',').filter(|s| !s.trim().is_empty()).map(number).collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// The parameter matrix of a sweep and the stop rule applied at every point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub packet_sizes: Vec<usize>,
    pub write_intervals: Vec<f64>,
    pub repeats: u32,
    pub vary: VaryMode,
    pub packet_count: Option<u64>,
    pub test_duration_secs: Option<f64>,
}

/// One scheduled point of a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPlanPoint {
    pub index: usize,
    pub packet_size: usize,
    pub write_interval_secs: f64,
    pub repeat: u32,
}

impl SweepPlan {
    /// Full matrix, one repeat, the default per-point packet count
    pub fn new(packet_sizes: Vec<usize>, write_intervals: Vec<f64>) -> Self {
        Self {
            packet_sizes,
            write_intervals,
            repeats: crate::defaults::DEFAULT_REPEATS,
            vary: VaryMode::Both,
            packet_count: Some(crate::defaults::SWEEP_PACKET_COUNT),
            test_duration_secs: None,
        }
    }

    pub fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    pub fn with_vary(mut self, vary: VaryMode) -> Self {
        self.vary = vary;
        self
    }

    pub fn with_packet_count(mut self, count: u64) -> Self {
        self.packet_count = Some(count);
        self.test_duration_secs = None;
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.test_duration_secs = Some(secs);
        self.packet_count = None;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.packet_sizes.is_empty() || self.write_intervals.is_empty() {
            return Err(AppError::invalid_configuration("A sweep needs at least one packet size and one write interval"));
        }
        if self.repeats == 0 {
            return Err(AppError::invalid_configuration("A sweep needs at least one repeat"));
        }
        for point in self.points() {
            self.test_configuration(&point).validate()?;
        }
        Ok(())
    }

    /// Points in execution order
    pub fn points(&self) -> Vec<SweepPlanPoint> {
        let sizes: &[usize] = match self.vary {
            VaryMode::WriteInterval => &self.packet_sizes[..self.packet_sizes.len().min(1)],
            _ => &self.packet_sizes,
        };
        let intervals: &[f64] = match self.vary {
            VaryMode::PacketSize => &self.write_intervals[..self.write_intervals.len().min(1)],
            _ => &self.write_intervals,
        };

        let mut points = Vec::with_capacity(sizes.len() * intervals.len() * self.repeats as usize);
        for &packet_size in sizes {
            for &write_interval_secs in intervals {
                for repeat in 0..self.repeats {
                    points.push(SweepPlanPoint {
                        index: points.len(),
                        packet_size,
                        write_interval_secs,
                        repeat,
                    });
                }
            }
        }
        points
    }

    pub fn len(&self) -> usize {
        self.points().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn test_configuration(&self, point: &SweepPlanPoint) -> TestConfiguration {
        TestConfiguration {
            packet_size: point.packet_size,
            write_interval_secs: point.write_interval_secs,
            test_duration_secs: self.test_duration_secs,
            packet_count: self.packet_count,
        }
    }
}

/// Marks rows whose loss rate equals a known harness artifact value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArtifactFilter {
    /// `None` disables the rule
    pub loss_rate: Option<f64>,
    pub tolerance: f64,
}

impl Default for ArtifactFilter {
    fn default() -> Self {
        Self {
            loss_rate: Some(crate::defaults::DEFAULT_ARTIFACT_LOSS_RATE),
            tolerance: crate::defaults::ARTIFACT_TOLERANCE,
        }
    }
}

impl ArtifactFilter {
    pub fn disabled() -> Self {
        Self {
            loss_rate: None,
            ..Self::default()
        }
    }

    pub fn matches(&self, result: &RunResult) -> bool {
        match self.loss_rate {
            Some(rate) => {
                result.stats.packets_sent > 0 && (result.stats.loss_rate - rate).abs() <= self.tolerance
            }
            None => false,
        }
    }

    pub fn apply(&self, points: &mut [SweepPoint]) {
        for point in points.iter_mut() {
            if self.matches(&point.result) {
                point.excluded = true;
                point.exclusion_reason = Some(format!(
                    "loss rate of exactly {:.1}% is a known harness artifact",
                    point.result.stats.loss_percent()
                ));
            }
        }
    }
}

/// Progress notifications from a running sweep
#[derive(Debug, Clone)]
pub enum SweepProgressEvent {
    PointStarted {
        /// 1-based position
        current: usize,
        total: usize,
        packet_size: usize,
        write_interval_secs: f64,
        repeat: u32,
    },
    PointFinished {
        current: usize,
        total: usize,
        point: Box<SweepPoint>,
    },
    SweepCompleted {
        points_run: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Receives sweep progress; implemented for any matching closure
pub trait SweepProgress: Send + Sync {
    fn on_progress(&self, event: SweepProgressEvent);
}

impl<F> SweepProgress for F
where
    F: Fn(SweepProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: SweepProgressEvent) {
        self(event)
    }
}

/// Ordered table produced by one sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub points: Vec<SweepPoint>,
    /// Points that never ran because the sweep was cancelled
    pub skipped_points: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SweepReport {
    /// Rows not marked as artifacts
    pub fn included(&self) -> impl Iterator<Item = &SweepPoint> {
        self.points.iter().filter(|p| !p.excluded)
    }

    pub fn excluded_count(&self) -> usize {
        self.points.iter().filter(|p| p.excluded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.points.iter().filter(|p| p.result.state == RunState::Failed).count()
    }
}

/// Runs a [`SweepPlan`] point by point.
///
/// One orchestrator runs one sweep; once cancelled it stays cancelled.
pub struct SweepOrchestrator {
    options: RunOptions,
    settle_delay: Duration,
    max_point_duration: Duration,
    filter: ArtifactFilter,
    logger: EngineLogger,
    callback: Option<Arc<dyn SweepProgress>>,
    cancel: CancellationToken,
}

impl SweepOrchestrator {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            settle_delay: crate::defaults::SETTLE_DELAY,
            max_point_duration: crate::defaults::MAX_POINT_DURATION,
            filter: ArtifactFilter::default(),
            logger: EngineLogger::disabled(),
            callback: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_max_point_duration(mut self, limit: Duration) -> Self {
        self.max_point_duration = limit;
        self
    }

    pub fn with_filter(mut self, filter: ArtifactFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_logger(mut self, logger: EngineLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_callback<C: SweepProgress + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Cancelling stops the current point and skips the rest
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn notify(&self, event: SweepProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    pub async fn run(&self, plan: &SweepPlan, transport: &Transport) -> Result<SweepReport> {
        plan.validate()?;

        let sweep_id = Uuid::new_v4();
        let started_at = Utc::now();
        let scheduled = plan.points();
        let total = scheduled.len();
        let mut points = Vec::with_capacity(total);

        for planned in &scheduled {
            if self.cancel.is_cancelled() {
                break;
            }

            if planned.index > 0 && !self.settle_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settle_delay) => {}
                }
            }

            self.notify(SweepProgressEvent::PointStarted {
                current: planned.index + 1,
                total,
                packet_size: planned.packet_size,
                write_interval_secs: planned.write_interval_secs,
                repeat: planned.repeat,
            });

            let result = self.run_point(plan, planned, transport).await;
            let point = SweepPoint {
                index: planned.index,
                packet_size: planned.packet_size,
                write_interval_secs: planned.write_interval_secs,
                repeat: planned.repeat,
                result,
                excluded: false,
                exclusion_reason: None,
            };

            self.logger.sweep_point(&sweep_id, &point, total).await;
            self.notify(SweepProgressEvent::PointFinished {
                current: planned.index + 1,
                total,
                point: Box::new(point.clone()),
            });
            points.push(point);
        }

        self.filter.apply(&mut points);

        let cancelled = self.cancel.is_cancelled();
        self.notify(SweepProgressEvent::SweepCompleted {
            points_run: points.len(),
            total,
            cancelled,
        });

        Ok(SweepReport {
            sweep_id,
            skipped_points: total - points.len(),
            points,
            cancelled,
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn run_point(&self, plan: &SweepPlan, planned: &SweepPlanPoint, transport: &Transport) -> RunResult {
        let mut controller = RunController::with_parent(self.options, &self.cancel).with_logger(self.logger.clone());
        let config = plan.test_configuration(planned);

        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let token = controller.cancellation_token();
            let timed_out = Arc::clone(&timed_out);
            let limit = self.max_point_duration;
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                timed_out.store(true, Ordering::SeqCst);
                token.cancel();
            })
        };

        let outcome = controller.run(config, transport.clone()).await;
        watchdog.abort();

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let mut result = controller.result();
                result.state = RunState::Failed;
                result.error = Some(e.to_string());
                result
            }
        };

        if timed_out.load(Ordering::SeqCst) && result.state == RunState::Stopped {
            result.error = Some(format!(
                "point exceeded the maximum duration of {}s",
                self.max_point_duration.as_secs_f64()
            ));
        }
        result
    }
}
