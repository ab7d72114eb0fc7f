//! Advisory checks on top of `Config::validate`
//!
//! `Config::validate` rejects configurations that cannot run. The checks here
//! flag ones that will run but probably not measure what the user expects.

use crate::{
    clock::ClockSource,
    error::Result,
    models::{config::offered_load_kbps, Config},
};

/// Intervals below this are at the mercy of the timer resolution
const MIN_RELIABLE_INTERVAL_SECS: f64 = 0.001;

/// Sweeps estimated to run longer than this get a warning
const LONG_SWEEP_SECS: f64 = 3600.0;

const LARGE_SEQUENCE_WINDOW: u32 = 128;

/// Configuration validator with advisory rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Run `Config::validate`, then collect advisory warnings
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        config.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(Self::validate_offered_load(config)?);
        warnings.extend(Self::validate_transports(config)?);
        warnings.extend(Self::validate_engine_settings(config));
        if config.is_sweep() {
            warnings.extend(Self::validate_sweep(config)?);
        }

        Ok(warnings)
    }

    /// Offered load against the nominal link rate and timer resolution
    fn validate_offered_load(config: &Config) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();

        let points: Vec<(usize, f64)> = if config.is_sweep() {
            let plan = config.sweep_plan()?;
            plan.points()
                .iter()
                .map(|p| (p.packet_size, p.write_interval_secs))
                .collect()
        } else {
            let test = config.test_configuration()?;
            vec![(test.packet_size, test.write_interval_secs)]
        };

        if let Some(link_bps) = config.link_rate_bps {
            let link_kbps = link_bps as f64 / 1000.0;
            let overloaded = points
                .iter()
                .filter(|(size, interval)| offered_load_kbps(*size, *interval) > link_kbps)
                .count();
            if overloaded > 0 {
                let peak = points
                    .iter()
                    .map(|(size, interval)| offered_load_kbps(*size, *interval))
                    .fold(0.0, f64::max);
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!(
                        "{} of {} test point(s) offer more than the {:.1} kbit/s link rate (peak {:.1} kbit/s); expect queueing and loss",
                        overloaded,
                        points.len(),
                        link_kbps,
                        peak
                    ),
                ));
            }
        }

        if points.iter().any(|(_, interval)| *interval < MIN_RELIABLE_INTERVAL_SECS) {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                "Write intervals below 1ms are limited by timer resolution; the sender will fall behind schedule".to_string(),
            ));
        }

        Ok(warnings)
    }

    fn validate_transports(config: &Config) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();
        let tx = config.transport_spec()?;

        for rx in config.rx_transport_specs()? {
            if rx == tx {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!("Receive transport '{}' is the same as the send transport", rx),
                ));
            }
        }

        if !tx.is_loopback() && !config.loopback.is_clean() {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!("Loopback impairments are ignored on transport '{}'", tx),
            ));
        }

        if tx.is_loopback() && config.clock == ClockSource::Wall {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                "Wall clock timestamps are only needed when sender and receiver run on different hosts".to_string(),
            ));
        }

        if tx.is_loopback() && !config.loopback.is_clean() && config.loopback.seed.is_none() {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                "Loopback impairments without --seed are not reproducible".to_string(),
            ));
        }

        Ok(warnings)
    }

    fn validate_engine_settings(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.sequence_window > LARGE_SEQUENCE_WINDOW {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!(
                    "Sequence window of {} makes misaligned reads more likely to be accepted as packets",
                    config.sequence_window
                ),
            ));
        }

        if !config.is_sweep() {
            if let (Some(duration), Ok(test)) = (config.test_duration_secs, config.test_configuration()) {
                if duration < test.write_interval_secs {
                    warnings.push(ValidationWarning::new(
                        ValidationLevel::Warning,
                        format!(
                            "Test duration of {}s is shorter than the write interval; only one packet will be sent",
                            duration
                        ),
                    ));
                }
            }
        }

        warnings
    }

    fn validate_sweep(config: &Config) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();
        let plan = config.sweep_plan()?;
        let points = plan.points();

        let settle = config.settle_delay_ms as f64 / 1000.0;
        let estimate: f64 = points
            .iter()
            .map(|p| {
                let run = match (plan.packet_count, plan.test_duration_secs) {
                    (_, Some(duration)) => duration,
                    (Some(count), None) => count as f64 * p.write_interval_secs,
                    (None, None) => 0.0,
                };
                run.min(config.max_point_secs as f64) + settle
            })
            .sum();

        if estimate > LONG_SWEEP_SECS {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Sweep of {} point(s) will take about {:.0} minutes",
                    points.len(),
                    estimate / 60.0
                ),
            ));
        } else {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Sweep of {} point(s), estimated {:.0}s", points.len(), estimate),
            ));
        }

        if let (Some(rate), Some(count)) = (config.exclude_loss_rate, plan.packet_count) {
            let lost = rate * count as f64;
            if (lost - lost.round()).abs() > crate::defaults::ARTIFACT_TOLERANCE {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Info,
                    format!(
                        "A loss rate of exactly {} cannot occur with {} packets per point; no rows will be excluded",
                        rate, count
                    ),
                ));
            }
        }

        Ok(warnings)
    }
}

/// Validation warning levels
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Info,
    Warning,
    Error,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    /// Create a new validation warning
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        if use_color {
            use colored::Colorize;
            let tag = match self.level {
                ValidationLevel::Info => self.level.as_str().blue(),
                ValidationLevel::Warning => self.level.as_str().yellow(),
                ValidationLevel::Error => self.level.as_str().red(),
            };
            format!("[{}] {}", tag.bold(), self.message)
        } else {
            format!("[{}] {}", self.level.as_str(), self.message)
        }
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}
