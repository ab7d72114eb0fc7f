//! Configuration data models: application settings and per-run test parameters

use crate::clock::ClockSource;
use crate::codec;
use crate::executor::receiver::MAX_SEQUENCE_WINDOW;
use crate::executor::{RunOptions, SweepPlan};
use crate::transport::{ImpairmentConfig, TransportSpec};
use crate::types::{AppError, Result, VaryMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What ends a run's sender
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopRule {
    /// Send while the next scheduled send falls before this much time
    Duration(Duration),
    /// Send exactly this many packets
    PacketCount(u64),
}

/// Parameters of one run.
///
/// `packet_size` is the payload length; each frame is 44 bytes longer.
/// Exactly one of `test_duration_secs` and `packet_count` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfiguration {
    pub packet_size: usize,
    pub write_interval_secs: f64,
    pub test_duration_secs: Option<f64>,
    pub packet_count: Option<u64>,
}

impl TestConfiguration {
    pub fn with_duration(packet_size: usize, write_interval_secs: f64, test_duration_secs: f64) -> Self {
        Self {
            packet_size,
            write_interval_secs,
            test_duration_secs: Some(test_duration_secs),
            packet_count: None,
        }
    }

    pub fn with_count(packet_size: usize, write_interval_secs: f64, packet_count: u64) -> Self {
        Self {
            packet_size,
            write_interval_secs,
            test_duration_secs: None,
            packet_count: Some(packet_count),
        }
    }

    /// Check the parameters and return the governing stop rule
    pub fn validate(&self) -> Result<StopRule> {
        if self.packet_size == 0 {
            return Err(AppError::invalid_configuration("packet size must be greater than 0"));
        }

        if !(self.write_interval_secs.is_finite() && self.write_interval_secs > 0.0) {
            return Err(AppError::invalid_configuration(format!(
                "write interval must be a positive number of seconds, got {}",
                self.write_interval_secs
            )));
        }

        match (self.test_duration_secs, self.packet_count) {
            (Some(_), Some(_)) => Err(AppError::invalid_configuration(
                "set either a test duration or a packet count, not both",
            )),
            (None, None) => Err(AppError::invalid_configuration(
                "no stopping bound: set a test duration or a packet count",
            )),
            (Some(secs), None) => {
                let duration = Duration::try_from_secs_f64(secs)
                    .ok()
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| {
                        AppError::invalid_configuration(format!(
                            "test duration must be a positive number of seconds, got {}",
                            secs
                        ))
                    })?;
                Ok(StopRule::Duration(duration))
            }
            (None, Some(0)) => Err(AppError::invalid_configuration("packet count must be greater than 0")),
            (None, Some(count)) if count > u64::from(u32::MAX) + 1 => Err(AppError::invalid_configuration(
                format!("packet count {} exceeds the 32-bit sequence space", count),
            )),
            (None, Some(count)) => Ok(StopRule::PacketCount(count)),
        }
    }

    /// Time between successive sends; zero for an invalid interval
    pub fn write_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.write_interval_secs).unwrap_or(Duration::ZERO)
    }

    /// Framed length of every packet in this run
    pub fn frame_len(&self) -> usize {
        codec::frame_len(self.packet_size)
    }

    /// Load the sender offers to the link, in kbps
    pub fn offered_load_kbps(&self) -> f64 {
        offered_load_kbps(self.packet_size, self.write_interval_secs)
    }

    /// Packets the sender will emit on an unloaded link
    pub fn expected_packets(&self) -> Option<u64> {
        match self.validate().ok()? {
            StopRule::PacketCount(count) => Some(count),
            StopRule::Duration(duration) => {
                let interval = self.write_interval_secs;
                // Sends happen at 0, i, 2i, ... while strictly before the duration
                Some((duration.as_secs_f64() / interval - 1e-9).ceil().max(0.0) as u64)
            }
        }
    }
}

/// Offered load for a packet size and write interval, in kbps
pub fn offered_load_kbps(packet_size: usize, write_interval_secs: f64) -> f64 {
    codec::frame_len(packet_size) as f64 * 8.0 / write_interval_secs / 1000.0
}

/// Write interval that offers `rate_kbps` with frames of `packet_size` payload bytes
pub fn interval_for_rate(packet_size: usize, rate_kbps: f64) -> Result<f64> {
    if !(rate_kbps.is_finite() && rate_kbps > 0.0) {
        return Err(AppError::invalid_configuration(format!(
            "target rate must be a positive number of kbps, got {}",
            rate_kbps
        )));
    }
    Ok(codec::frame_len(packet_size) as f64 * 8.0 / (rate_kbps * 1000.0))
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `loopback`, `tcp://host:port` or a device path
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Separate receive sides as a comma list, one receiver each; the send
    /// side is used for both when unset
    #[serde(default)]
    pub rx_transport: Option<String>,

    /// Receivers fed by the loopback link
    #[serde(default = "default_receivers")]
    pub receivers: usize,

    /// Payload bytes per packet
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    #[serde(default = "default_write_interval")]
    pub write_interval_secs: f64,

    /// Derive the write interval from a desired offered load
    #[serde(default)]
    pub target_rate_kbps: Option<f64>,

    #[serde(default = "default_test_duration")]
    pub test_duration_secs: Option<f64>,

    #[serde(default)]
    pub packet_count: Option<u64>,

    /// Comma list or `min:max:step`
    #[serde(default)]
    pub sweep_sizes: Option<String>,

    /// Comma list or `min:max:step`, in seconds
    #[serde(default)]
    pub sweep_intervals: Option<String>,

    #[serde(default)]
    pub vary: VaryMode,

    #[serde(default = "default_repeats")]
    pub repeats: u32,

    /// Packets sent at every sweep point unless a point duration is set
    #[serde(default = "default_sweep_packet_count")]
    pub sweep_packet_count: u64,

    #[serde(default)]
    pub sweep_duration_secs: Option<f64>,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_max_point_secs")]
    pub max_point_secs: u64,

    /// Loss rate flagged as a harness artifact in sweeps; `None` disables the rule
    #[serde(default = "default_exclude_loss_rate")]
    pub exclude_loss_rate: Option<f64>,

    #[serde(default)]
    pub clock: ClockSource,

    #[serde(default = "default_sequence_window")]
    pub sequence_window: u32,

    /// Impairments applied by the loopback transport
    #[serde(default)]
    pub loopback: ImpairmentConfig,

    /// Nominal link rate, used only for warnings
    #[serde(default)]
    pub link_rate_bps: Option<u64>,

    /// Print a snapshot line every 100 ms during a single run
    #[serde(default)]
    pub live: bool,

    /// Emit raw results as JSON
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            rx_transport: None,
            receivers: default_receivers(),
            packet_size: default_packet_size(),
            write_interval_secs: default_write_interval(),
            target_rate_kbps: None,
            test_duration_secs: default_test_duration(),
            packet_count: None,
            sweep_sizes: None,
            sweep_intervals: None,
            vary: VaryMode::default(),
            repeats: default_repeats(),
            sweep_packet_count: default_sweep_packet_count(),
            sweep_duration_secs: None,
            settle_delay_ms: default_settle_delay_ms(),
            max_point_secs: default_max_point_secs(),
            exclude_loss_rate: default_exclude_loss_rate(),
            clock: ClockSource::default(),
            sequence_window: default_sequence_window(),
            loopback: ImpairmentConfig::default(),
            link_rate_bps: None,
            live: false,
            json: false,
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this configuration describes a sweep rather than a single run
    pub fn is_sweep(&self) -> bool {
        self.sweep_sizes.is_some() || self.sweep_intervals.is_some()
    }

    /// Validate the configuration and return the first error
    pub fn validate(&self) -> Result<()> {
        let tx = self.transport_spec()?;
        self.rx_transport_specs()?;

        if self.receivers == 0 || self.receivers > crate::defaults::MAX_RECEIVERS {
            return Err(AppError::config(format!(
                "Receiver count must be between 1 and {}, got {}",
                crate::defaults::MAX_RECEIVERS,
                self.receivers
            )));
        }
        if self.receivers > 1 && !tx.is_loopback() {
            return Err(AppError::config(
                "Several receivers need the loopback transport; list real receive sides in --rx-transport",
            ));
        }

        self.test_configuration()?
            .validate()
            .map_err(|e| AppError::config(e.to_string()))?;

        if self.repeats == 0 {
            return Err(AppError::config("Repeat count must be at least 1"));
        }

        if self.sequence_window == 0 || self.sequence_window > MAX_SEQUENCE_WINDOW {
            return Err(AppError::config(format!(
                "Sequence window must be between 1 and {}, got {}",
                MAX_SEQUENCE_WINDOW, self.sequence_window
            )));
        }

        if let Some(rate) = self.exclude_loss_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(AppError::config(format!(
                    "Excluded loss rate must be between 0 and 1, got {}",
                    rate
                )));
            }
        }

        self.loopback.validate()?;

        if self.is_sweep() {
            self.sweep_plan()?;
        }

        Ok(())
    }

    /// Parse the send-side transport
    pub fn transport_spec(&self) -> Result<TransportSpec> {
        TransportSpec::parse(&self.transport)
    }

    /// Parse the receive-side transports, empty when the send side is shared
    pub fn rx_transport_specs(&self) -> Result<Vec<TransportSpec>> {
        let Some(list) = &self.rx_transport else {
            return Ok(Vec::new());
        };

        let specs = list
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(TransportSpec::parse)
            .collect::<Result<Vec<_>>>()?;
        if specs.len() > crate::defaults::MAX_RECEIVERS {
            return Err(AppError::config(format!(
                "At most {} receive transports are supported, got {}",
                crate::defaults::MAX_RECEIVERS,
                specs.len()
            )));
        }
        Ok(specs)
    }

    /// Impairments of each loopback receiver; every branch draws from its
    /// own seed so random faults differ between receivers
    pub fn loopback_branches(&self) -> Vec<ImpairmentConfig> {
        (0..self.receivers)
            .map(|index| ImpairmentConfig {
                seed: self.loopback.seed.map(|seed| seed.wrapping_add(index as u64)),
                ..self.loopback.clone()
            })
            .collect()
    }

    /// Test parameters for a single run
    pub fn test_configuration(&self) -> Result<TestConfiguration> {
        let write_interval_secs = match self.target_rate_kbps {
            Some(rate) => interval_for_rate(self.packet_size, rate).map_err(|e| AppError::config(e.to_string()))?,
            None => self.write_interval_secs,
        };

        Ok(TestConfiguration {
            packet_size: self.packet_size,
            write_interval_secs,
            test_duration_secs: self.test_duration_secs,
            packet_count: self.packet_count,
        })
    }

    /// Sweep plan when sweep axes are configured
    pub fn sweep_plan(&self) -> Result<SweepPlan> {
        let base = self.test_configuration()?;

        let packet_sizes = match &self.sweep_sizes {
            Some(spec) => crate::executor::sweep::parse_packet_sizes(spec)?,
            None => vec![base.packet_size],
        };
        let write_intervals = match &self.sweep_intervals {
            Some(spec) => crate::executor::sweep::parse_write_intervals(spec)?,
            None => vec![base.write_interval_secs],
        };

        let plan = SweepPlan {
            packet_sizes,
            write_intervals,
            repeats: self.repeats,
            vary: self.vary,
            packet_count: if self.sweep_duration_secs.is_some() { None } else { Some(self.sweep_packet_count) },
            test_duration_secs: self.sweep_duration_secs,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Engine tuning derived from this configuration
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            clock: self.clock,
            sequence_window: self.sequence_window,
            ..RunOptions::default()
        }
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(transport) = std::env::var("LRT_TRANSPORT") {
            self.transport = transport.trim().to_string();
        }

        if let Ok(rx) = std::env::var("LRT_RX_TRANSPORT") {
            let rx = rx.trim();
            self.rx_transport = if rx.is_empty() { None } else { Some(rx.to_string()) };
        }

        if let Ok(receivers) = std::env::var("LRT_RECEIVERS") {
            self.receivers = receivers.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_RECEIVERS value '{}': {}", receivers, e)))?;
        }

        if let Ok(size) = std::env::var("LRT_PACKET_SIZE") {
            self.packet_size = size.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_PACKET_SIZE value '{}': {}", size, e)))?;
        }

        if let Ok(interval) = std::env::var("LRT_WRITE_INTERVAL") {
            self.write_interval_secs = interval.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_WRITE_INTERVAL value '{}': {}", interval, e)))?;
        }

        if let Ok(rate) = std::env::var("LRT_TARGET_RATE_KBPS") {
            self.target_rate_kbps = Some(rate.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_TARGET_RATE_KBPS value '{}': {}", rate, e)))?);
        }

        // A count and a duration from the same layer would conflict, so each replaces the other
        if let Ok(duration) = std::env::var("LRT_DURATION") {
            self.test_duration_secs = Some(duration.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_DURATION value '{}': {}", duration, e)))?);
            self.packet_count = None;
        }

        if let Ok(count) = std::env::var("LRT_COUNT") {
            self.packet_count = Some(count.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_COUNT value '{}': {}", count, e)))?);
            self.test_duration_secs = None;
        }

        if let Ok(sizes) = std::env::var("LRT_SWEEP_SIZES") {
            self.sweep_sizes = Some(sizes.trim().to_string()).filter(|s| !s.is_empty());
        }

        if let Ok(intervals) = std::env::var("LRT_SWEEP_INTERVALS") {
            self.sweep_intervals = Some(intervals.trim().to_string()).filter(|s| !s.is_empty());
        }

        if let Ok(vary) = std::env::var("LRT_VARY") {
            self.vary = vary.parse()?;
        }

        if let Ok(repeats) = std::env::var("LRT_REPEATS") {
            self.repeats = repeats.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid LRT_REPEATS value '{}': {}", repeats, e)))?;
        }

        if let Ok(rate) = std::env::var("LRT_EXCLUDE_LOSS_RATE") {
            self.exclude_loss_rate = match rate.trim().to_lowercase().as_str() {
                "" | "none" | "off" => None,
                value => Some(value.parse()
                    .map_err(|e| AppError::config(format!("Invalid LRT_EXCLUDE_LOSS_RATE value '{}': {}", rate, e)))?),
            };
        }

        if let Ok(clock) = std::env::var("LRT_CLOCK") {
            self.clock = clock.parse()?;
        }

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = enable_color.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", enable_color, e)))?;
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_transport() -> String {
    crate::defaults::DEFAULT_TRANSPORT.to_string()
}

fn default_receivers() -> usize {
    1
}

fn default_packet_size() -> usize {
    crate::defaults::DEFAULT_PACKET_SIZE
}

fn default_write_interval() -> f64 {
    crate::defaults::DEFAULT_WRITE_INTERVAL_SECS
}

fn default_test_duration() -> Option<f64> {
    Some(crate::defaults::DEFAULT_TEST_DURATION_SECS)
}

fn default_repeats() -> u32 {
    crate::defaults::DEFAULT_REPEATS
}

fn default_sweep_packet_count() -> u64 {
    crate::defaults::SWEEP_PACKET_COUNT
}

fn default_settle_delay_ms() -> u64 {
    crate::defaults::SETTLE_DELAY.as_millis() as u64
}

fn default_max_point_secs() -> u64 {
    crate::defaults::MAX_POINT_DURATION.as_secs()
}

fn default_exclude_loss_rate() -> Option<f64> {
    Some(crate::defaults::DEFAULT_ARTIFACT_LOSS_RATE)
}

fn default_sequence_window() -> u32 {
    crate::defaults::SEQUENCE_WINDOW
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}
