//! Command-line interface

use crate::error::{AppError, Result};
use crate::models::Config;
use clap::Parser;
use std::path::PathBuf;

/// Link Rate Tester - measure throughput, loss, corruption and latency over a byte link
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "lrt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Send-side transport: loopback, tcp://host:port or a device path
    #[arg(short, long, value_name = "SPEC")]
    pub transport: Option<String>,

    /// Receive-side transports when they differ from the send side; a comma
    /// list runs one receiver per entry
    #[arg(long, value_name = "SPECS")]
    pub rx_transport: Option<String>,

    /// Receivers listening to one loopback sender
    #[arg(long, value_name = "N")]
    pub receivers: Option<usize>,

    /// Payload bytes per packet (the 12-byte header and 32-byte digest come on top)
    #[arg(short = 's', long, value_name = "BYTES")]
    pub packet_size: Option<usize>,

    /// Seconds between packet sends
    #[arg(short, long, value_name = "SECS", conflicts_with = "rate")]
    pub interval: Option<f64>,

    /// Target offered load in kbit/s; derives the write interval from the packet size
    #[arg(short, long, value_name = "KBPS")]
    pub rate: Option<f64>,

    /// Run for this many seconds
    #[arg(short, long, value_name = "SECS", conflicts_with = "count")]
    pub duration: Option<f64>,

    /// Send exactly this many packets
    #[arg(short, long, value_name = "N")]
    pub count: Option<u64>,

    /// Sweep packet sizes: "500,600,700" or "min:max:step"
    #[arg(long, value_name = "LIST")]
    pub sweep_sizes: Option<String>,

    /// Sweep write intervals in seconds: "0.1,0.2" or "min:max:step"
    #[arg(long, value_name = "LIST")]
    pub sweep_intervals: Option<String>,

    /// Which sweep axes to vary: packet-size, write-interval or both
    #[arg(long, value_name = "MODE")]
    pub vary: Option<String>,

    /// Runs per sweep point
    #[arg(long, value_name = "N")]
    pub repeats: Option<u32>,

    /// Packets per sweep point
    #[arg(long, value_name = "N", conflicts_with = "sweep_duration")]
    pub sweep_count: Option<u64>,

    /// Seconds per sweep point instead of a packet count
    #[arg(long, value_name = "SECS")]
    pub sweep_duration: Option<f64>,

    /// Pause between sweep points in milliseconds
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    /// Loss rate marking a sweep row as a harness artifact
    #[arg(long, value_name = "RATE", conflicts_with = "no_exclude")]
    pub exclude_loss_rate: Option<f64>,

    /// Keep every sweep row unmarked
    #[arg(long)]
    pub no_exclude: bool,

    /// Timestamp source: monotonic or wall
    #[arg(long, value_name = "SOURCE")]
    pub clock: Option<String>,

    /// Forward sequence distance accepted without resynchronizing (at most 256)
    #[arg(long, value_name = "N")]
    pub window: Option<u32>,

    /// Loopback: probability of losing a packet
    #[arg(long, value_name = "P")]
    pub loss: Option<f64>,

    /// Loopback: probability of flipping one byte of a packet
    #[arg(long, value_name = "P")]
    pub corrupt: Option<f64>,

    /// Loopback: byte offset within the frame that corruption flips
    #[arg(long, value_name = "OFFSET")]
    pub corrupt_offset: Option<usize>,

    /// Loopback: probability of removing one byte from a packet
    #[arg(long, value_name = "P")]
    pub drop_byte: Option<f64>,

    /// Loopback: one-way delay in milliseconds
    #[arg(long, value_name = "MS")]
    pub latency_ms: Option<u64>,

    /// Loopback: RNG seed for reproducible impairments
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Nominal link capacity in bit/s, used to warn about overload
    #[arg(long, value_name = "BPS")]
    pub link_rate: Option<u64>,

    /// Print live statistics while a single run is active
    #[arg(long)]
    pub live: bool,

    /// Print results as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Force colored output
    #[arg(long)]
    pub color: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Load settings from this file instead of ./.env
    #[arg(long, value_name = "PATH", env = "LRT_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Print an example .env file and exit
    #[arg(long)]
    pub env_example: bool,
}

impl Cli {
    /// Validate CLI arguments for conflicts clap cannot express
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.color && self.no_color {
            return Err("Cannot specify both --color and --no-color".to_string());
        }

        if self.live && (self.sweep_sizes.is_some() || self.sweep_intervals.is_some()) {
            return Err("--live applies to single runs, not sweeps".to_string());
        }

        let loopback_flags = self.loss.is_some()
            || self.corrupt.is_some()
            || self.corrupt_offset.is_some()
            || self.drop_byte.is_some()
            || self.latency_ms.is_some()
            || self.seed.is_some();
        if loopback_flags {
            if let Some(transport) = &self.transport {
                let spec = transport.trim().to_lowercase();
                if spec != "loopback" && spec != "loop" {
                    return Err("Impairment flags only apply to the loopback transport".to_string());
                }
            }
        }

        Ok(())
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        if self.color {
            true
        } else if self.no_color || self.json {
            false
        } else {
            supports_color()
        }
    }

    /// Apply command-line overrides on top of the environment-derived config
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(transport) = &self.transport {
            config.transport = transport.clone();
        }
        if let Some(rx) = &self.rx_transport {
            config.rx_transport = Some(rx.clone());
        }
        if let Some(receivers) = self.receivers {
            config.receivers = receivers;
        }
        if let Some(size) = self.packet_size {
            config.packet_size = size;
        }
        if let Some(interval) = self.interval {
            config.write_interval_secs = interval;
            config.target_rate_kbps = None;
        }
        if let Some(rate) = self.rate {
            config.target_rate_kbps = Some(rate);
        }
        if let Some(duration) = self.duration {
            config.test_duration_secs = Some(duration);
            config.packet_count = None;
        }
        if let Some(count) = self.count {
            config.packet_count = Some(count);
            config.test_duration_secs = None;
        }

        if let Some(sizes) = &self.sweep_sizes {
            config.sweep_sizes = Some(sizes.clone());
        }
        if let Some(intervals) = &self.sweep_intervals {
            config.sweep_intervals = Some(intervals.clone());
        }
        if let Some(vary) = &self.vary {
            config.vary = vary.parse()?;
        }
        if let Some(repeats) = self.repeats {
            config.repeats = repeats;
        }
        if let Some(count) = self.sweep_count {
            config.sweep_packet_count = count;
            config.sweep_duration_secs = None;
        }
        if let Some(duration) = self.sweep_duration {
            config.sweep_duration_secs = Some(duration);
        }
        if let Some(ms) = self.settle_ms {
            config.settle_delay_ms = ms;
        }
        if let Some(rate) = self.exclude_loss_rate {
            config.exclude_loss_rate = Some(rate);
        }
        if self.no_exclude {
            config.exclude_loss_rate = None;
        }

        if let Some(clock) = &self.clock {
            config.clock = clock.parse()?;
        }
        if let Some(window) = self.window {
            config.sequence_window = window;
        }

        if let Some(loss) = self.loss {
            config.loopback.loss_rate = loss;
        }
        if let Some(corrupt) = self.corrupt {
            config.loopback.corrupt_rate = corrupt;
        }
        if let Some(offset) = self.corrupt_offset {
            config.loopback.corrupt_offset = Some(offset);
        }
        if let Some(drop_byte) = self.drop_byte {
            config.loopback.drop_byte_rate = drop_byte;
        }
        if let Some(latency) = self.latency_ms {
            config.loopback.latency_ms = latency;
        }
        if let Some(seed) = self.seed {
            config.loopback.seed = Some(seed);
        }
        if let Some(link_rate) = self.link_rate {
            config.link_rate_bps = Some(link_rate);
        }

        config.enable_color = if self.color {
            true
        } else {
            config.enable_color && self.use_colors()
        };
        config.live = self.live;
        config.json = self.json;
        config.verbose = self.verbose;
        config.debug = self.debug;

        Ok(())
    }

    /// Short summary of what was requested, for --debug
    pub fn get_config_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("Command line:\n");
        if let Some(transport) = &self.transport {
            summary.push_str(&format!("  Transport: {}\n", transport));
        }
        if let Some(rx) = &self.rx_transport {
            summary.push_str(&format!("  Receive transports: {}\n", rx));
        }
        if let Some(receivers) = self.receivers {
            summary.push_str(&format!("  Receivers: {}\n", receivers));
        }
        if let Some(size) = self.packet_size {
            summary.push_str(&format!("  Packet size: {} bytes\n", size));
        }
        if let Some(interval) = self.interval {
            summary.push_str(&format!("  Write interval: {}s\n", interval));
        }
        if let Some(sizes) = &self.sweep_sizes {
            summary.push_str(&format!("  Sweep sizes: {}\n", sizes));
        }
        if let Some(intervals) = &self.sweep_intervals {
            summary.push_str(&format!("  Sweep intervals: {}\n", intervals));
        }
        summary.push_str(&format!("  Colored output: {}\n", self.use_colors()));
        summary.push_str(&format!("  Verbose mode: {}\n", self.verbose));

        summary
    }
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(unix)]
    {
        true
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Parse arguments from an explicit list, mapping clap errors into ours
pub fn parse_from<I, T>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| AppError::config(e.to_string()))
}
