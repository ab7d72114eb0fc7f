//! Environment variable handling and .env file management

use crate::clock::ClockSource;
use crate::error::{AppError, ErrorContext, Result};
use crate::transport::TransportSpec;
use crate::types::VaryMode;
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load `.env` from the working directory when present
    pub fn load_env_file(debug: bool) -> Result<()> {
        if Path::new(".env").exists() {
            Self::load_env_file_from(Path::new(".env"), debug)
        } else {
            if debug {
                eprintln!("No .env file found, using defaults and CLI arguments");
            }
            Ok(())
        }
    }

    /// Load an explicit env file; a missing file is an error
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        dotenv::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;

        if debug {
            eprintln!("Loaded configuration from {}", path.display());
        }
        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Link Rate Tester Configuration
#
# Values here are defaults; command-line arguments override them.

# Send-side transport: loopback, tcp://host:port or a serial device path
# LRT_TRANSPORT=loopback

# Receive-side transports when the link is split (e.g. one master radio and
# several slaves); each entry runs its own receiver
# LRT_RX_TRANSPORT=/dev/ttyUSB1,/dev/ttyUSB2

# Receivers fed by one loopback sender
# LRT_RECEIVERS=1

# Payload bytes per packet
# LRT_PACKET_SIZE=700

# Seconds between packet sends
# LRT_WRITE_INTERVAL=0.1

# Offered load in kbit/s; overrides LRT_WRITE_INTERVAL
# LRT_TARGET_RATE_KBPS=56

# Stop after this many seconds, or after this many packets
# LRT_DURATION=10
# LRT_COUNT=100

# Sweep axes: comma-separated lists or min:max:step ranges
# LRT_SWEEP_SIZES=500,600,700
# LRT_SWEEP_INTERVALS=0.1:0.5:0.1

# Which axes to vary: packet-size, write-interval or both
# LRT_VARY=both

# Runs per sweep point
# LRT_REPEATS=1

# Loss rate marking a sweep row as a harness artifact ("none" disables)
# LRT_EXCLUDE_LOSS_RATE=0.10

# Timestamp source: monotonic (same host) or wall (across hosts)
# LRT_CLOCK=monotonic

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Example: sweep a 56k radio link overnight
# LRT_TRANSPORT=/dev/ttyUSB0
# LRT_SWEEP_SIZES=100:1000:100
# LRT_SWEEP_INTERVALS=0.05,0.1,0.2,0.5
# LRT_REPEATS=3
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let invalid = |detail: String| AppError::config(format!("Invalid {} value '{}': {}", key, value, detail));

        match key {
            "LRT_TRANSPORT" => {
                TransportSpec::parse(value).map_err(|e| invalid(e.to_string()))?;
            }
            "LRT_RX_TRANSPORT" => {
                for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
                    TransportSpec::parse(part).map_err(|e| invalid(e.to_string()))?;
                }
            }
            "LRT_RECEIVERS" => {
                let receivers: usize = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if receivers == 0 || receivers > crate::defaults::MAX_RECEIVERS {
                    return Err(invalid(format!("must be between 1 and {}", crate::defaults::MAX_RECEIVERS)));
                }
            }
            "LRT_PACKET_SIZE" => {
                let size: usize = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if size == 0 {
                    return Err(invalid("must be at least 1".to_string()));
                }
            }
            "LRT_WRITE_INTERVAL" | "LRT_TARGET_RATE_KBPS" | "LRT_DURATION" => {
                let number: f64 = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if !(number.is_finite() && number > 0.0) {
                    return Err(invalid("must be a positive number".to_string()));
                }
            }
            "LRT_COUNT" | "LRT_REPEATS" => {
                let count: u64 = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                if count == 0 {
                    return Err(invalid("must be at least 1".to_string()));
                }
            }
            "LRT_SWEEP_SIZES" => {
                crate::executor::sweep::parse_packet_sizes(value).map_err(|e| invalid(e.to_string()))?;
            }
            "LRT_SWEEP_INTERVALS" => {
                crate::executor::sweep::parse_write_intervals(value).map_err(|e| invalid(e.to_string()))?;
            }
            "LRT_VARY" => {
                value.parse::<VaryMode>().map_err(|e| invalid(e.to_string()))?;
            }
            "LRT_EXCLUDE_LOSS_RATE" => {
                if !matches!(value.trim().to_lowercase().as_str(), "none" | "off") {
                    let rate: f64 = value.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
                    if !(0.0..=1.0).contains(&rate) {
                        return Err(invalid("must be between 0 and 1".to_string()));
                    }
                }
            }
            "LRT_CLOCK" => {
                value.parse::<ClockSource>().map_err(|e| invalid(e.to_string()))?;
            }
            "ENABLE_COLOR" => {
                value.trim().parse::<bool>().map_err(|e| invalid(format!("{}", e)))?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("LRT_TRANSPORT", "Send-side transport", "loopback"),
            ("LRT_RX_TRANSPORT", "Receive-side transports, one receiver each", "/dev/ttyUSB1,/dev/ttyUSB2"),
            ("LRT_RECEIVERS", "Receivers on the loopback link", "3"),
            ("LRT_PACKET_SIZE", "Payload bytes per packet", "700"),
            ("LRT_WRITE_INTERVAL", "Seconds between sends", "0.1"),
            ("LRT_TARGET_RATE_KBPS", "Offered load in kbit/s", "56"),
            ("LRT_DURATION", "Run length in seconds", "10"),
            ("LRT_COUNT", "Packets per run", "100"),
            ("LRT_SWEEP_SIZES", "Sweep packet sizes", "500,600,700"),
            ("LRT_SWEEP_INTERVALS", "Sweep write intervals", "0.1:0.5:0.1"),
            ("LRT_VARY", "Sweep axes to vary", "both"),
            ("LRT_REPEATS", "Runs per sweep point", "3"),
            ("LRT_EXCLUDE_LOSS_RATE", "Artifact loss rate, or none", "0.10"),
            ("LRT_CLOCK", "Timestamp source", "monotonic"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<22} {}\n", var, description));
            help.push_str(&format!("  {:<22} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        Self::get_supported_env_vars()
            .into_iter()
            .filter_map(|(name, _, _)| {
                let value = std::env::var(name).ok()?;
                Self::validate_env_var(name, &value).err().map(|e| format!("Warning: {}", e))
            })
            .collect()
    }

    /// Validate the lines of an env file without loading it
    pub fn check_env_content(content: &str) -> Vec<String> {
        let mut warnings = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => {
                    let value = value.trim().trim_matches('"');
                    if let Err(e) = Self::validate_env_var(key.trim(), value) {
                        warnings.push(format!("Line '{}': {}", line, e));
                    }
                }
                None => warnings.push(format!("Line '{}': expected KEY=VALUE", line)),
            }
        }

        warnings
    }
}
