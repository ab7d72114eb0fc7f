//! Configuration assembly from defaults, env files, environment and CLI

use crate::{cli::Cli, config::env::EnvManager, error::Result, models::Config};

/// Configuration parser that combines CLI arguments with environment variables
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        self.load_env_file()?;
        if self.cli.debug {
            for warning in EnvManager::validate_current_env() {
                eprintln!("{}", warning);
            }
        }
        config.merge_from_env()?;
        self.cli.apply_to(&mut config)?;
        config.validate()?;

        if config.debug {
            eprintln!("{}", display_config_summary(&config));
        }

        Ok(config)
    }

    fn load_env_file(&self) -> Result<()> {
        match &self.cli.env_file {
            Some(path) => EnvManager::load_env_file_from(path, self.cli.debug),
            None => EnvManager::load_env_file(self.cli.debug),
        }
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let mut summary = Vec::new();

    summary.push(format!("Transport: {}", config.transport));
    if let Some(rx) = &config.rx_transport {
        summary.push(format!("Receive transports: {}", rx));
    }
    if config.receivers > 1 {
        summary.push(format!("Loopback receivers: {}", config.receivers));
    }
    summary.push(format!("Packet size: {} bytes", config.packet_size));
    match config.target_rate_kbps {
        Some(rate) => summary.push(format!("Target rate: {} kbit/s", rate)),
        None => summary.push(format!("Write interval: {}s", config.write_interval_secs)),
    }
    match (config.test_duration_secs, config.packet_count) {
        (_, Some(count)) => summary.push(format!("Stop after: {} packets", count)),
        (Some(duration), None) => summary.push(format!("Stop after: {}s", duration)),
        (None, None) => summary.push("Stop after: unset".to_string()),
    }
    if config.is_sweep() {
        summary.push(format!(
            "Sweep: sizes={} intervals={} vary={} repeats={}",
            config.sweep_sizes.as_deref().unwrap_or("-"),
            config.sweep_intervals.as_deref().unwrap_or("-"),
            config.vary,
            config.repeats
        ));
        summary.push(format!(
            "Excluded loss rate: {}",
            config
                .exclude_loss_rate
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string())
        ));
    }
    summary.push(format!("Clock: {}", config.clock));
    summary.push(format!("Sequence window: {}", config.sequence_window));
    summary.push(format!("Color Output: {}", config.enable_color));
    summary.push(format!("Verbose: {}", config.verbose));
    summary.push(format!("Debug: {}", config.debug));

    summary.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_cli_over_defaults() {
        let cli = Cli::parse_from(["lrt", "--transport", "loopback", "--packet-size", "128", "--count", "5"]);
        let config = ConfigParser::new(cli).parse().unwrap();

        assert_eq!(config.packet_size, 128);
        assert_eq!(config.packet_count, Some(5));
        assert!(config.test_duration_secs.is_none());
    }

    #[test]
    fn test_missing_explicit_env_file_is_an_error() {
        let cli = Cli::parse_from(["lrt", "--env-file", "/nonexistent/lrt.env"]);
        assert!(ConfigParser::new(cli).parse().is_err());
    }

    #[test]
    fn test_invalid_cli_values_fail_validation() {
        let cli = Cli::parse_from(["lrt", "--interval", "0"]);
        assert!(load_config(cli).is_err());
    }

    #[test]
    fn test_explicit_env_file_is_loaded() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "LRT_SWEEP_INTERVALS=0.125,0.25").unwrap();

        // Only this test sets LRT_SWEEP_INTERVALS
        let cli = Cli::parse_from(["lrt", "--env-file", file.path().to_str().unwrap(), "--sweep-count", "4"]);
        let config = ConfigParser::new(cli).parse().unwrap();
        std::env::remove_var("LRT_SWEEP_INTERVALS");

        assert_eq!(config.sweep_intervals.as_deref(), Some("0.125,0.25"));
        assert_eq!(config.sweep_plan().unwrap().write_intervals, vec![0.125, 0.25]);
    }

    #[test]
    fn test_config_summary() {
        let config = Config {
            sweep_sizes: Some("500,600".to_string()),
            ..Config::default()
        };
        let summary = display_config_summary(&config);

        assert!(summary.contains("Transport: loopback"));
        assert!(summary.contains("Packet size: 700 bytes"));
        assert!(summary.contains("Sweep: sizes=500,600"));
        assert!(summary.contains("Excluded loss rate: 0.1"));
    }
}
