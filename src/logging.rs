//! Structured logging for the link rate tester
//!
//! Log lines always go to stderr so stdout stays reserved for results and
//! JSON exports. Every run gets its run id as correlation id, which ties the
//! sender, receiver and controller events of one run together.

use crate::error::AppError;
use colored::{ColoredString, Colorize};
use crate::models::{Config, RunResult, SweepPoint, TestConfiguration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    /// Minimum level for the chosen verbosity
    pub fn for_config(config: &Config) -> Self {
        if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        }
    }

    fn paint(&self, text: &str) -> ColoredString {
        match self {
            LogLevel::Trace => text.dimmed(),
            LogLevel::Debug => text.cyan(),
            LogLevel::Info => text.green(),
            LogLevel::Warn => text.yellow(),
            LogLevel::Error => text.red(),
            LogLevel::Fatal => text.magenta().bold(),
        }
    }
}

/// One structured log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Logger name/component
    pub logger: String,
    /// Run or sweep id tying related events together
    pub correlation_id: Option<String>,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// One JSON object per line
    Json,
    /// Compact single-line format
    Compact,
}

#[derive(Debug, Default)]
struct LogContext {
    session_id: Option<String>,
    current_correlation_id: Option<String>,
    context_fields: HashMap<String, serde_json::Value>,
}

/// Logger with console, JSON and compact output.
///
/// Clones share session context.
#[derive(Debug, Clone)]
pub struct Logger {
    enabled: bool,
    min_level: LogLevel,
    use_color: bool,
    format: LogFormat,
    name: String,
    context: Arc<RwLock<LogContext>>,
}

impl Logger {
    pub fn new(name: String) -> Self {
        Self {
            enabled: true,
            min_level: LogLevel::Info,
            use_color: true,
            format: LogFormat::Console,
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    /// A logger that writes nothing
    pub fn disabled(name: String) -> Self {
        Self {
            enabled: false,
            ..Self::new(name)
        }
    }

    /// Level and format follow `--debug` / `--verbose`; quiet runs only
    /// surface warnings, in the compact format
    pub fn with_config(name: String, config: &Config) -> Self {
        let format = match (config.debug, config.verbose) {
            (true, _) => LogFormat::Json,
            (false, true) => LogFormat::Console,
            (false, false) => LogFormat::Compact,
        };

        Self {
            min_level: LogLevel::for_config(config),
            use_color: config.enable_color,
            format,
            ..Self::new(name)
        }
    }

    pub fn set_color(&mut self, use_color: bool) {
        self.use_color = use_color;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same sinks and context under another component name
    pub fn named(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub async fn set_session_id(&self, session_id: String) {
        let mut context = self.context.write().await;
        context.session_id = Some(session_id);
    }

    /// Add a field to every subsequent entry
    pub async fn add_context_field<T: Serialize>(&self, key: String, value: T) {
        if let Ok(json_value) = serde_json::to_value(value) {
            let mut context = self.context.write().await;
            context.context_fields.insert(key, json_value);
        }
    }

    /// Start a correlated operation and return its id
    pub async fn start_operation(&self, operation_name: &str) -> String {
        let correlation_id = Uuid::new_v4().to_string();
        {
            let mut context = self.context.write().await;
            context.current_correlation_id = Some(correlation_id.clone());
        }

        self.debug(&format!("Started operation: {}", operation_name))
            .correlation_id(&correlation_id)
            .field("operation", operation_name)
            .log()
            .await;

        correlation_id
    }

    pub async fn end_operation(&self, correlation_id: &str, operation_name: &str, success: bool) {
        self.debug(&format!("Completed operation: {} (success: {})", operation_name, success))
            .correlation_id(correlation_id)
            .field("operation", operation_name)
            .field("success", success)
            .log()
            .await;

        let mut context = self.context.write().await;
        if context.current_correlation_id.as_deref() == Some(correlation_id) {
            context.current_correlation_id = None;
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message.to_string())
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    pub fn fatal(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Fatal, message)
    }

    pub fn would_log(&self, level: LogLevel) -> bool {
        self.enabled && level >= self.min_level
    }

    async fn write_entry(&self, mut entry: LogEntry) {
        if !self.would_log(entry.level) {
            return;
        }

        let context = self.context.read().await;
        if let Some(session_id) = &context.session_id {
            entry.fields.insert("session_id".to_string(), serde_json::Value::String(session_id.clone()));
        }
        if entry.correlation_id.is_none() {
            entry.correlation_id = context.current_correlation_id.clone();
        }
        for (key, value) in &context.context_fields {
            entry.fields.insert(key.clone(), value.clone());
        }
        drop(context);

        let output = self.format_entry(&entry);
        let _ = writeln!(io::stderr(), "{}", output);
    }

    fn format_entry(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Console => self.format_console(entry),
            LogFormat::Json => self.format_json(entry),
            LogFormat::Compact => self.format_compact(entry),
        }
    }

    fn format_console(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level_str = entry.level.as_str();

        let padded = format!("{:>5}", level_str);
        let formatted_level = if self.use_color {
            entry.level.paint(&padded).to_string()
        } else {
            padded
        };

        let mut output = format!("{} {} [{}] {}", timestamp, formatted_level, entry.logger, entry.message);

        if let Some(correlation_id) = &entry.correlation_id {
            let short = correlation_id.get(..8).unwrap_or(correlation_id);
            output.push_str(&format!(" [{}]", short));
        }

        if !entry.fields.is_empty() {
            let mut fields: Vec<String> = entry.fields.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            fields.sort();
            output.push_str(&format!(" {{{}}}", fields.join(", ")));
        }

        output
    }

    fn format_json(&self, entry: &LogEntry) -> String {
        match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(_) => format!("{{\"error\": \"Failed to serialize log entry\", \"message\": \"{}\"}}", entry.message),
        }
    }

    // Session id is noise on a one-line summary
    fn format_compact(&self, entry: &LogEntry) -> String {
        let initial = entry.level.as_str().chars().next().unwrap_or('?');
        let mut output = format!(
            "{} {} {}: {}",
            entry.timestamp.format("%H:%M:%S"),
            initial,
            entry.logger,
            entry.message
        );

        let mut fields: Vec<String> = entry
            .fields
            .iter()
            .filter(|(key, _)| key.as_str() != "session_id")
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        if !fields.is_empty() {
            fields.sort();
            output.push(' ');
            output.push_str(&fields.join(" "));
        }
        output
    }
}

/// Builder for one log entry
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: String) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                logger: logger.name.clone(),
                correlation_id: None,
                fields: HashMap::new(),
            },
        }
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), json_value);
        }
        self
    }

    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_fatal_to_run", error.is_fatal_to_run())
            .field("error_exit_code", error.exit_code())
    }

    pub async fn log(self) {
        self.logger.write_entry(self.entry).await;
    }
}

/// Engine events: run lifecycle, framing recovery and transport faults
#[derive(Debug, Clone)]
pub struct EngineLogger {
    logger: Logger,
}

impl EngineLogger {
    pub fn new(config: &Config) -> Self {
        Self {
            logger: Logger::with_config("ENGINE".to_string(), config),
        }
    }

    pub fn from_logger(logger: &Logger) -> Self {
        Self {
            logger: logger.named("ENGINE"),
        }
    }

    /// Drops every event
    pub fn disabled() -> Self {
        Self {
            logger: Logger::disabled("ENGINE".to_string()),
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn run_started(&self, run_id: &Uuid, config: &TestConfiguration, transport: &str) {
        self.logger.info("Run started")
            .correlation_id(&run_id.to_string())
            .field("packet_size", config.packet_size)
            .field("write_interval_secs", config.write_interval_secs)
            .field("test_duration_secs", config.test_duration_secs)
            .field("packet_count", config.packet_count)
            .field("offered_load_kbps", config.offered_load_kbps())
            .field("transport", transport)
            .log()
            .await;
    }

    pub async fn input_flushed(&self, run_id: &Uuid, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.logger.debug("Discarded stale input before run")
            .correlation_id(&run_id.to_string())
            .field("bytes", bytes)
            .log()
            .await;
    }

    pub async fn run_finished(&self, result: &RunResult) {
        let level = if result.is_success() { LogLevel::Info } else { LogLevel::Warn };
        let mut builder = self.logger.log(level, &format!("Run {}", result.state))
            .correlation_id(&result.run_id.to_string())
            .field("packets_sent", result.stats.packets_sent)
            .field("packets_received", result.stats.packets_received)
            .field("packets_corrupt", result.stats.packets_corrupt)
            .field("loss_rate", result.stats.loss_rate)
            .field("elapsed_secs", result.stats.elapsed_secs);
        if let Some(error) = &result.error {
            builder = builder.field("error", error);
        }
        builder.log().await;
    }

    pub async fn behind_schedule(&self, run_id: &Uuid, sequence: u32, lag_ms: f64) {
        self.logger.debug("Sender behind schedule")
            .correlation_id(&run_id.to_string())
            .field("sequence", sequence)
            .field("lag_ms", lag_ms)
            .log()
            .await;
    }

    pub async fn resynced(&self, run_id: &Uuid, skipped: usize) {
        self.logger.debug("Receiver resynchronized")
            .correlation_id(&run_id.to_string())
            .field("skipped_bytes", skipped)
            .log()
            .await;
    }

    pub async fn resync_failed(&self, run_id: &Uuid, dropped: usize) {
        self.logger.warn("Receiver could not find a frame boundary, buffer dropped")
            .correlation_id(&run_id.to_string())
            .field("dropped_bytes", dropped)
            .log()
            .await;
    }

    pub async fn transport_error(&self, run_id: &Uuid, role: &str, error: &AppError) {
        self.logger.error(&format!("Transport failure in {}", role))
            .correlation_id(&run_id.to_string())
            .field("role", role)
            .field("message", error.to_string())
            .error_info(error)
            .log()
            .await;
    }

    pub async fn role_aborted(&self, run_id: &Uuid, role: &str) {
        self.logger.warn(&format!("{} did not stop within the grace period", role))
            .correlation_id(&run_id.to_string())
            .field("role", role)
            .log()
            .await;
    }

    pub async fn sweep_point(&self, sweep_id: &Uuid, point: &SweepPoint, total: usize) {
        self.logger.info(&format!("Sweep point {}/{} {}", point.index + 1, total, point.result.state))
            .correlation_id(&sweep_id.to_string())
            .field("packet_size", point.packet_size)
            .field("write_interval_secs", point.write_interval_secs)
            .field("repeat", point.repeat)
            .field("loss_rate", point.result.stats.loss_rate)
            .field("excluded", point.excluded)
            .log()
            .await;
    }
}

/// Hands out loggers that share one session id
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn create_logger(&self, name: &str) -> Logger {
        let logger = Logger::with_config(name.to_string(), &self.config);
        logger.set_session_id(self.session_id.clone()).await;
        logger
    }

    pub async fn create_engine_logger(&self) -> EngineLogger {
        EngineLogger::from_logger(&self.create_logger("ENGINE").await)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunSnapshot;
    use crate::types::RunState;

    fn entry(correlation_id: Option<&str>) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "Run completed".to_string(),
            logger: "ENGINE".to_string(),
            correlation_id: correlation_id.map(String::from),
            fields: {
                let mut map = HashMap::new();
                map.insert("packets_sent".to_string(), serde_json::json!(100));
                map
            },
        }
    }

    #[test]
    fn test_level_follows_verbosity() {
        assert_eq!(LogLevel::for_config(&Config::default()), LogLevel::Warn);
        let verbose = Config {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(LogLevel::for_config(&verbose), LogLevel::Info);
        assert!(LogLevel::Trace < LogLevel::Fatal);
    }

    #[test]
    fn test_logger_with_config() {
        let config = Config {
            debug: true,
            enable_color: false,
            ..Default::default()
        };
        let logger = Logger::with_config("TEST".to_string(), &config);
        assert!(logger.would_log(LogLevel::Debug));
        assert!(!logger.would_log(LogLevel::Trace));
        assert_eq!(logger.format, LogFormat::Json);

        let quiet = Logger::with_config("TEST".to_string(), &Config::default());
        assert!(!quiet.would_log(LogLevel::Info));
        assert!(quiet.would_log(LogLevel::Warn));
        assert_eq!(quiet.format, LogFormat::Compact);
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let logger = Logger::disabled("TEST".to_string());
        assert!(!logger.would_log(LogLevel::Fatal));
    }

    #[test]
    fn test_console_format_shortens_correlation_id() {
        let mut logger = Logger::new("ENGINE".to_string());
        logger.set_color(false);

        let line = logger.format_console(&entry(Some("0123456789abcdef")));
        assert!(line.contains(" INFO [ENGINE] Run completed [01234567]"));
        assert!(line.contains("packets_sent=100"));

        // Short ids are printed whole
        assert!(logger.format_console(&entry(Some("run1"))).contains("[run1]"));
    }

    #[test]
    fn test_json_and_compact_formats() {
        let logger = Logger::new("ENGINE".to_string());
        let json = logger.format_json(&entry(None));
        let parsed: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.level, LogLevel::Info);
        assert_eq!(parsed.fields["packets_sent"], 100);

        let compact = logger.format_compact(&entry(None));
        assert!(compact.contains(" I ENGINE: Run completed packets_sent=100"));
    }

    #[tokio::test]
    async fn test_operation_correlation() {
        let logger = Logger::new("TEST".to_string());
        let correlation_id = logger.start_operation("sweep").await;
        assert_eq!(
            logger.context.read().await.current_correlation_id.as_deref(),
            Some(correlation_id.as_str())
        );

        logger.end_operation(&correlation_id, "sweep", true).await;
        assert!(logger.context.read().await.current_correlation_id.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_context() {
        let logger = Logger::new("TEST".to_string());
        let named = logger.named("OTHER");
        logger.add_context_field("transport".to_string(), "loopback").await;
        assert!(named.context.read().await.context_fields.contains_key("transport"));
        assert_eq!(named.name(), "OTHER");
    }

    #[tokio::test]
    async fn test_engine_events_do_not_panic() {
        let engine = EngineLogger::disabled();
        let run_id = Uuid::new_v4();
        let config = TestConfiguration::with_count(700, 0.1, 10);

        engine.run_started(&run_id, &config, "loopback").await;
        engine.resynced(&run_id, 3).await;
        engine.resync_failed(&run_id, 744).await;
        engine.transport_error(&run_id, "sender", &AppError::transport_write("gone")).await;
        engine.run_finished(&RunResult {
            run_id,
            config,
            state: RunState::Failed,
            stats: RunSnapshot::default(),
            started_at: None,
            completed_at: None,
            error: Some("gone".to_string()),
            receivers: Vec::new(),
        }).await;
    }

    #[tokio::test]
    async fn test_logger_factory_shares_session() {
        let factory = LoggerFactory::new(Config::default());
        let logger = factory.create_logger("CLI").await;
        assert_eq!(
            logger.context.read().await.session_id.as_deref(),
            Some(factory.session_id())
        );
    }
}
