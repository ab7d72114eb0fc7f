//! Error handling for the link rate tester

use thiserror::Error;

/// Custom error types for the link rate tester
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// A test configuration rejected before any role starts
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Writing to the transport failed; fatal to the current run
    #[error("Transport write error: {0}")]
    TransportWrite(String),

    /// Reading from the transport failed; fatal to the current run
    #[error("Transport read error: {0}")]
    TransportRead(String),

    /// Configuration loading errors (.env, environment, CLI)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening or preparing a transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Parsing errors (numbers, ranges, JSON)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// The operation was cancelled before it finished
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a new invalid test configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a new transport write error
    pub fn transport_write<S: Into<String>>(message: S) -> Self {
        Self::TransportWrite(message.into())
    }

    /// Create a new transport read error
    pub fn transport_read<S: Into<String>>(message: S) -> Self {
        Self::TransportRead(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport setup error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::Cancelled(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "INVALID_CONFIG",
            Self::TransportWrite(_) => "TRANSPORT_WRITE",
            Self::TransportRead(_) => "TRANSPORT_READ",
            Self::Config(_) => "CONFIG",
            Self::Transport(_) => "TRANSPORT",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::Cancelled(_) => "CANCELLED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error ends the run it occurred in.
    ///
    /// Transport I/O failures move a run to `Failed`. Configuration errors
    /// never reach a running test because they are rejected at start.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::TransportWrite(_) | Self::TransportRead(_) | Self::Io(_) | Self::Internal(_)
        )
    }

    /// Get user-friendly error message with suggestions
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::InvalidConfiguration(msg) => {
                format!("Test configuration rejected: {}\n\nSuggestion: packet size and write interval must be positive and exactly one of --duration / --count must be set.", msg)
            }
            Self::TransportWrite(msg) => {
                format!("Writing to the link failed: {}\n\nSuggestion: Check that the device is still connected and not opened by another program.", msg)
            }
            Self::TransportRead(msg) => {
                format!("Reading from the link failed: {}\n\nSuggestion: Check the cable or radio pairing, then run the test again.", msg)
            }
            Self::Config(msg) => {
                format!("Configuration problem: {}\n\nSuggestion: Check your .env file or command line arguments.", msg)
            }
            Self::Transport(msg) => {
                format!("Could not open the link: {}\n\nSuggestion: Use 'loopback', 'tcp://host:port' or a device path such as /dev/ttyUSB0.", msg)
            }
            Self::Io(msg) => {
                format!("File operation failed: {}\n\nSuggestion: Check file permissions and disk space.", msg)
            }
            Self::Parse(msg) => {
                format!("Failed to parse input: {}\n\nSuggestion: Lists are comma separated (500,600) and ranges use min:max:step.", msg)
            }
            Self::Cancelled(msg) => format!("Operation cancelled: {}", msg),
            Self::Internal(msg) => {
                format!("Internal error: {}\n\nThis is likely a bug. Please report this issue with the error details.", msg)
            }
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfiguration(_) | Self::Config(_) | Self::Parse(_) => 1,
            Self::Transport(_) => 2,
            Self::TransportWrite(_) | Self::TransportRead(_) => 3,
            Self::Io(_) => 5,
            Self::Cancelled(_) => 130,
            Self::Internal(_) => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::InvalidConfiguration(_) | Self::Config(_) | Self::Parse(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::Transport(_) | Self::TransportWrite(_) | Self::TransportRead(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Cancelled(_) => {
                    format!("[{}] {}", category.blue().bold(), message.blue())
                }
                Self::Io(_) => {
                    format!("[{}] {}", category.cyan().bold(), message.cyan())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

// Standard library error conversions
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON error: {}", error))
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::num::ParseFloatError> for AppError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::parse(format!("Float parse error: {}", error))
    }
}

impl From<std::str::ParseBoolError> for AppError {
    fn from(error: std::str::ParseBoolError) -> Self {
        Self::parse(format!("Boolean parse error: {}", error))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            Self::cancelled("task aborted")
        } else {
            Self::internal(format!("task panicked: {}", error))
        }
    }
}

// Anyhow integration
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

/// Custom Result type for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error, keeping its category
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error
    fn context(self, message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context = f();
            match e.into() {
                AppError::InvalidConfiguration(m) => AppError::InvalidConfiguration(format!("{}: {}", context, m)),
                AppError::TransportWrite(m) => AppError::TransportWrite(format!("{}: {}", context, m)),
                AppError::TransportRead(m) => AppError::TransportRead(format!("{}: {}", context, m)),
                AppError::Config(m) => AppError::Config(format!("{}: {}", context, m)),
                AppError::Transport(m) => AppError::Transport(format!("{}: {}", context, m)),
                AppError::Io(m) => AppError::Io(format!("{}: {}", context, m)),
                AppError::Parse(m) => AppError::Parse(format!("{}: {}", context, m)),
                AppError::Cancelled(m) => AppError::Cancelled(format!("{}: {}", context, m)),
                AppError::Internal(m) => AppError::Internal(format!("{}: {}", context, m)),
            }
        })
    }

    fn context(self, message: &'static str) -> Result<T> {
        self.with_context(|| message.to_string())
    }
}

/// Error reporter for user feedback on stderr
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    /// Create a new error reporter
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// Report an error to the user
    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", error.format_for_console(self.use_color));

        if self.verbose {
            eprintln!();
            eprintln!("{}", error.user_friendly_message());
        }
    }
}
