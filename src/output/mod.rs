//! Output formatting and display system
//!
//! Human-readable output goes through an [`OutputFormatter`]; `--json`
//! bypasses formatting and serializes the result types directly.

mod colored;
mod formatter;

pub use colored::{ColorScheme, ColoredFormatter, LossLevel};
pub use formatter::{
    format_kbps, format_latency, format_percentage, render_table, Alignment, Column, FormattingOptions,
    OutputFormatter, PlainFormatter, RowData, TableFormat, TableLines,
};

use crate::{
    error::Result,
    executor::{SweepProgressEvent, SweepReport},
    models::{RunResult, RunSnapshot},
};

/// Output formatting factory for creating appropriate formatters
pub struct OutputFormatterFactory;

impl OutputFormatterFactory {
    /// Create a formatter based on color support and preferences
    pub fn create_formatter(enable_color: bool, verbose: bool) -> Box<dyn OutputFormatter + Send + Sync> {
        let options = FormattingOptions {
            enable_color,
            verbose_mode: verbose,
            table_borders: true,
        };

        if enable_color {
            Box::new(ColoredFormatter::new(options))
        } else {
            Box::new(PlainFormatter::new(options))
        }
    }

    /// Create a plain text formatter for scripts/logs
    pub fn create_plain_formatter() -> Box<dyn OutputFormatter + Send + Sync> {
        Self::create_formatter(false, true)
    }
}

/// Main output coordinator that handles all result display
pub struct OutputCoordinator {
    formatter: Box<dyn OutputFormatter + Send + Sync>,
    json: bool,
}

impl OutputCoordinator {
    /// Create a new output coordinator with the specified formatter
    pub fn new(formatter: Box<dyn OutputFormatter + Send + Sync>) -> Self {
        Self { formatter, json: false }
    }

    /// Emit JSON instead of formatted text for final results
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn formatter(&self) -> &dyn OutputFormatter {
        self.formatter.as_ref()
    }

    /// Display the outcome of a single run
    pub fn display_run(&self, result: &RunResult) -> Result<String> {
        if self.json {
            return Ok(serde_json::to_string_pretty(result)?);
        }

        let mut output = self.formatter.format_header("Link Rate Test")?;
        output.push_str("\n\n");
        output.push_str(&self.formatter.format_run_result(result)?);
        Ok(output)
    }

    /// Display a completed (or cancelled) sweep
    pub fn display_sweep(&self, report: &SweepReport) -> Result<String> {
        if self.json {
            return Ok(serde_json::to_string_pretty(report)?);
        }

        let mut output = self.formatter.format_header("Link Rate Sweep")?;
        output.push_str("\n\n");
        output.push_str(&self.formatter.format_sweep_table(report)?);
        Ok(output)
    }

    /// Live statistics line; JSON mode emits one object per line
    pub fn display_live(&self, snapshot: &RunSnapshot) -> Result<String> {
        if self.json {
            return Ok(serde_json::to_string(snapshot)?);
        }
        self.formatter.format_live_snapshot(snapshot)
    }

    /// Progress line for a sweep event, if the event warrants one
    pub fn display_progress(&self, event: &SweepProgressEvent) -> Result<Option<String>> {
        match event {
            SweepProgressEvent::PointFinished { current, total, point } => {
                Ok(Some(self.formatter.format_point_finished(*current, *total, point)?))
            }
            SweepProgressEvent::SweepCompleted { points_run, total, cancelled: true } => Ok(Some(
                self.formatter
                    .format_warning(&format!("Sweep cancelled after {} of {} point(s)", points_run, total))?,
            )),
            _ => Ok(None),
        }
    }
}
