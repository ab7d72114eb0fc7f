//! Core formatting trait and the plain text implementation
//!
//! The plain formatter also owns the table layout; the colored formatter
//! lays out the same table and paints whole lines afterwards so that escape
//! codes never skew column widths.

use crate::{
    error::{AppError, Result},
    executor::SweepReport,
    models::{RunResult, RunSnapshot, SweepPoint},
    types::RunState,
};
use std::fmt::Write as _;

/// Main trait for output formatting
pub trait OutputFormatter {
    /// Format a header section
    fn format_header(&self, title: &str) -> Result<String>;

    /// Format the outcome of a single run
    fn format_run_result(&self, result: &RunResult) -> Result<String>;

    /// One line of live statistics
    fn format_live_snapshot(&self, snapshot: &RunSnapshot) -> Result<String>;

    /// One line announcing a finished sweep point
    fn format_point_finished(&self, current: usize, total: usize, point: &SweepPoint) -> Result<String>;

    /// Format the sweep results table, excluded rows included and marked
    fn format_sweep_table(&self, report: &SweepReport) -> Result<String>;

    /// Format error messages
    fn format_error(&self, error: &str) -> Result<String>;

    /// Format warning messages
    fn format_warning(&self, warning: &str) -> Result<String>;

    /// Format success messages
    fn format_success(&self, message: &str) -> Result<String>;
}

/// Configuration options for formatting
#[derive(Debug, Clone)]
pub struct FormattingOptions {
    /// Enable colored output
    pub enable_color: bool,
    /// Show latency extremes, resync counters and byte totals
    pub verbose_mode: bool,
    /// Show table borders
    pub table_borders: bool,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            enable_color: true,
            verbose_mode: false,
            table_borders: true,
        }
    }
}

/// Table formatting configuration
#[derive(Debug, Clone)]
pub struct TableFormat {
    pub columns: Vec<Column>,
    pub show_borders: bool,
}

/// Column definition for table formatting
#[derive(Debug, Clone)]
pub struct Column {
    pub header: String,
    pub alignment: Alignment,
    pub max_width: usize,
}

impl Column {
    pub fn left(header: &str) -> Self {
        Self {
            header: header.to_string(),
            alignment: Alignment::Left,
            max_width: 48,
        }
    }

    pub fn right(header: &str) -> Self {
        Self {
            header: header.to_string(),
            alignment: Alignment::Right,
            max_width: 16,
        }
    }
}

/// Text alignment options
#[derive(Debug, Clone)]
pub enum Alignment {
    Left,
    Right,
}

/// Row data for table formatting
pub type RowData = Vec<String>;

/// A rendered table split so rows can be styled individually
#[derive(Debug, Clone, Default)]
pub struct TableLines {
    pub header: Vec<String>,
    pub rows: Vec<String>,
    pub footer: Vec<String>,
}

impl TableLines {
    pub fn join(&self) -> String {
        self.header
            .iter()
            .chain(self.rows.iter())
            .chain(self.footer.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lay out rows under the given columns
pub fn render_table(format: &TableFormat, rows: &[RowData]) -> TableLines {
    let widths: Vec<usize> = format
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            rows.iter()
                .filter_map(|row| row.get(idx))
                .map(|cell| cell.chars().count())
                .fold(column.header.chars().count(), usize::max)
                .min(column.max_width)
        })
        .collect();

    let border = || {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };

    let render_row = |cells: &[String]| {
        let mut line = String::new();
        if format.show_borders {
            line.push('|');
        }
        for (idx, width) in widths.iter().enumerate() {
            let cell = cells.get(idx).map(String::as_str).unwrap_or("");
            let alignment = &format.columns[idx].alignment;
            if format.show_borders {
                line.push(' ');
            }
            line.push_str(&align_text(cell, *width, alignment));
            line.push_str(if format.show_borders { " |" } else { "  " });
        }
        line.trim_end().to_string()
    };

    let headers: Vec<String> = format.columns.iter().map(|c| c.header.clone()).collect();
    let mut lines = TableLines::default();
    if format.show_borders {
        lines.header.push(border());
    }
    lines.header.push(render_row(&headers));
    if format.show_borders {
        lines.header.push(border());
    }
    lines.rows = rows.iter().map(|row| render_row(row)).collect();
    if format.show_borders {
        lines.footer.push(border());
    }
    lines
}

fn align_text(text: &str, width: usize, alignment: &Alignment) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.chars().take(width).collect();
    }

    let padding = " ".repeat(width - len);
    match alignment {
        Alignment::Left => format!("{}{}", text, padding),
        Alignment::Right => format!("{}{}", padding, text),
    }
}

/// Format milliseconds, or n/a when there were no samples
pub fn format_latency(latency_ms: Option<f64>) -> String {
    match latency_ms {
        Some(ms) if ms < 1.0 => format!("{:.3}ms", ms),
        Some(ms) if ms < 1000.0 => format!("{:.1}ms", ms),
        Some(ms) => format!("{:.2}s", ms / 1000.0),
        None => "n/a".to_string(),
    }
}

/// Format percentage with appropriate precision
pub fn format_percentage(percentage: f64) -> String {
    if percentage > 0.0 && percentage < 0.05 {
        format!("{:.3}%", percentage)
    } else {
        format!("{:.1}%", percentage)
    }
}

pub fn format_kbps(kbps: f64) -> String {
    format!("{:.2}", kbps)
}

/// One receiver's share of a multi-receiver run
pub fn receiver_line(index: usize, snapshot: &RunSnapshot) -> String {
    format!(
        "  rx {}: received {}, missing {}, corrupt {}, loss {}, {} kbps valid",
        index + 1,
        snapshot.packets_received,
        snapshot.packets_missing,
        snapshot.packets_corrupt,
        format_percentage(snapshot.loss_percent()),
        format_kbps(snapshot.speed_valid_kbps())
    )
}

/// Columns of the sweep table
pub fn sweep_columns(verbose: bool) -> Vec<Column> {
    let mut columns = vec![
        Column::right("#"),
        Column::right("Size"),
        Column::right("Interval"),
        Column::right("Rep"),
        Column::right("Offered kbps"),
        Column::right("Sent"),
        Column::right("Recv"),
        Column::right("Loss"),
        Column::right("Corrupt"),
        Column::right("Total kbps"),
        Column::right("Valid kbps"),
        Column::right("Latency"),
    ];
    if verbose {
        columns.push(Column::right("Min"));
        columns.push(Column::right("Max"));
        columns.push(Column::right("Resyncs"));
    }
    columns.push(Column::left("State"));
    columns.push(Column::left("Note"));
    columns
}

/// One sweep table row
pub fn sweep_row(point: &SweepPoint, verbose: bool) -> RowData {
    let stats = &point.result.stats;
    let mut row = vec![
        (point.index + 1).to_string(),
        point.packet_size.to_string(),
        format!("{}s", point.write_interval_secs),
        (point.repeat + 1).to_string(),
        format_kbps(point.result.config.offered_load_kbps()),
        stats.packets_sent.to_string(),
        stats.packets_received.to_string(),
        format_percentage(stats.loss_percent()),
        format_percentage(stats.corruption_percent()),
        format_kbps(stats.speed_total_kbps()),
        format_kbps(stats.speed_valid_kbps()),
        format_latency(stats.latency_avg_ms),
    ];
    if verbose {
        row.push(format_latency(stats.latency_min_ms));
        row.push(format_latency(stats.latency_max_ms));
        row.push(stats.resync_events.to_string());
    }
    row.push(point.result.state.to_string());
    row.push(point_note(point));
    row
}

/// Why a row deserves attention, if it does
pub fn point_note(point: &SweepPoint) -> String {
    if point.excluded {
        format!(
            "excluded: {}",
            point.exclusion_reason.as_deref().unwrap_or("harness artifact")
        )
    } else if let Some(error) = &point.result.error {
        error.clone()
    } else {
        String::new()
    }
}

/// Plain text formatter implementation
pub struct PlainFormatter {
    options: FormattingOptions,
}

impl PlainFormatter {
    /// Create a new plain formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self { options }
    }

    pub(crate) fn sweep_table_lines(&self, report: &SweepReport) -> TableLines {
        let format = TableFormat {
            columns: sweep_columns(self.options.verbose_mode),
            show_borders: self.options.table_borders,
        };
        let rows: Vec<RowData> = report
            .points
            .iter()
            .map(|point| sweep_row(point, self.options.verbose_mode))
            .collect();
        render_table(&format, &rows)
    }

    pub(crate) fn sweep_footer(&self, report: &SweepReport) -> String {
        let mut footer = format!(
            "{} point(s) run, {} excluded, {} failed",
            report.points.len(),
            report.excluded_count(),
            report.failed_count()
        );
        if report.cancelled {
            footer.push_str(&format!("; cancelled with {} point(s) not run", report.skipped_points));
        }
        footer
    }
}

fn fmt_err(e: std::fmt::Error) -> AppError {
    AppError::io(format!("Failed to format output: {}", e))
}

impl OutputFormatter for PlainFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let border = "=".repeat(title.len() + 4);

        writeln!(output, "{}", border).map_err(fmt_err)?;
        writeln!(output, "  {}  ", title).map_err(fmt_err)?;
        write!(output, "{}", border).map_err(fmt_err)?;

        Ok(output)
    }

    fn format_run_result(&self, result: &RunResult) -> Result<String> {
        let stats = &result.stats;
        let config = &result.config;
        let mut output = String::new();

        writeln!(output, "Run {} ({})", result.run_id, result.state).map_err(fmt_err)?;
        writeln!(
            output,
            "Parameters:  {} byte payload every {}s, offered {} kbps",
            config.packet_size,
            config.write_interval_secs,
            format_kbps(config.offered_load_kbps())
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Packets:     sent {}, received {}, missing {}, corrupt {}",
            stats.packets_sent, stats.packets_received, stats.packets_missing, stats.packets_corrupt
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Loss:        {}   Corruption: {}",
            format_percentage(stats.loss_percent()),
            format_percentage(stats.corruption_percent())
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Throughput:  {} kbps total, {} kbps valid, {} kbps sent",
            format_kbps(stats.speed_total_kbps()),
            format_kbps(stats.speed_valid_kbps()),
            format_kbps(stats.send_rate_kbps())
        )
        .map_err(fmt_err)?;
        writeln!(
            output,
            "Latency:     avg {}, min {}, max {}",
            format_latency(stats.latency_avg_ms),
            format_latency(stats.latency_min_ms),
            format_latency(stats.latency_max_ms)
        )
        .map_err(fmt_err)?;

        if !result.receivers.is_empty() {
            writeln!(output, "Receivers:   {}, totals above are averages", result.receivers.len()).map_err(fmt_err)?;
            for (index, receiver) in result.receivers.iter().enumerate() {
                writeln!(output, "{}", receiver_line(index, receiver)).map_err(fmt_err)?;
            }
        }

        if self.options.verbose_mode || stats.resync_events > 0 || stats.resync_failures > 0 {
            writeln!(
                output,
                "Resync:      {} event(s), {} failure(s), {} byte(s) discarded",
                stats.resync_events, stats.resync_failures, stats.bytes_discarded
            )
            .map_err(fmt_err)?;
        }
        if self.options.verbose_mode {
            writeln!(
                output,
                "Bytes:       sent {}, received {}, valid {}",
                stats.bytes_sent, stats.bytes_received, stats.bytes_valid
            )
            .map_err(fmt_err)?;
            if stats.clock_skew_samples > 0 {
                writeln!(output, "Clock skew:  {} sample(s) clamped to zero latency", stats.clock_skew_samples)
                    .map_err(fmt_err)?;
            }
        }

        write!(output, "Elapsed:     {:.3}s", stats.elapsed_secs).map_err(fmt_err)?;
        if let Some(error) = &result.error {
            write!(output, "\nError:       {}", error).map_err(fmt_err)?;
        }

        Ok(output)
    }

    fn format_live_snapshot(&self, snapshot: &RunSnapshot) -> Result<String> {
        Ok(format!(
            "[{:>7.1}s] sent {} recv {} loss {} corrupt {} | {} kbps valid | latency {}",
            snapshot.elapsed_secs,
            snapshot.packets_sent,
            snapshot.packets_received,
            format_percentage(snapshot.loss_percent()),
            format_percentage(snapshot.corruption_percent()),
            format_kbps(snapshot.speed_valid_kbps()),
            format_latency(snapshot.latency_avg_ms)
        ))
    }

    fn format_point_finished(&self, current: usize, total: usize, point: &SweepPoint) -> Result<String> {
        let stats = &point.result.stats;
        Ok(format!(
            "[{}/{}] size {} interval {}s repeat {}: {} loss {}, {} kbps valid",
            current,
            total,
            point.packet_size,
            point.write_interval_secs,
            point.repeat + 1,
            point.result.state,
            format_percentage(stats.loss_percent()),
            format_kbps(stats.speed_valid_kbps())
        ))
    }

    fn format_sweep_table(&self, report: &SweepReport) -> Result<String> {
        if report.points.is_empty() {
            return Ok("No sweep points were run.".to_string());
        }

        let mut output = self.sweep_table_lines(report).join();
        output.push('\n');
        output.push_str(&self.sweep_footer(report));
        Ok(output)
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("ERROR: {}", error))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("WARNING: {}", warning))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("OK: {}", message))
    }
}

/// Whether a run state deserves an error color
pub(crate) fn is_failure(state: RunState) -> bool {
    matches!(state, RunState::Failed)
}
