//! Colored formatter implementation with terminal color support

use super::formatter::{
    format_kbps, format_latency, format_percentage, is_failure, receiver_line, FormattingOptions, OutputFormatter,
    PlainFormatter,
};
use crate::{
    error::Result,
    executor::SweepReport,
    models::{RunResult, RunSnapshot, SweepPoint},
};
use colored::*;

/// Loss classification for color coding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossLevel {
    Clean,    // 0%
    Low,      // < 1%
    Moderate, // 1-5%
    High,     // 5-20%
    Severe,   // >= 20%
}

impl LossLevel {
    pub fn from_loss_rate(rate: f64) -> Self {
        if rate <= 0.0 {
            Self::Clean
        } else if rate < 0.01 {
            Self::Low
        } else if rate < 0.05 {
            Self::Moderate
        } else if rate < 0.20 {
            Self::High
        } else {
            Self::Severe
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Self::Clean => Color::Green,
            Self::Low => Color::Cyan,
            Self::Moderate => Color::Yellow,
            Self::High => Color::Magenta,
            Self::Severe => Color::Red,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clean => "Clean",
            Self::Low => "Low loss",
            Self::Moderate => "Moderate loss",
            Self::High => "High loss",
            Self::Severe => "Severe loss",
        }
    }
}

/// Color scheme configuration
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub muted: Color,
    pub border: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Blue,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Cyan,
            muted: Color::BrightBlack,
            border: Color::BrightBlack,
        }
    }
}

/// Colored formatter implementation
pub struct ColoredFormatter {
    plain_formatter: PlainFormatter,
    options: FormattingOptions,
    color_scheme: ColorScheme,
}

impl ColoredFormatter {
    /// Create a new colored formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self::with_color_scheme(options, ColorScheme::default())
    }

    /// Create a colored formatter with custom color scheme
    pub fn with_color_scheme(options: FormattingOptions, color_scheme: ColorScheme) -> Self {
        Self {
            plain_formatter: PlainFormatter::new(options.clone()),
            options,
            color_scheme,
        }
    }

    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.options.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    fn bold(&self, text: &str) -> ColoredString {
        if self.options.enable_color {
            text.bold()
        } else {
            text.normal()
        }
    }

    fn dimmed(&self, text: &str) -> ColoredString {
        if self.options.enable_color {
            text.dimmed()
        } else {
            text.normal()
        }
    }

    fn loss_colored(&self, rate: f64) -> ColoredString {
        self.colorize(&format_percentage(rate * 100.0), LossLevel::from_loss_rate(rate).color())
    }

    fn point_color(&self, point: &SweepPoint) -> Option<Color> {
        if point.excluded {
            None
        } else if is_failure(point.result.state) {
            Some(self.color_scheme.error)
        } else {
            Some(LossLevel::from_loss_rate(point.result.stats.loss_rate).color())
        }
    }
}

impl OutputFormatter for ColoredFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let decorated_title = format!("📡 {}", title);
        let border = "═".repeat(decorated_title.chars().count() + 4);

        Ok(format!(
            "{}\n  {}  \n{}",
            self.colorize(&border, self.color_scheme.border),
            self.bold(&decorated_title).color(self.color_scheme.header),
            self.colorize(&border, self.color_scheme.border)
        ))
    }

    fn format_run_result(&self, result: &RunResult) -> Result<String> {
        let stats = &result.stats;
        let state_color = match result.state {
            crate::types::RunState::Completed => self.color_scheme.success,
            crate::types::RunState::Stopped => self.color_scheme.warning,
            _ => self.color_scheme.error,
        };
        let level = LossLevel::from_loss_rate(stats.loss_rate);

        let mut lines = vec![
            format!(
                "Run {} {}",
                self.dimmed(&result.run_id.to_string()),
                self.bold(result.state.as_str()).color(state_color)
            ),
            format!(
                "📦 Packets:    sent {}, received {}, missing {}, corrupt {}",
                self.colorize(&stats.packets_sent.to_string(), self.color_scheme.info),
                self.colorize(&stats.packets_received.to_string(), self.color_scheme.info),
                stats.packets_missing,
                stats.packets_corrupt
            ),
            format!(
                "📉 Loss:       {} ({})   Corruption: {}",
                self.loss_colored(stats.loss_rate),
                self.colorize(level.description(), level.color()),
                self.loss_colored(stats.corruption_rate)
            ),
            format!(
                "🚀 Throughput: {} kbps total, {} kbps valid, {} kbps sent",
                format_kbps(stats.speed_total_kbps()),
                self.bold(&format_kbps(stats.speed_valid_kbps())),
                format_kbps(stats.send_rate_kbps())
            ),
            format!(
                "⏱️  Latency:    avg {}, min {}, max {}",
                self.bold(&format_latency(stats.latency_avg_ms)),
                format_latency(stats.latency_min_ms),
                format_latency(stats.latency_max_ms)
            ),
        ];

        if !result.receivers.is_empty() {
            lines.push(self.dimmed(&format!("📡 {} receivers, totals above are averages", result.receivers.len())).to_string());
            for (index, receiver) in result.receivers.iter().enumerate() {
                let line = receiver_line(index, receiver);
                lines.push(self.colorize(&line, LossLevel::from_loss_rate(receiver.loss_rate).color()).to_string());
            }
        }

        if self.options.verbose_mode || stats.resync_events > 0 || stats.resync_failures > 0 {
            lines.push(format!(
                "🔁 Resync:     {} event(s), {} failure(s), {} byte(s) discarded",
                stats.resync_events, stats.resync_failures, stats.bytes_discarded
            ));
        }
        lines.push(self.dimmed(&format!(
            "   {} byte payload every {}s for {:.3}s",
            result.config.packet_size, result.config.write_interval_secs, stats.elapsed_secs
        )).to_string());
        if let Some(error) = &result.error {
            lines.push(format!("❌ {}", self.colorize(error, self.color_scheme.error)));
        }

        Ok(lines.join("\n"))
    }

    fn format_live_snapshot(&self, snapshot: &RunSnapshot) -> Result<String> {
        Ok(format!(
            "{} sent {} recv {} loss {} corrupt {} | {} kbps valid | latency {}",
            self.dimmed(&format!("[{:>7.1}s]", snapshot.elapsed_secs)),
            snapshot.packets_sent,
            snapshot.packets_received,
            self.loss_colored(snapshot.loss_rate),
            self.loss_colored(snapshot.corruption_rate),
            self.bold(&format_kbps(snapshot.speed_valid_kbps())),
            format_latency(snapshot.latency_avg_ms)
        ))
    }

    fn format_point_finished(&self, current: usize, total: usize, point: &SweepPoint) -> Result<String> {
        let line = self.plain_formatter.format_point_finished(current, total, point)?;
        Ok(match self.point_color(point) {
            Some(color) => self.colorize(&line, color).to_string(),
            None => self.dimmed(&line).to_string(),
        })
    }

    fn format_sweep_table(&self, report: &SweepReport) -> Result<String> {
        if report.points.is_empty() {
            return Ok(self.colorize("No sweep points were run.", self.color_scheme.muted).to_string());
        }

        let table = self.plain_formatter.sweep_table_lines(report);
        let mut lines: Vec<String> = table
            .header
            .iter()
            .map(|line| {
                if line.starts_with('+') {
                    self.colorize(line, self.color_scheme.border).to_string()
                } else {
                    self.bold(line).to_string()
                }
            })
            .collect();

        for (line, point) in table.rows.iter().zip(report.points.iter()) {
            lines.push(match self.point_color(point) {
                Some(color) => self.colorize(line, color).to_string(),
                None => self.dimmed(line).to_string(),
            });
        }
        lines.extend(
            table
                .footer
                .iter()
                .map(|line| self.colorize(line, self.color_scheme.border).to_string()),
        );

        let footer = self.plain_formatter.sweep_footer(report);
        lines.push(if report.cancelled {
            self.colorize(&footer, self.color_scheme.warning).to_string()
        } else {
            footer
        });

        Ok(lines.join("\n"))
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("❌ {}", self.colorize(error, self.color_scheme.error)))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("⚠️  {}", self.colorize(warning, self.color_scheme.warning)))
    }

    fn format_success(&self, message: &str) -> Result<String> {
        Ok(format!("✅ {}", self.colorize(message, self.color_scheme.success)))
    }
}
