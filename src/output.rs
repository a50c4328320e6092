//! Report rendering
//!
//! Human-readable and JSON output for validation reports.

use std::time::Duration;

use serde::Serialize;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::report::{BatchProgress, BatchSummary, ReportStatus, UploadReport};

/// Output formatter for validation reports
pub struct Output {
    verbosity: VerbosityLevel,
    format: OutputFormat,
    show_colors: bool,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    total: usize,
    accepted: usize,
    rejected: usize,
    failed: usize,
    duration_ms: u128,
    uploads: Vec<JsonUpload<'a>>,
}

#[derive(Serialize)]
struct JsonUpload<'a> {
    name: &'a str,
    #[serde(flatten)]
    status: &'a ReportStatus,
    duration_ms: u128,
}

impl<'a> From<&'a UploadReport> for JsonUpload<'a> {
    fn from(report: &'a UploadReport) -> Self {
        Self {
            name: &report.name,
            status: &report.status,
            duration_ms: report.duration.as_millis(),
        }
    }
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    /// Formatter that never emits colour codes
    pub fn plain(verbosity: VerbosityLevel, format: OutputFormat) -> Self {
        Self {
            verbosity,
            format,
            show_colors: false,
        }
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_summary(&self, summary: &BatchSummary) -> String {
        match self.format {
            OutputFormat::Json => self.format_json(summary),
            OutputFormat::Human => self.format_human(summary),
        }
    }

    fn format_json(&self, summary: &BatchSummary) -> String {
        let document = JsonSummary {
            total: summary.total,
            accepted: summary.accepted,
            rejected: summary.rejected,
            failed: summary.failed,
            duration_ms: summary.total_duration.as_millis(),
            uploads: summary.reports.iter().map(JsonUpload::from).collect(),
        };

        // Plain data with string keys; serialization cannot fail
        serde_json::to_string_pretty(&document).unwrap_or_default()
    }

    fn format_human(&self, summary: &BatchSummary) -> String {
        let mut output = String::new();

        for report in &summary.reports {
            if self.verbosity == VerbosityLevel::Quiet && report.status.is_accepted() {
                continue;
            }
            output.push_str(&self.format_report(report));
            output.push('\n');
        }

        if self.verbosity != VerbosityLevel::Quiet {
            output.push('\n');
            output.push_str(&self.format_totals(summary));
        }

        output
    }

    pub fn format_report(&self, report: &UploadReport) -> String {
        let duration = format_duration(report.duration);

        match &report.status {
            ReportStatus::Accepted => format!(
                "{}  {} ({})",
                self.colorize("✓ ACCEPTED", "32"),
                report.name,
                duration
            ),
            ReportStatus::Rejected {
                code,
                stage,
                message,
            } => {
                let mut line = format!(
                    "{}  {} ({}) - {}",
                    self.colorize("✗ REJECTED", "31"),
                    report.name,
                    duration,
                    message
                );
                if self.verbosity == VerbosityLevel::Verbose {
                    line.push_str(&format!("\n    stage: {}, code: {}", stage, code));
                }
                line
            }
            ReportStatus::Failed { message } => format!(
                "{}  {} ({}) - {}",
                self.colorize("⚠ ERROR", "33"),
                report.name,
                duration,
                message
            ),
        }
    }

    fn format_totals(&self, summary: &BatchSummary) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total uploads: {}\n", summary.total));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Accepted:", "32"),
            summary.accepted
        ));

        if summary.rejected > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Rejected:", "31"),
                summary.rejected
            ));
        }
        if summary.failed > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                summary.failed
            ));
        }

        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(summary.total_duration)
        ));
        output
    }

    /// One-line progress update, written to stderr by the caller
    pub fn format_progress(&self, progress: &BatchProgress) -> String {
        format!(
            "[{}/{}] {}",
            progress.completed, progress.total, progress.name
        )
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}
