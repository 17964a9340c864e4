//! Progress reporting for keyspace scans
//!
//! Provides a spinner while a scan runs and short summaries afterwards.
//! Everything goes to stderr so stdout stays machine-readable.

use crate::config::BrowseSettings;
use crate::datasource::DeletionReport;
use crate::delivery::ActionStatus;
use crate::walker::ScanSummary;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a request is running
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create and start a spinner
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Show scan counters
    pub fn update(&self, stats: &ScanSummary) {
        self.bar.set_message(format!(
            "Keys: {} | Accepted: {} | Pages: {} | Shards: {}",
            format_number(stats.keys_scanned),
            format_number(stats.keys_accepted),
            format_number(stats.pages_fetched),
            stats.shards_scanned,
        ));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .rev()
        .collect::<Vec<_>>()
        .join(",")
}

/// Print a header before the request runs
pub fn print_header(bootstrap: &str, vendor: &str, read_only: bool, settings: &BrowseSettings) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("keyspace-walker").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {} ({})", style("Source:").bold(), bootstrap, vendor);
    if read_only {
        eprintln!("  {} {}", style("Mode:").bold(), style("read-only").yellow());
    }
    eprintln!(
        "  {} {} keys/page, {} pages inline",
        style("Paging:").bold(),
        format_number(settings.page_size as u64),
        settings.channel_capacity
    );
    eprintln!();
}

/// Print a summary of an entry-point listing
pub fn print_scan_summary(
    nodes: usize,
    stats: &ScanSummary,
    duration: Duration,
    status: ActionStatus,
    bytes_written: u64,
) {
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        stats.keys_scanned as f64 / duration_secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("{}", style("Scan Complete").green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!(
        "  {} {}",
        style("Keys scanned:").bold(),
        format_number(stats.keys_scanned)
    );
    eprintln!("  {} {}", style("Entry points:").bold(), format_number(nodes as u64));
    if stats.keys_excluded > 0 {
        eprintln!(
            "  {} {}",
            style("Excluded:").bold(),
            format_number(stats.keys_excluded)
        );
    }
    if stats.keys_skipped > 0 {
        eprintln!(
            "  {} {}",
            style("Skipped:").yellow().bold(),
            format_number(stats.keys_skipped)
        );
    }
    if stats.keys_invalid > 0 {
        eprintln!(
            "  {} {} (not UTF-8)",
            style("Unreadable:").yellow().bold(),
            format_number(stats.keys_invalid)
        );
    }
    eprintln!(
        "  {} {} across {} shard(s)",
        style("Pages:").bold(),
        format_number(stats.pages_fetched),
        stats.shards_scanned
    );
    eprintln!(
        "  {} {:.1}s ({:.0} keys/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    eprintln!(
        "  {} {:?}, {}",
        style("Delivery:").bold(),
        status,
        format_size(bytes_written, BINARY)
    );
    eprintln!();
}

/// Print the outcome of a subtree deletion
pub fn print_deletion_summary(report: &DeletionReport) {
    eprintln!();
    let title = if report.failed == 0 {
        style("Deletion Complete").green().bold()
    } else {
        style("Deletion Completed With Errors").yellow().bold()
    };
    eprintln!("{title}");
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Prefix:").bold(), report.prefix);
    eprintln!(
        "  {} {}",
        style("Found:").bold(),
        format_number(report.requested)
    );
    eprintln!(
        "  {} {}",
        style("Deleted:").bold(),
        format_number(report.deleted)
    );
    if report.failed > 0 {
        eprintln!(
            "  {} {}",
            style("Failed:").red().bold(),
            format_number(report.failed)
        );
    }
    eprintln!();
}
