//! Run summaries and the formatting helpers used to print them.
use pretty_bytes::converter::convert;

use std::fmt::Display;
use std::time::{Duration, SystemTime};

/// Statistics gathered while transferring a single partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files: u64,
    pub skipped: u64,
    pub bytes: u64,
}

/// Running totals across every partition of a fetch.
pub struct Summary {
    start_time: SystemTime,
    pub partitions: u64,
    pub failed: u64,
    pub files: u64,
    pub skipped: u64,
    pub bytes: u64,
}

impl Summary {
    /// Constructs a new `Summary`, starting the clock.
    pub fn new() -> Summary {
        Summary {
            start_time: SystemTime::now(),
            partitions: 0,
            failed: 0,
            files: 0,
            skipped: 0,
            bytes: 0,
        }
    }

    /// Adds the statistics of a successful partition.
    pub fn record(&mut self, stats: &TransferStats) {
        self.files += stats.files;
        self.skipped += stats.skipped;
        self.bytes += stats.bytes;
    }

    /// Prints out all statistics under the `summary` header.
    pub fn print(&self) {
        // whole seconds only, to keep the output short
        let elapsed = SystemTime::now()
            .duration_since(self.start_time)
            .map(|d| Duration::from_secs(d.as_secs()))
            .unwrap_or_default();

        log_head("summary");
        log_pair("total_time", humantime::format_duration(elapsed));
        log_pair("partitions", self.partitions);
        log_pair("failed", self.failed);
        log_pair("files", self.files);
        log_pair("skipped", self.skipped);
        log_pair("total_storage", convert_bytes(self.bytes));
    }
}

/// Converts a byte count to a `String` representation.
pub fn convert_bytes(bytes: u64) -> String {
    convert(bytes as f64).replacen(' ', "", 1)
}

/// Logs a header using a common format.
pub fn log_head(label: &str) {
    println!("\n[{}]", label);
}

/// Logs a label/value pair using a common format.
pub fn log_pair<T>(label: &str, val: T)
where
    T: Display,
{
    println!("{}={}", label, val);
}
