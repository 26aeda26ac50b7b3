//! Progress tracking utilities
//!
//! Thread-safe progress tracker for logging at regular count intervals. Workers
//! share one tracker behind an `Arc` and add their batch sizes as spans finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::info;

use crate::logging::{format_count, format_duration, format_rate};

/// Thread-safe progress tracker for logging progress at regular intervals.
///
/// Maintains an internal count and logs a message each time the count crosses
/// an interval boundary. A final summary with the overall rate is logged by
/// [`finish`](ProgressTracker::finish).
///
/// # Example
/// ```
/// use flowcall_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Basecalled wells").with_interval(100);
///
/// for _ in 0..250 {
///     tracker.inc(1); // Logs at 100, 200
/// }
/// tracker.finish(); // Logs "Basecalled wells 250 ..." summary
/// ```
pub struct ProgressTracker {
    /// Progress is logged when the count crosses multiples of this.
    interval: u64,
    /// Message prefix for log output.
    message: String,
    /// Items counted so far.
    count: AtomicU64,
    /// When tracking started, for the final rate.
    started: Instant,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified message and a default
    /// interval of 100,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            interval: 100_000,
            message: message.into(),
            count: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Set the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add to the count, logging once per interval boundary crossed.
    ///
    /// Safe to call from multiple threads; a single atomic add determines which
    /// boundaries this call owns, so each milestone is logged exactly once even
    /// under contention.
    pub fn inc(&self, additional: u64) {
        if additional == 0 {
            return;
        }
        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;

        let prev_intervals = prev / self.interval;
        let new_intervals = new_count / self.interval;
        for i in (prev_intervals + 1)..=new_intervals {
            info!("{} {}", self.message, format_count(i * self.interval));
        }
    }

    /// Log the final count and overall rate.
    pub fn finish(&self) {
        let count = self.count.load(Ordering::Relaxed);
        if count > 0 {
            let elapsed = self.started.elapsed();
            info!(
                "{} {} in {} ({})",
                self.message,
                format_count(count),
                format_duration(elapsed),
                format_rate(count, elapsed)
            );
        }
    }

    /// Get the current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
