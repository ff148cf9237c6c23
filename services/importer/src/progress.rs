//! Progress reporting for a running import.
//!
//! Updates are pushed to an optional [`ProgressReporter`]. Percentages never
//! decrease and stay below 100 until the final update.

use tracing::info;

use crate::model::{ImportResult, ProgressUpdate};

pub const LOADING_IDENTITIES_PCT: u8 = 5;
pub const CHECKING_DUPLICATES_PCT: u8 = 10;
/// Share of the bar covered by batch writes, after the lookup milestones.
const BATCH_SPAN_PCT: usize = 85;

pub const MSG_LOADING_IDENTITIES: &str = "Loading identities...";
pub const MSG_CHECKING_DUPLICATES: &str = "Checking for duplicates...";
pub const MSG_COMPLETE: &str = "Import complete!";
pub const MSG_CANCELLED: &str = "Import cancelled";
pub const MSG_FAILED: &str = "Import failed";

/// Receiver of progress snapshots.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Logs every update at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn report(&self, update: &ProgressUpdate) {
        info!(
            pct = update.percentage,
            batch = update.current_batch,
            batches = update.total_batches,
            processed = update.processed_rows,
            total = update.total_rows,
            ok = update.success_count,
            errors = update.error_count,
            skipped = update.skipped_count,
            "{}",
            update.message
        );
    }
}

/// Percentage after `done` of `total` batches, capped at 99.
pub fn batch_percentage(done: usize, total: usize) -> u8 {
    let base = CHECKING_DUPLICATES_PCT as usize;
    let pct = if total == 0 {
        base + BATCH_SPAN_PCT
    } else {
        base + BATCH_SPAN_PCT * done.min(total) / total
    };
    pct.min(99) as u8
}

pub struct ProgressTracker<'a> {
    reporter: Option<&'a dyn ProgressReporter>,
    total_batches: usize,
    current_batch: usize,
    last_pct: u8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(reporter: Option<&'a dyn ProgressReporter>, total_batches: usize) -> Self {
        Self {
            reporter,
            total_batches,
            current_batch: 0,
            last_pct: 0,
        }
    }

    #[cfg(test)]
    pub fn last_percentage(&self) -> u8 {
        self.last_pct
    }

    pub fn milestone(&mut self, pct: u8, message: &str, result: &ImportResult) {
        self.emit(pct.min(99), message.to_string(), result);
    }

    pub fn batch_done(&mut self, batch_index: usize, result: &ImportResult) {
        self.current_batch = (batch_index + 1).min(self.total_batches);
        let pct = batch_percentage(self.current_batch, self.total_batches);
        let message = format!(
            "Processed batch {} of {}",
            self.current_batch, self.total_batches
        );
        self.emit(pct, message, result);
    }

    pub fn finish(&mut self, result: &ImportResult) {
        self.current_batch = self.total_batches;
        let message = if !result.success {
            MSG_FAILED
        } else if result.cancelled {
            MSG_CANCELLED
        } else {
            MSG_COMPLETE
        };
        self.emit(100, message.to_string(), result);
    }

    fn emit(&mut self, pct: u8, message: String, result: &ImportResult) {
        self.last_pct = self.last_pct.max(pct);
        let Some(reporter) = self.reporter else {
            return;
        };
        reporter.report(&ProgressUpdate {
            percentage: self.last_pct,
            current_batch: self.current_batch,
            total_batches: self.total_batches,
            processed_rows: result.processed(),
            total_rows: result.total_rows,
            success_count: result.success_count,
            error_count: result.error_count,
            skipped_count: result.skipped_count,
            message,
        });
    }
}
