//! Batched persistence with failure isolation.
//!
//! A failed batch blames all of its records equally: one error entry at the
//! batch's first row, counted once per record. Records are not retried one by
//! one and later batches still run.

use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{ImportErrorRecord, NewSubmission};
use crate::store::{with_timeout, SubmissionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Nothing survived validation; no store call was made.
    Empty,
    Written(usize),
    Failed {
        error: ImportErrorRecord,
        count: usize,
    },
}

impl BatchOutcome {
    pub fn written(&self) -> usize {
        match self {
            BatchOutcome::Written(n) => *n,
            _ => 0,
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            BatchOutcome::Failed { count, .. } => *count,
            _ => 0,
        }
    }
}

pub async fn write_batch(
    store: &dyn SubmissionStore,
    records: &[NewSubmission],
    call_timeout: Duration,
) -> BatchOutcome {
    let Some(first) = records.first() else {
        return BatchOutcome::Empty;
    };

    match with_timeout(call_timeout, "Batch insert", store.insert_batch(records)).await {
        Ok(()) => {
            debug!(rows = records.len(), first_row = first.row_number, "batch written");
            BatchOutcome::Written(records.len())
        }
        Err(e) => {
            warn!(
                rows = records.len(),
                first_row = first.row_number,
                error = %e,
                "batch insert failed"
            );
            let codes: Vec<&str> = records.iter().map(|r| r.entity_code.as_str()).collect();
            BatchOutcome::Failed {
                error: ImportErrorRecord {
                    row: first.row_number,
                    message: format!("Batch of {} rows failed: {:#}", records.len(), e),
                    data: serde_json::json!({
                        "rows": records.len(),
                        "entity_codes": codes,
                    }),
                },
                count: records.len(),
            }
        }
    }
}
