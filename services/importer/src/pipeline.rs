//! The import run: parse -> resolve -> per batch (dedupe, write, report).
//!
//! Every run owns a fresh [`RunContext`]; nothing is shared between runs.
//! Only pre-flight problems and identity-loading failures end a run early,
//! as a fatal [`ImportResult`]. Row and batch failures are recorded and the
//! run carries on.

use futures::stream::{FuturesOrdered, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::dedup::{seed_existing, DuplicateSet};
use crate::mapping::{ColumnLayout, FieldMapping};
use crate::model::{
    DuplicateKey, DuplicateRecord, ImportErrorRecord, ImportResult, ImportScope, NewSubmission,
    RawRow,
};
use crate::normalize::map_row;
use crate::progress::{
    ProgressReporter, ProgressTracker, CHECKING_DUPLICATES_PCT, LOADING_IDENTITIES_PCT,
    MSG_CHECKING_DUPLICATES, MSG_LOADING_IDENTITIES,
};
use crate::resolver::{distinct_codes, resolve_identities, EntityCache};
use crate::store::{with_timeout, ImportRunRecord, SubmissionStore};
use crate::tabular::ParsedInput;
use crate::writer::{write_batch, BatchOutcome};

pub const MSG_NO_DATA: &str = "File must contain a header row and at least one data row";

/// Where the input came from, for the run audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSource {
    pub file_name: String,
    pub content_hash: String,
}

impl ImportSource {
    pub fn from_bytes(file_name: impl Into<String>, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            file_name: file_name.into(),
            content_hash: format!("sha256:{:x}", hasher.finalize()),
        }
    }
}

/// Rows of one input chunk after validation and duplicate filtering.
#[derive(Debug)]
struct PreparedBatch {
    index: usize,
    row_count: usize,
    records: Vec<NewSubmission>,
    errors: Vec<ImportErrorRecord>,
    duplicates: Vec<DuplicateRecord>,
}

enum RowOutcome {
    Accepted(NewSubmission),
    Duplicate(DuplicateRecord),
    Rejected(ImportErrorRecord),
}

/// Mutable state of one run, owned by [`Importer::run`].
struct RunContext<'a> {
    import_run_id: Uuid,
    scope: ImportScope,
    layout: ColumnLayout,
    mapping: &'a FieldMapping,
    cache: EntityCache,
    seen: DuplicateSet,
    result: ImportResult,
}

impl RunContext<'_> {
    fn prepare(&mut self, index: usize, chunk: &[RawRow]) -> PreparedBatch {
        let mut batch = PreparedBatch {
            index,
            row_count: chunk.len(),
            records: Vec::with_capacity(chunk.len()),
            errors: Vec::new(),
            duplicates: Vec::new(),
        };
        for row in chunk {
            match self.accept_row(row) {
                RowOutcome::Accepted(record) => batch.records.push(record),
                RowOutcome::Duplicate(dup) => batch.duplicates.push(dup),
                RowOutcome::Rejected(err) => batch.errors.push(err),
            }
        }
        batch
    }

    fn accept_row(&mut self, row: &RawRow) -> RowOutcome {
        let reject = |message: String| {
            RowOutcome::Rejected(ImportErrorRecord {
                row: row.row_number(),
                message,
                data: row.to_json(),
            })
        };

        let mapped = match map_row(row, &self.layout, self.mapping) {
            Ok(mapped) => mapped,
            Err(e) => return reject(format!("{:#}", e)),
        };

        let Some(entity_id) = self.cache.entity_id(&mapped.entity_code) else {
            return reject(format!("Entity code '{}' not found", mapped.entity_code));
        };
        let Some(supervisor_id) = self.cache.supervisor_id(&mapped.supervisor_code) else {
            return reject(format!(
                "Supervisor code '{}' not found",
                mapped.supervisor_code
            ));
        };

        let key = DuplicateKey::new(entity_id, mapped.cycle, mapped.submitted_at);
        if !self.seen.accept(key) {
            return RowOutcome::Duplicate(DuplicateRecord {
                row: mapped.row_number,
                entity_code: mapped.entity_code,
                cycle: mapped.cycle,
            });
        }

        RowOutcome::Accepted(NewSubmission {
            submission_id: Uuid::new_v4(),
            import_run_id: self.import_run_id,
            tenant_id: self.scope.tenant_id,
            form_id: self.scope.form_id,
            entity_id,
            supervisor_id,
            cycle: mapped.cycle,
            submitted_at: mapped.submitted_at,
            latitude: mapped.location.map(|p| p.latitude),
            longitude: mapped.location.map(|p| p.longitude),
            answers: serde_json::json!(mapped.answers),
            display: serde_json::json!(mapped.display),
            status: mapped.status,
            row_number: mapped.row_number,
            entity_code: mapped.entity_code,
        })
    }

    /// Fold a written batch into the result, keeping error entries in row order.
    fn apply(&mut self, batch: PreparedBatch, outcome: BatchOutcome) {
        let mut errors = batch.errors;
        self.result.error_count += errors.len();
        self.result.skipped_count += batch.duplicates.len();
        self.result.duplicates.extend(batch.duplicates);

        match outcome {
            BatchOutcome::Empty => {}
            BatchOutcome::Written(n) => self.result.success_count += n,
            BatchOutcome::Failed { error, count } => {
                self.result.error_count += count;
                errors.push(error);
            }
        }
        errors.sort_by_key(|e| e.row);
        self.result.errors.extend(errors);
    }

    /// Count the rows of an unwritten chunk as errors after cancellation.
    fn cancel_chunk(&mut self, chunk: &[RawRow]) {
        let Some(first) = chunk.first() else {
            return;
        };
        self.result.error_count += chunk.len();
        self.result.errors.push(ImportErrorRecord {
            row: first.row_number(),
            message: format!("Import cancelled before {} rows were written", chunk.len()),
            data: serde_json::json!({ "rows": chunk.len() }),
        });
    }
}

async fn write_prepared(
    store: &dyn SubmissionStore,
    batch: PreparedBatch,
    call_timeout: Duration,
) -> (PreparedBatch, BatchOutcome) {
    let outcome = write_batch(store, &batch.records, call_timeout).await;
    (batch, outcome)
}

/// Entry point for bulk imports against one store.
pub struct Importer {
    store: Arc<dyn SubmissionStore>,
    config: ImportConfig,
    mapping: FieldMapping,
}

impl Importer {
    pub fn new(store: Arc<dyn SubmissionStore>, config: ImportConfig) -> Self {
        Self {
            store,
            config: config.sanitized(),
            mapping: FieldMapping::default(),
        }
    }

    /// Run a complete import. Never fails: fatal conditions come back as an
    /// `ImportResult` with `success == false`.
    pub async fn run(
        &self,
        input: &ParsedInput,
        source: &ImportSource,
        scope: ImportScope,
        reporter: Option<&dyn ProgressReporter>,
        cancel: &CancellationToken,
    ) -> ImportResult {
        let total_rows = input.rows.len();
        if input.is_empty() {
            warn!(file = %source.file_name, "{}", MSG_NO_DATA);
            return ImportResult::fatal(0, MSG_NO_DATA);
        }

        let layout = match ColumnLayout::from_headers(&input.headers) {
            Ok(layout) => layout,
            Err(e) => {
                warn!(file = %source.file_name, error = %e, "header validation failed");
                return ImportResult::fatal(total_rows, e.to_string());
            }
        };

        let import_run_id = Uuid::new_v4();
        info!(
            %import_run_id,
            file = %source.file_name,
            hash = %source.content_hash,
            rows = total_rows,
            "starting import"
        );
        self.begin_audit(import_run_id, source, scope, total_rows).await;

        let batch_size = self.config.batch_size;
        let total_batches = total_rows.div_ceil(batch_size);
        let mut tracker = ProgressTracker::new(reporter, total_batches);
        let result = ImportResult {
            success: true,
            total_rows,
            ..ImportResult::default()
        };

        tracker.milestone(LOADING_IDENTITIES_PCT, MSG_LOADING_IDENTITIES, &result);
        let entity_codes = distinct_codes(&input.rows, &layout.entity_code);
        let supervisor_codes = distinct_codes(&input.rows, &layout.supervisor_code);
        let cache = match resolve_identities(
            self.store.as_ref(),
            scope.tenant_id,
            &entity_codes,
            &supervisor_codes,
            self.config.lookup_chunk_size,
            self.config.call_timeout,
        )
        .await
        {
            Ok(cache) => cache,
            Err(e) => {
                let message = format!("Failed to load identities: {:#}", e);
                return self.abort(import_run_id, total_rows, message, &mut tracker).await;
            }
        };

        tracker.milestone(CHECKING_DUPLICATES_PCT, MSG_CHECKING_DUPLICATES, &result);
        let seen = match seed_existing(
            self.store.as_ref(),
            scope.form_id,
            &cache.entity_ids(),
            self.config.lookup_chunk_size,
            self.config.call_timeout,
        )
        .await
        {
            Ok(seen) => seen,
            Err(e) => {
                let message = format!("Failed to load existing submissions: {:#}", e);
                return self.abort(import_run_id, total_rows, message, &mut tracker).await;
            }
        };

        let mut run = RunContext {
            import_run_id,
            scope,
            layout,
            mapping: &self.mapping,
            cache,
            seen,
            result,
        };

        let mut chunks = input.rows.chunks(batch_size).enumerate();
        let mut in_flight = FuturesOrdered::new();
        loop {
            while in_flight.len() < self.config.write_concurrency && !cancel.is_cancelled() {
                let Some((index, chunk)) = chunks.next() else {
                    break;
                };
                let batch = run.prepare(index, chunk);
                in_flight.push_back(write_prepared(
                    self.store.as_ref(),
                    batch,
                    self.config.call_timeout,
                ));
            }

            let Some((batch, outcome)) = in_flight.next().await else {
                break;
            };
            let (index, row_count) = (batch.index, batch.row_count);
            run.apply(batch, outcome);
            tracker.batch_done(index, &run.result);
            info!(
                batch = index + 1,
                batches = total_batches,
                rows = row_count,
                ok = run.result.success_count,
                errors = run.result.error_count,
                skipped = run.result.skipped_count,
                "batch processed"
            );
        }

        if cancel.is_cancelled() {
            let remaining: Vec<&[RawRow]> = chunks.map(|(_, chunk)| chunk).collect();
            if !remaining.is_empty() {
                warn!(batches = remaining.len(), "import cancelled, remaining batches not written");
            }
            for chunk in remaining {
                run.cancel_chunk(chunk);
            }
            run.result.cancelled = true;
        }

        let result = run.result;
        tracker.finish(&result);
        self.finish_audit(import_run_id, &result).await;

        info!(
            %import_run_id,
            total = result.total_rows,
            ok = result.success_count,
            errors = result.error_count,
            skipped = result.skipped_count,
            cancelled = result.cancelled,
            "import finished"
        );
        result
    }

    async fn abort(
        &self,
        import_run_id: Uuid,
        total_rows: usize,
        message: String,
        tracker: &mut ProgressTracker<'_>,
    ) -> ImportResult {
        warn!(%import_run_id, "{}", message);
        let result = ImportResult::fatal(total_rows, message);
        tracker.finish(&result);
        self.finish_audit(import_run_id, &result).await;
        result
    }

    async fn begin_audit(
        &self,
        import_run_id: Uuid,
        source: &ImportSource,
        scope: ImportScope,
        total_rows: usize,
    ) {
        let record = ImportRunRecord {
            import_run_id,
            tenant_id: scope.tenant_id,
            form_id: scope.form_id,
            file_name: source.file_name.clone(),
            content_hash: source.content_hash.clone(),
            total_rows,
        };
        let call = self.store.begin_import_run(&record);
        if let Err(e) = with_timeout(self.config.call_timeout, "Import run audit", call).await {
            warn!(%import_run_id, error = %e, "could not record import run");
        }
    }

    async fn finish_audit(&self, import_run_id: Uuid, result: &ImportResult) {
        let summary = serde_json::json!({
            "total_rows": result.total_rows,
            "success_count": result.success_count,
            "error_count": result.error_count,
            "skipped_count": result.skipped_count,
            "fatal_error": result.fatal_error,
        });
        let call = self
            .store
            .finish_import_run(import_run_id, run_status(result), summary);
        if let Err(e) = with_timeout(self.config.call_timeout, "Import run audit", call).await {
            warn!(%import_run_id, error = %e, "could not finish import run");
        }
    }
}

/// Audit status for a finished run.
pub fn run_status(result: &ImportResult) -> &'static str {
    if !result.success {
        "failed"
    } else if result.cancelled {
        "cancelled"
    } else if result.error_count > 0 {
        "partial"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_hash_is_stable() {
        let a = ImportSource::from_bytes("a.csv", b"Terminal ID\nT001\n");
        let b = ImportSource::from_bytes("b.csv", b"Terminal ID\nT001\n");
        assert_eq!(a.content_hash, b.content_hash);
        assert!(a.content_hash.starts_with("sha256:"));
        assert_eq!(a.content_hash.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_run_status() {
        let mut result = ImportResult {
            success: true,
            ..ImportResult::default()
        };
        assert_eq!(run_status(&result), "ok");
        result.error_count = 1;
        assert_eq!(run_status(&result), "partial");
        result.cancelled = true;
        assert_eq!(run_status(&result), "cancelled");
        assert_eq!(run_status(&ImportResult::fatal(1, "boom")), "failed");
    }
}
