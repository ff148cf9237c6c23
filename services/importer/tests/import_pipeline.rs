use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, Timelike};
use importer::model::ApprovalStatus;
use importer::pipeline::MSG_NO_DATA;
use importer::store::MemoryStore;
use importer::tabular::parse_text;
use importer::{ImportConfig, ImportResult, ImportScope, ImportSource, Importer, ProgressUpdate};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const HEADER: &str = "Terminal ID,Submitted On,Visit,Emp. code,approved";

struct Fixture {
    store: Arc<MemoryStore>,
    scope: ImportScope,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            scope: ImportScope {
                tenant_id: Uuid::new_v4(),
                form_id: Uuid::new_v4(),
            },
        }
    }

    fn with_codes(entities: &[&str], supervisors: &[&str]) -> Self {
        let fixture = Self::new();
        for code in entities {
            fixture.store.add_entity(fixture.scope.tenant_id, code);
        }
        for code in supervisors {
            fixture.store.add_supervisor(fixture.scope.tenant_id, code);
        }
        fixture
    }

    fn importer(&self, config: ImportConfig) -> Importer {
        Importer::new(self.store.clone(), config)
    }

    async fn run(&self, csv: &str, config: ImportConfig) -> ImportResult {
        let input = parse_text(csv, b',');
        let source = ImportSource::from_bytes("survey.csv", csv.as_bytes());
        self.importer(config)
            .run(&input, &source, self.scope, None, &CancellationToken::new())
            .await
    }
}

fn csv(rows: &[&str]) -> String {
    let mut out = format!("{HEADER}\n");
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    out
}

fn assert_accounted(result: &ImportResult) {
    assert_eq!(
        result.success_count + result.error_count + result.skipped_count,
        result.total_rows,
        "{result:?}"
    );
}

#[tokio::test]
async fn test_single_row_is_accepted() {
    let fx = Fixture::new();
    let entity_id = fx.store.add_entity(fx.scope.tenant_id, "T001");
    let supervisor_id = fx.store.add_supervisor(fx.scope.tenant_id, "SUP9");

    let result = fx.run(&csv(&["T001,01/03/2024,1,SUP9,true"]), ImportConfig::default()).await;

    assert!(result.success);
    assert_eq!(result.total_rows, 1);
    assert_eq!(result.success_count, 1);
    assert!(result.errors.is_empty());

    let stored = fx.store.submissions();
    assert_eq!(stored.len(), 1);
    let submission = &stored[0];
    assert_eq!(submission.entity_id, entity_id);
    assert_eq!(submission.supervisor_id, supervisor_id);
    assert_eq!(submission.cycle, 1);
    assert_eq!(submission.status, ApprovalStatus::Approved);
    assert_eq!(submission.form_id, fx.scope.form_id);
    assert_eq!(submission.tenant_id, fx.scope.tenant_id);
    assert_eq!(
        (submission.submitted_at.year(), submission.submitted_at.month(), submission.submitted_at.day()),
        (2024, 3, 1)
    );
    assert_eq!(submission.submitted_at.hour(), 0);
}

#[tokio::test]
async fn test_reimport_is_skipped_as_duplicate() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = csv(&["T001,01/03/2024,1,SUP9,true"]);

    let first = fx.run(&file, ImportConfig::default()).await;
    assert_eq!(first.success_count, 1);

    let second = fx.run(&file, ImportConfig::default()).await;
    assert!(second.success);
    assert_eq!(second.skipped_count, 1);
    assert_eq!(second.success_count, 0);
    assert_eq!(second.duplicates.len(), 1);
    assert_eq!(second.duplicates[0].row, 2);
    assert_eq!(second.duplicates[0].entity_code, "T001");
    assert_eq!(second.duplicates[0].cycle, 1);
    assert_eq!(fx.store.submissions().len(), 1);
}

#[tokio::test]
async fn test_duplicate_within_one_file_keeps_first_row() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,true",
        "T001,20/03/2024,1,SUP9,false",
    ]);

    let result = fx.run(&file, ImportConfig::default()).await;

    assert_eq!(result.success_count, 1);
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.duplicates[0].row, 3);
    assert_eq!(fx.store.submissions()[0].status, ApprovalStatus::Approved);
    assert_accounted(&result);
}

#[tokio::test]
async fn test_same_cycle_in_another_month_is_not_a_duplicate() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,true",
        "T001,01/04/2024,1,SUP9,true",
        "T001,02/03/2024,2,SUP9,true",
    ]);

    let result = fx.run(&file, ImportConfig::default()).await;

    assert_eq!(result.success_count, 3);
    assert_eq!(result.skipped_count, 0);
}

#[tokio::test]
async fn test_unknown_codes_are_row_errors() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = csv(&[
        "T404,01/03/2024,1,SUP9,true",
        "T001,01/03/2024,1,NOBODY,true",
        "T001,01/03/2024,1,SUP9,true",
    ]);

    let result = fx.run(&file, ImportConfig::default()).await;

    assert!(result.success);
    assert_eq!(result.success_count, 1);
    assert_eq!(result.error_count, 2);
    assert!(result.duplicates.is_empty());
    assert_eq!(result.errors[0].row, 2);
    assert_eq!(result.errors[0].message, "Entity code 'T404' not found");
    assert_eq!(result.errors[0].data["Terminal ID"], "T404");
    assert_eq!(result.errors[1].row, 3);
    assert!(result.errors[1].message.contains("Supervisor code 'NOBODY' not found"));
    assert_accounted(&result);
}

#[tokio::test]
async fn test_invalid_rows_do_not_stop_the_run() {
    let fx = Fixture::with_codes(&["T001", "T002", "T003"], &["SUP9"]);
    let file = csv(&[
        "T001,01/03/2024,abc,SUP9,yes",
        "T002,yesterday,1,SUP9,yes",
        ",01/03/2024,1,SUP9,yes",
        "T003,01/03/2024,1,SUP9,no",
    ]);

    let result = fx.run(&file, ImportConfig::default()).await;

    assert_eq!(result.success_count, 1);
    assert_eq!(result.error_count, 3);
    let messages: Vec<&str> = result.errors.iter().map(|e| e.message.as_str()).collect();
    assert!(messages[0].contains("Invalid cycle value 'abc'"));
    assert!(messages[1].contains("Invalid submission date 'yesterday'"));
    assert!(messages[2].contains("Missing entity code"));
    assert_eq!(fx.store.submissions()[0].status, ApprovalStatus::Pending);
    assert_accounted(&result);
}

#[tokio::test]
async fn test_failed_batch_does_not_block_later_batches() {
    let fx = Fixture::with_codes(&["T001", "T002", "T003", "T004", "T005"], &["SUP9"]);
    fx.store.reject_batches_with("T003");
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,yes",
        "T002,01/03/2024,1,SUP9,yes",
        "T003,01/03/2024,1,SUP9,yes",
        "T004,01/03/2024,1,SUP9,yes",
        "T005,01/03/2024,1,SUP9,yes",
    ]);
    let config = ImportConfig {
        batch_size: 2,
        ..ImportConfig::default()
    };

    let result = fx.run(&file, config).await;

    assert!(result.success);
    assert_eq!(result.success_count, 3);
    assert_eq!(result.error_count, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row, 4);
    assert!(result.errors[0].message.starts_with("Batch of 2 rows failed"));
    assert_eq!(fx.store.insert_calls(), 3);
    assert_accounted(&result);

    let runs = fx.store.runs();
    assert_eq!(runs[0].status.as_deref(), Some("partial"));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes() {
    let fx = Fixture::with_codes(&["T001", "T002", "T003"], &["SUP9"]);
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,yes",
        "T002,01/03/2024,1,SUP9,yes",
        "T003,01/03/2024,1,SUP9,yes",
    ]);
    let updates = Mutex::new(Vec::new());
    let reporter = |u: &ProgressUpdate| updates.lock().unwrap().push(u.clone());
    let config = ImportConfig {
        batch_size: 1,
        ..ImportConfig::default()
    };

    let input = parse_text(&file, b',');
    let source = ImportSource::from_bytes("survey.csv", file.as_bytes());
    let result = fx
        .importer(config)
        .run(&input, &source, fx.scope, Some(&reporter), &CancellationToken::new())
        .await;
    assert_eq!(result.success_count, 3);

    let updates = updates.into_inner().unwrap();
    let pcts: Vec<u8> = updates.iter().map(|u| u.percentage).collect();
    assert!(pcts.windows(2).all(|w| w[0] <= w[1]), "{pcts:?}");
    assert_eq!(updates[0].message, "Loading identities...");
    assert_eq!(updates[1].message, "Checking for duplicates...");

    let last = updates.last().unwrap();
    assert_eq!(last.percentage, 100);
    assert_eq!(last.message, "Import complete!");
    assert_eq!(last.processed_rows, 3);
    assert_eq!(last.total_batches, 3);
    assert!(updates[..updates.len() - 1].iter().all(|u| u.percentage < 100));
}

#[tokio::test]
async fn test_reporter_does_not_change_the_outcome() {
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,yes",
        "T404,01/03/2024,1,SUP9,yes",
    ]);

    let quiet = Fixture::with_codes(&["T001"], &["SUP9"]);
    let without = quiet.run(&file, ImportConfig::default()).await;

    let loud = Fixture::with_codes(&["T001"], &["SUP9"]);
    let input = parse_text(&file, b',');
    let source = ImportSource::from_bytes("survey.csv", file.as_bytes());
    let reporter = |_: &ProgressUpdate| {};
    let with = loud
        .importer(ImportConfig::default())
        .run(&input, &source, loud.scope, Some(&reporter), &CancellationToken::new())
        .await;

    assert_eq!(without, with);
}

#[tokio::test]
async fn test_concurrent_writes_keep_progress_in_order() {
    let codes: Vec<String> = (1..=6).map(|i| format!("T{i:03}")).collect();
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let fx = Fixture::with_codes(&code_refs, &["SUP9"]);
    fx.store.set_insert_delay(Duration::from_millis(10));

    let rows: Vec<String> = codes.iter().map(|c| format!("{c},01/03/2024,1,SUP9,yes")).collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let file = csv(&row_refs);

    let batches = Mutex::new(Vec::new());
    let reporter = |u: &ProgressUpdate| {
        if u.message.starts_with("Processed batch") {
            batches.lock().unwrap().push(u.current_batch);
        }
    };
    let config = ImportConfig {
        batch_size: 2,
        write_concurrency: 3,
        ..ImportConfig::default()
    };

    let input = parse_text(&file, b',');
    let source = ImportSource::from_bytes("survey.csv", file.as_bytes());
    let result = fx
        .importer(config)
        .run(&input, &source, fx.scope, Some(&reporter), &CancellationToken::new())
        .await;

    assert_eq!(result.success_count, 6);
    assert_eq!(batches.into_inner().unwrap(), vec![1, 2, 3]);
    assert_eq!(fx.store.submissions().len(), 6);
}

#[tokio::test]
async fn test_cancelled_run_counts_unwritten_rows() {
    let fx = Fixture::with_codes(&["T001", "T002", "T003"], &["SUP9"]);
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,yes",
        "T002,01/03/2024,1,SUP9,yes",
        "T003,01/03/2024,1,SUP9,yes",
    ]);
    let token = CancellationToken::new();
    token.cancel();

    let messages = Mutex::new(Vec::new());
    let reporter = |u: &ProgressUpdate| messages.lock().unwrap().push(u.message.clone());
    let config = ImportConfig {
        batch_size: 2,
        ..ImportConfig::default()
    };
    let input = parse_text(&file, b',');
    let source = ImportSource::from_bytes("survey.csv", file.as_bytes());
    let result = fx
        .importer(config)
        .run(&input, &source, fx.scope, Some(&reporter), &token)
        .await;

    assert!(result.cancelled);
    assert_eq!(result.success_count, 0);
    assert_eq!(result.error_count, 3);
    assert_eq!(result.errors.len(), 2);
    assert_eq!(result.errors[1].row, 4);
    assert_eq!(fx.store.insert_calls(), 0);
    assert_accounted(&result);
    assert_eq!(
        messages.into_inner().unwrap().last().map(String::as_str),
        Some("Import cancelled")
    );
    assert_eq!(fx.store.runs()[0].status.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_header_only_file_is_fatal() {
    let fx = Fixture::new();
    let result = fx.run(&format!("{HEADER}\n"), ImportConfig::default()).await;

    assert!(!result.success);
    assert_eq!(result.fatal_error.as_deref(), Some(MSG_NO_DATA));
    assert_eq!(result.total_rows, 0);
    assert!(fx.store.runs().is_empty());
}

#[tokio::test]
async fn test_missing_required_columns_is_fatal() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let result = fx
        .run("Terminal ID,Visit\nT001,1\n", ImportConfig::default())
        .await;

    assert!(!result.success);
    let message = result.fatal_error.unwrap();
    assert!(message.starts_with("Missing required columns"));
    assert!(message.contains("Submitted On"));
    assert!(message.contains("Emp. code"));
    assert!(fx.store.submissions().is_empty());
    assert_eq!(fx.store.lookup_calls(), 0);
}

#[tokio::test]
async fn test_lookup_failure_is_fatal() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    fx.store.fail_lookups();

    let result = fx.run(&csv(&["T001,01/03/2024,1,SUP9,yes"]), ImportConfig::default()).await;

    assert!(!result.success);
    assert!(result
        .fatal_error
        .as_deref()
        .unwrap()
        .starts_with("Failed to load identities"));
    assert_eq!(result.success_count, 0);
    assert!(fx.store.submissions().is_empty());
    assert_eq!(fx.store.runs()[0].status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_lookup_failure_still_ends_progress_at_100() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    fx.store.fail_lookups();
    let file = csv(&["T001,01/03/2024,1,SUP9,yes"]);

    let updates = Mutex::new(Vec::new());
    let reporter =
        |u: &ProgressUpdate| updates.lock().unwrap().push((u.percentage, u.message.clone()));
    let input = parse_text(&file, b',');
    let source = ImportSource::from_bytes("survey.csv", file.as_bytes());
    let result = fx
        .importer(ImportConfig::default())
        .run(&input, &source, fx.scope, Some(&reporter), &CancellationToken::new())
        .await;

    assert!(!result.success);
    let updates = updates.into_inner().unwrap();
    assert_eq!(updates.first().map(|u| u.0), Some(5));
    assert_eq!(updates.last(), Some(&(100, "Import failed".to_string())));
}

#[tokio::test]
async fn test_row_from_failed_batch_stays_seen() {
    let fx = Fixture::with_codes(&["T001", "T002"], &["SUP9"]);
    fx.store.reject_batches_with("T001");
    let file = csv(&[
        "T001,01/03/2024,1,SUP9,yes",
        "T002,01/03/2024,1,SUP9,yes",
        "T001,15/03/2024,1,SUP9,yes",
    ]);
    let config = ImportConfig {
        batch_size: 1,
        ..ImportConfig::default()
    };

    let result = fx.run(&file, config).await;

    assert!(result.success);
    assert_eq!(result.success_count, 1);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].row, 2);
    assert!(result.errors[0].message.starts_with("Batch of 1 rows failed"));
    assert_eq!(result.skipped_count, 1);
    assert_eq!(result.duplicates[0].row, 4);
    assert_eq!(result.duplicates[0].entity_code, "T001");
    assert_eq!(fx.store.insert_calls(), 2);
    assert_accounted(&result);
}

#[tokio::test]
async fn test_run_is_audited() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = csv(&["T001,01/03/2024,1,SUP9,yes"]);

    fx.run(&file, ImportConfig::default()).await;

    let runs = fx.store.runs();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.run.file_name, "survey.csv");
    assert_eq!(run.run.total_rows, 1);
    assert_eq!(
        run.run.content_hash,
        ImportSource::from_bytes("x", file.as_bytes()).content_hash
    );
    assert_eq!(run.status.as_deref(), Some("ok"));
    let summary = run.summary.as_ref().unwrap();
    assert_eq!(summary["success_count"], 1);

    let stored = fx.store.submissions();
    assert_eq!(stored[0].import_run_id, run.run.import_run_id);
}

#[tokio::test]
async fn test_answers_and_display_fields_are_stored() {
    let fx = Fixture::with_codes(&["T001"], &["SUP9"]);
    let file = "Terminal ID,Submitted On,Visit,Emp. code,approved,Region,Is branding visible?,Date Opened,Daily Transactions,Unmapped\n\
                T001,01/03/2024,1,SUP9,yes,North,y,15/01/2020,12.50,ignored\n";

    let result = fx.run(file, ImportConfig::default()).await;
    assert_eq!(result.success_count, 1);

    let stored = &fx.store.submissions()[0];
    assert_eq!(stored.answers["q_branding_visible"], "Yes");
    assert_eq!(stored.answers["q_date_opened"], "2020-01-15");
    assert_eq!(stored.answers["q_daily_transactions"], "12.5");
    assert!(stored.answers.get("_region").is_none());
    assert_eq!(stored.display["_region"], "North");
    assert!(stored.answers.get("Unmapped").is_none());
}
