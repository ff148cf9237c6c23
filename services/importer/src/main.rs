//! Importer CLI - Loads a field-survey export into the submission store
//!
//! Subcommands:
//! - `import`  run a full import (or a full-file dry run) for one form/tenant
//! - `preview` show how the first rows will be mapped, without a database

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use importer::config::PREVIEW_ROWS;
use importer::export::write_error_report;
use importer::mapping::FieldMapping;
use importer::preview::{preview, Preview};
use importer::store::PgSubmissionStore;
use importer::tabular::{load_file, LoadedFile};
use importer::{ImportConfig, ImportResult, ImportScope, ImportSource, Importer, LogReporter};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Bulk imports field-survey exports")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every row of a file into the submission store
    Import {
        /// Delimited text or workbook export
        #[arg(long)]
        file: PathBuf,

        /// Target form (UUID)
        #[arg(long)]
        form_id: Uuid,

        /// Owning tenant (UUID)
        #[arg(long)]
        tenant_id: Uuid,

        /// Rows per write batch (overrides IMPORT_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Write the error report (Row,Error,Data) to this path
        #[arg(long)]
        errors_out: Option<PathBuf>,

        /// Validate and map the whole file without touching the database
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Show how the first rows of a file will be mapped
    Preview {
        #[arg(long)]
        file: PathBuf,

        /// Number of rows to show
        #[arg(long, default_value_t = PREVIEW_ROWS)]
        rows: usize,
    },
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_preview(view: &Preview) {
    println!("Columns ({}):", view.headers.len());
    for (i, h) in view.headers.iter().enumerate() {
        println!("  [{:2}] {}", i, h);
    }
    if !view.missing_columns.is_empty() {
        println!("Missing required columns: {}", view.missing_columns.join(", "));
    }
    if !view.ignored_columns.is_empty() {
        println!("Ignored columns: {}", view.ignored_columns.join(", "));
    }

    println!("\nRows: {} (showing {})", view.total_rows, view.rows.len());
    for row in &view.rows {
        let cycle = row.cycle.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "  row {} | {} | cycle {} | {}",
            row.row,
            row.entity_code.as_deref().unwrap_or("-"),
            cycle,
            row.status.as_deref().unwrap_or("-"),
        );
        for (field, value) in &row.fields {
            println!("      {} = {}", field, value);
        }
        if let Some(problem) = &row.problem {
            println!("      ! {}", problem);
        }
    }
}

fn print_summary(result: &ImportResult) {
    println!("\n=== Import Complete ===");
    if let Some(error) = &result.fatal_error {
        println!("Fatal: {}", error);
    }
    println!("Total rows: {}", result.total_rows);
    println!("Imported:   {}", result.success_count);
    println!("Errors:     {}", result.error_count);
    println!("Duplicates: {}", result.skipped_count);
    if result.cancelled {
        println!("Run was cancelled before all batches were written");
    }

    for error in result.errors.iter().take(5) {
        println!("  row {}: {}", error.row, error.message);
    }
    if result.errors.len() > 5 {
        println!("  ... and {} more errors", result.errors.len() - 5);
    }
}

async fn run_import(
    file: &Path,
    scope: ImportScope,
    config: ImportConfig,
    errors_out: Option<&Path>,
) -> Result<()> {
    let LoadedFile { bytes, input } = load_file(file, config.delimiter).await?;
    let source = ImportSource::from_bytes(file_name(file), &bytes);
    println!("Hash: {}", source.content_hash);
    println!("Rows: {}", input.rows.len());

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let store = PgSubmissionStore::connect(&db_url).await?;
    let importer = Importer::new(Arc::new(store), config);

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight batches");
            on_signal.cancel();
        }
    });

    let result = importer
        .run(&input, &source, scope, Some(&LogReporter), &token)
        .await;
    print_summary(&result);

    if let Some(path) = errors_out {
        write_error_report(path, &result.errors).await?;
        println!("Error report: {}", path.display());
    }

    if let Some(error) = result.fatal_error {
        bail!(error);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ImportConfig::from_env();
    println!("=== Survey Importer ===");

    match args.command {
        Command::Import {
            file,
            form_id,
            tenant_id,
            batch_size,
            errors_out,
            dry_run,
        } => {
            let config = match batch_size {
                Some(size) => config.with_batch_size(size),
                None => config,
            };
            println!("File: {}", file.display());
            println!("Form: {}  Tenant: {}", form_id, tenant_id);
            println!("Mode: {}", if dry_run { "dry-run" } else { "live" });

            if dry_run {
                let LoadedFile { input, .. } = load_file(&file, config.delimiter).await?;
                let view = preview(&input, &FieldMapping::default(), input.rows.len());
                print_preview(&view);
                let problems = view.rows.iter().filter(|r| r.problem.is_some()).count();
                println!(
                    "\nDry run - {} of {} rows would be rejected before lookup",
                    problems, view.total_rows
                );
                return Ok(());
            }

            info!(batch_size = config.batch_size, "import configured");
            run_import(&file, ImportScope { tenant_id, form_id }, config, errors_out.as_deref()).await
        }
        Command::Preview { file, rows } => {
            let LoadedFile { input, .. } = load_file(&file, config.delimiter).await?;
            print_preview(&preview(&input, &FieldMapping::default(), rows));
            Ok(())
        }
    }
}
