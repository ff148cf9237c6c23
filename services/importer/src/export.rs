//! Error report export: `Row,Error,Data` delimited text.

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::ImportErrorRecord;

/// Render error records as CSV. `Data` holds the offending row as JSON text
/// and is always quoted.
pub fn errors_to_csv(errors: &[ImportErrorRecord]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(Vec::new());

    writer.write_record(["Row", "Error", "Data"])?;
    for error in errors {
        let data = serde_json::to_string(&error.data).context("Failed to serialize row data")?;
        writer.write_record([error.row.to_string(), error.message.clone(), data])?;
    }

    let bytes = writer.into_inner().context("Failed to flush error report")?;
    String::from_utf8(bytes).context("Error report is not valid UTF-8")
}

pub async fn write_error_report(path: &Path, errors: &[ImportErrorRecord]) -> Result<()> {
    let content = errors_to_csv(errors)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write error report {}", path.display()))
}
