//! Core data types shared by every stage of the import pipeline.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Row number of the first data row (the header is row 1).
pub const FIRST_DATA_ROW: usize = 2;

/// One input line keyed by header name, in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    row_number: usize,
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(row_number: usize, fields: Vec<(String, String)>) -> Self {
        Self { row_number, fields }
    }

    /// 1-based line number, header included.
    pub fn row_number(&self) -> usize {
        self.row_number
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Raw value of the first column whose trimmed name matches, ignoring case.
    pub fn get(&self, column: &str) -> Option<&str> {
        let wanted = column.trim();
        self.fields
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    }

    /// Like [`RawRow::get`] but treats blank values as missing.
    pub fn get_non_blank(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Row rendered as a JSON object, used as the offending data of error records.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Review status derived from the approval flag column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Pending,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A row after column mapping and value transforms, before identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedSubmission {
    pub row_number: usize,
    pub entity_code: String,
    pub supervisor_code: String,
    pub cycle: u32,
    pub submitted_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    /// Internal field id -> transformed answer. Unanswered fields are absent.
    pub answers: BTreeMap<String, String>,
    /// Free text kept for display under reserved keys (`_region`, ...).
    pub display: BTreeMap<String, String>,
    pub status: ApprovalStatus,
}

/// Fully resolved record handed to the store's batch insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSubmission {
    pub submission_id: Uuid,
    pub import_run_id: Uuid,
    pub tenant_id: Uuid,
    pub form_id: Uuid,
    pub entity_id: Uuid,
    pub supervisor_id: Uuid,
    pub cycle: u32,
    pub submitted_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub answers: serde_json::Value,
    pub display: serde_json::Value,
    pub status: ApprovalStatus,
    /// Source line, kept for error attribution; not persisted.
    #[serde(skip)]
    pub row_number: usize,
    #[serde(skip)]
    pub entity_code: String,
}

/// (entity, cycle, calendar month) tuple used to reject repeat imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DuplicateKey {
    pub entity_id: Uuid,
    pub cycle: u32,
    pub year: i32,
    pub month: u32,
}

impl DuplicateKey {
    pub fn new(entity_id: Uuid, cycle: u32, submitted_at: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            cycle,
            year: submitted_at.year(),
            month: submitted_at.month(),
        }
    }
}

/// Scope of one run: which tenant owns the codes and which form receives rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportScope {
    pub tenant_id: Uuid,
    pub form_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportErrorRecord {
    pub row: usize,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRecord {
    pub row: usize,
    pub entity_code: String,
    pub cycle: u32,
}

/// Outcome of one run. Partial success is the normal case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    /// Set when a pre-flight or identity-loading failure aborted the run.
    pub fatal_error: Option<String>,
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<ImportErrorRecord>,
    pub duplicates: Vec<DuplicateRecord>,
    pub cancelled: bool,
}

impl ImportResult {
    pub fn fatal(total_rows: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            fatal_error: Some(message.into()),
            total_rows,
            ..Self::default()
        }
    }

    /// Rows accounted for so far.
    pub fn processed(&self) -> usize {
        self.success_count + self.error_count + self.skipped_count
    }
}

/// Snapshot pushed to the progress callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub percentage: u8,
    pub current_batch: usize,
    pub total_batches: usize,
    pub processed_rows: usize,
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub message: String,
}
