//! Tabular input: delimited text and spreadsheet workbooks -> [`RawRow`]s.
//!
//! The first non-blank line is always the header. Input with fewer than two
//! non-blank lines yields an empty [`ParsedInput`] rather than an error, so
//! the pipeline can report it as a fatal pre-flight condition.
//!
//! Header names are trimmed; values are kept verbatim and trimmed where they
//! are read. Workbook cells are rendered as the text an export would contain,
//! so both inputs yield the same rows.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, ExcelDateTime, Range, Reader};
use chrono::NaiveTime;
use std::path::Path;
use tracing::{debug, warn};

use crate::model::{RawRow, FIRST_DATA_ROW};

/// Header names plus data rows in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedInput {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl ParsedInput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parse delimited text. Quoted fields may contain the delimiter and `""`
/// stands for one literal quote.
pub fn parse_text(content: &str, delimiter: u8) -> ParsedInput {
    // Remove UTF-8 BOM if present
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let non_blank = content.lines().filter(|l| !l.trim().is_empty()).count();
    if non_blank < 2 {
        debug!(non_blank, "input has no data rows");
        return ParsedInput::default();
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        match result {
            Ok(record) => records.push(record.iter().map(str::to_string).collect()),
            Err(e) => warn!(record = idx + 1, error = %e, "skipping unreadable record"),
        }
    }

    build_rows(records)
}

/// Read the first sheet of an `.xlsx`/`.xls`/`.xlsb`/`.ods` workbook.
pub fn parse_workbook(path: &Path) -> Result<ParsedInput> {
    let mut workbook: calamine::Sheets<_> =
        open_workbook_auto(path).context("Failed to open workbook")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = sheet_names
        .first()
        .context("Workbook has no sheets")?
        .clone();
    debug!(sheet = %sheet_name, sheets = sheet_names.len(), "reading first sheet");

    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read sheet")?;

    Ok(range_to_input(&range))
}

fn range_to_input(range: &Range<Data>) -> ParsedInput {
    let records = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .collect::<Vec<_>>();

    if records.len() < 2 {
        return ParsedInput::default();
    }
    build_rows(records)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Whole numbers come back from spreadsheets as floats ("1.0")
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_datetime_to_string(dt),
        Data::DateTimeIso(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Date cells in the export's day-first text form; midnight means date only.
fn excel_datetime_to_string(value: &ExcelDateTime) -> String {
    if value.is_duration() {
        return value.as_f64().to_string();
    }
    match value.as_datetime() {
        Some(dt) if dt.time() == NaiveTime::MIN => dt.format("%d/%m/%Y").to_string(),
        Some(dt) => dt.format("%d/%m/%Y %H:%M:%S").to_string(),
        None => value.as_f64().to_string(),
    }
}

/// First record is the header; blank records are dropped and do not consume
/// a row number.
fn build_rows(records: Vec<Vec<String>>) -> ParsedInput {
    let mut iter = records
        .into_iter()
        .filter(|fields| fields.iter().any(|f| !f.trim().is_empty()));

    let Some(headers) = iter.next() else {
        return ParsedInput::default();
    };
    let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();

    let rows = iter
        .enumerate()
        .map(|(idx, values)| {
            let fields = headers
                .iter()
                .enumerate()
                .map(|(col, name)| (name.clone(), values.get(col).cloned().unwrap_or_default()))
                .collect();
            RawRow::new(idx + FIRST_DATA_ROW, fields)
        })
        .collect();

    ParsedInput { headers, rows }
}

/// Decode raw bytes as UTF-8, falling back to Windows-1252 which is what
/// most spreadsheet tools emit for "CSV (Windows)".
pub fn decode_text(bytes: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    debug!("input is not valid UTF-8, decoding as windows-1252");
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Detect workbook inputs by file extension.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "xlsx" | "xls" | "xlsb" | "ods"))
        .unwrap_or(false)
}

/// An input file as read from disk: its raw bytes (for hashing) and rows.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub bytes: Vec<u8>,
    pub input: ParsedInput,
}

/// Load and parse an input file from disk.
pub async fn load_file(path: &Path, delimiter: u8) -> Result<LoadedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    let input = if is_workbook(path) {
        parse_workbook(path)?
    } else {
        parse_text(&decode_text(&bytes), delimiter)
    };
    Ok(LoadedFile { bytes, input })
}
