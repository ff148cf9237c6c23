//! Dry-run view of how the first rows of a file will be mapped.
//!
//! Runs parsing and normalization only; never touches the store.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::mapping::{ColumnLayout, FieldMapping};
use crate::model::RawRow;
use crate::normalize::{map_row, normalize_fields};
use crate::tabular::ParsedInput;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub row: usize,
    /// Field id -> transformed value, reserved display keys included.
    pub fields: BTreeMap<String, String>,
    pub entity_code: Option<String>,
    pub cycle: Option<u32>,
    pub status: Option<String>,
    /// Why the row would be rejected before identity resolution, if at all.
    pub problem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub headers: Vec<String>,
    pub missing_columns: Vec<&'static str>,
    /// Headers that are neither structural nor in the field registry.
    pub ignored_columns: Vec<String>,
    pub total_rows: usize,
    pub rows: Vec<PreviewRow>,
}

pub fn preview(input: &ParsedInput, mapping: &FieldMapping, limit: usize) -> Preview {
    let layout = ColumnLayout::from_headers(&input.headers).ok();

    let ignored_columns = input
        .headers
        .iter()
        .filter(|h| {
            mapping.lookup(h).is_none()
                && mapping.reserved_key(h).is_none()
                && !crate::mapping::is_structural(h)
        })
        .cloned()
        .collect();

    let rows = input
        .rows
        .iter()
        .take(limit)
        .map(|row| preview_row(row, layout.as_ref(), mapping))
        .collect();

    Preview {
        headers: input.headers.clone(),
        missing_columns: ColumnLayout::missing_columns(&input.headers),
        ignored_columns,
        total_rows: input.rows.len(),
        rows,
    }
}

fn preview_row(row: &RawRow, layout: Option<&ColumnLayout>, mapping: &FieldMapping) -> PreviewRow {
    let fields = normalize_fields(row, mapping);
    let Some(layout) = layout else {
        return PreviewRow {
            row: row.row_number(),
            fields,
            entity_code: None,
            cycle: None,
            status: None,
            problem: Some("Missing required columns".to_string()),
        };
    };

    match map_row(row, layout, mapping) {
        Ok(mapped) => PreviewRow {
            row: row.row_number(),
            fields,
            entity_code: Some(mapped.entity_code),
            cycle: Some(mapped.cycle),
            status: Some(mapped.status.as_str().to_string()),
            problem: None,
        },
        Err(e) => PreviewRow {
            row: row.row_number(),
            fields,
            entity_code: row.get_non_blank(&layout.entity_code).map(str::to_string),
            cycle: None,
            status: None,
            problem: Some(e.to_string()),
        },
    }
}
