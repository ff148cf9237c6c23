//! Field normalization: raw row values -> internal field ids and typed
//! submission attributes.
//!
//! Value transforms are soft: a value that does not fit its transform passes
//! through unchanged and stays visible downstream. Structural columns (code,
//! cycle, timestamp) are strict and reject the row instead.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeMap;

use crate::mapping::{ColumnLayout, FieldMapping, Transform, RESERVED_PREFIX};
use crate::model::{ApprovalStatus, GeoPoint, MappedSubmission, RawRow};

pub const YES: &str = "Yes";
pub const NO: &str = "No";
pub const UNABLE_TO_DETERMINE: &str = "Unable to Determine";

/// `DD/MM/YYYY` -> `YYYY-MM-DD`; anything else is returned as-is.
pub fn transform_date(value: &str) -> String {
    let trimmed = value.trim();
    match NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => value.to_string(),
    }
}

pub fn transform_boolean(value: &str) -> String {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => YES.to_string(),
        "no" | "n" | "false" | "0" => NO.to_string(),
        "unable to determine" | "unknown" | "n/a" => UNABLE_TO_DETERMINE.to_string(),
        _ => value.to_string(),
    }
}

/// Canonical decimal rendering: `12.50` -> `12.5`, `7.0` -> `7`.
pub fn transform_numeric(value: &str) -> String {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => canonical_number(n),
        _ => value.to_string(),
    }
}

fn canonical_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub fn apply_transform(transform: Transform, value: &str) -> String {
    match transform {
        Transform::Date => transform_date(value),
        Transform::Boolean => transform_boolean(value),
        Transform::Numeric => transform_numeric(value),
        Transform::Passthrough => value.to_string(),
    }
}

/// Map every registered column of `row` to its field id. Blank values are
/// omitted: absence means "not answered". Reserved display columns land under
/// their `_`-prefixed keys, verbatim.
pub fn normalize_fields(row: &RawRow, mapping: &FieldMapping) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (column, value) in row.fields() {
        if value.trim().is_empty() {
            continue;
        }
        if let Some(spec) = mapping.lookup(column) {
            out.insert(spec.field.to_string(), apply_transform(spec.transform, value));
        } else if let Some(key) = mapping.reserved_key(column) {
            out.entry(key.to_string()).or_insert_with(|| value.clone());
        }
    }
    out
}

/// Parse the submission timestamp. Day-first dates are the export's native
/// format; ISO forms are accepted too. Date-only values mean midnight UTC.
pub fn parse_submitted_at(value: &str) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: &[&str] = &[
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d"];

    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

/// Positive integer; spreadsheets sometimes render it as `2.0`.
pub fn parse_cycle(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Ok(n) = value.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f >= 1.0 && f <= u32::MAX as f64 => Some(f as u32),
        _ => None,
    }
}

fn parse_location(lat: Option<&str>, lon: Option<&str>) -> Option<GeoPoint> {
    let latitude: f64 = lat?.trim().parse().ok()?;
    let longitude: f64 = lon?.trim().parse().ok()?;
    let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
    valid.then_some(GeoPoint {
        latitude,
        longitude,
    })
}

/// Turn one raw row into a [`MappedSubmission`]. Errors are row-level and
/// carry a message meant for the error report.
pub fn map_row(row: &RawRow, layout: &ColumnLayout, mapping: &FieldMapping) -> Result<MappedSubmission> {
    let entity_code = row
        .get_non_blank(&layout.entity_code)
        .context("Missing entity code")?
        .to_string();
    let supervisor_code = row
        .get_non_blank(&layout.supervisor_code)
        .context("Missing supervisor code")?
        .to_string();

    let cycle_raw = row.get_non_blank(&layout.cycle).unwrap_or("");
    let Some(cycle) = parse_cycle(cycle_raw) else {
        bail!("Invalid cycle value '{}'", cycle_raw);
    };

    let submitted_raw = row.get_non_blank(&layout.submitted_at).unwrap_or("");
    let Some(submitted_at) = parse_submitted_at(submitted_raw) else {
        bail!("Invalid submission date '{}'", submitted_raw);
    };

    let status = match row.get(&layout.approval).map(transform_boolean) {
        Some(flag) if flag == YES => ApprovalStatus::Approved,
        _ => ApprovalStatus::Pending,
    };

    let location = parse_location(
        layout.latitude.as_deref().and_then(|c| row.get(c)),
        layout.longitude.as_deref().and_then(|c| row.get(c)),
    );

    let (display, answers): (BTreeMap<_, _>, BTreeMap<_, _>) = normalize_fields(row, mapping)
        .into_iter()
        .partition(|(key, _)| key.starts_with(RESERVED_PREFIX));

    Ok(MappedSubmission {
        row_number: row.row_number(),
        entity_code,
        supervisor_code,
        cycle,
        submitted_at,
        location,
        answers,
        display,
        status,
    })
}
