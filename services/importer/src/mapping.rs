//! Column registry: which external columns feed which internal fields, and
//! how their values are transformed.
//!
//! The registry is explicit. A column's transform comes from its entry, never
//! from its name; columns that have no entry are ignored.

use anyhow::{bail, Result};

/// Value transform applied to a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// `DD/MM/YYYY` -> `YYYY-MM-DD`
    Date,
    /// yes/no/unable-to-determine normalization
    Boolean,
    /// float re-serialized canonically
    Numeric,
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub column: &'static str,
    pub field: &'static str,
    pub transform: Transform,
}

const fn spec(column: &'static str, field: &'static str, transform: Transform) -> ColumnSpec {
    ColumnSpec {
        column,
        field,
        transform,
    }
}

/// Question columns of the field-survey export.
pub const SURVEY_COLUMNS: &[ColumnSpec] = &[
    spec("Is the terminal functional?", "q_terminal_functional", Transform::Boolean),
    spec("Is branding visible?", "q_branding_visible", Transform::Boolean),
    spec("Is the price list displayed?", "q_price_list_displayed", Transform::Boolean),
    spec("Does the agent have float?", "q_has_float", Transform::Boolean),
    spec("Was the agent trained?", "q_agent_trained", Transform::Boolean),
    spec("Is the agent present?", "q_agent_present", Transform::Boolean),
    spec("Are receipts issued?", "q_receipts_issued", Transform::Boolean),
    spec("Fraud Suspected", "q_fraud_suspected", Transform::Boolean),
    spec("Signage Present", "q_signage_present", Transform::Boolean),
    spec("Date of Last Training", "q_last_training_date", Transform::Date),
    spec("Date Opened", "q_date_opened", Transform::Date),
    spec("Next Visit Date", "q_next_visit_date", Transform::Date),
    spec("Daily Transactions", "q_daily_transactions", Transform::Numeric),
    spec("Float Balance", "q_float_balance", Transform::Numeric),
    spec("Number of Staff", "q_staff_count", Transform::Numeric),
    spec("Distance From Branch (km)", "q_branch_distance_km", Transform::Numeric),
    spec("Shop Condition", "q_shop_condition", Transform::Passthrough),
    spec("Challenges Reported", "q_challenges", Transform::Passthrough),
    spec("Comments", "q_comments", Transform::Passthrough),
];

/// Free-text columns kept verbatim for display under reserved keys.
pub const RESERVED_COLUMNS: &[(&str, &str)] = &[
    ("Region", "_region"),
    ("Branch", "_branch"),
    ("Agent Name", "_entity_name"),
    ("Terminal Name", "_entity_name"),
];

/// Prefix marking reserved (non-answer) keys.
pub const RESERVED_PREFIX: char = '_';

/// Lookup table from external column names to internal fields.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    columns: &'static [ColumnSpec],
    reserved: &'static [(&'static str, &'static str)],
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::new(SURVEY_COLUMNS, RESERVED_COLUMNS)
    }
}

impl FieldMapping {
    pub const fn new(
        columns: &'static [ColumnSpec],
        reserved: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self { columns, reserved }
    }

    pub fn lookup(&self, column: &str) -> Option<&ColumnSpec> {
        let column = column.trim();
        self.columns
            .iter()
            .find(|spec| spec.column.eq_ignore_ascii_case(column))
    }

    pub fn reserved_key(&self, column: &str) -> Option<&'static str> {
        let column = column.trim();
        self.reserved
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, key)| *key)
    }
}

// =============================================================================
// Required columns
// =============================================================================

/// Accepted header names per structural column.
pub const ENTITY_CODE_COLUMNS: &[&str] = &["Terminal ID", "Agent Code", "Entity Code"];
pub const SUBMITTED_AT_COLUMNS: &[&str] = &["Submitted On", "Submission Date", "Submitted At"];
pub const CYCLE_COLUMNS: &[&str] = &["Visit", "Cycle", "Visit Number"];
pub const SUPERVISOR_CODE_COLUMNS: &[&str] = &["Emp. code", "Employee Code", "Supervisor Code"];
pub const APPROVAL_COLUMNS: &[&str] = &["approved", "Approval", "Approval Status"];
pub const LATITUDE_COLUMNS: &[&str] = &["Latitude", "Lat"];
pub const LONGITUDE_COLUMNS: &[&str] = &["Longitude", "Lng", "Long"];

/// Find the header matching one of the candidate names.
fn find_column(headers: &[String], candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|candidate| {
        headers
            .iter()
            .find(|header| header.trim().eq_ignore_ascii_case(candidate))
            .cloned()
    })
}

/// True for any accepted name of a structural (non-question) column.
pub fn is_structural(column: &str) -> bool {
    [
        ENTITY_CODE_COLUMNS,
        SUBMITTED_AT_COLUMNS,
        CYCLE_COLUMNS,
        SUPERVISOR_CODE_COLUMNS,
        APPROVAL_COLUMNS,
        LATITUDE_COLUMNS,
        LONGITUDE_COLUMNS,
    ]
    .iter()
    .flat_map(|names| names.iter())
    .any(|name| name.eq_ignore_ascii_case(column.trim()))
}

/// Where the structural columns live in a given header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub entity_code: String,
    pub submitted_at: String,
    pub cycle: String,
    pub supervisor_code: String,
    pub approval: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
}

impl ColumnLayout {
    /// Names of required columns the header lacks, in a stable order.
    pub fn missing_columns(headers: &[String]) -> Vec<&'static str> {
        [
            ENTITY_CODE_COLUMNS,
            SUBMITTED_AT_COLUMNS,
            CYCLE_COLUMNS,
            SUPERVISOR_CODE_COLUMNS,
            APPROVAL_COLUMNS,
        ]
        .iter()
        .filter(|candidates| find_column(headers, candidates).is_none())
        .map(|candidates| candidates[0])
        .collect()
    }

    /// Pre-flight header check. Fails listing every missing required column.
    pub fn from_headers(headers: &[String]) -> Result<Self> {
        let missing = Self::missing_columns(headers);
        if !missing.is_empty() {
            bail!("Missing required columns: {}", missing.join(", "));
        }

        let required = |candidates: &[&str]| find_column(headers, candidates).unwrap_or_default();
        Ok(Self {
            entity_code: required(ENTITY_CODE_COLUMNS),
            submitted_at: required(SUBMITTED_AT_COLUMNS),
            cycle: required(CYCLE_COLUMNS),
            supervisor_code: required(SUPERVISOR_CODE_COLUMNS),
            approval: required(APPROVAL_COLUMNS),
            latitude: find_column(headers, LATITUDE_COLUMNS),
            longitude: find_column(headers, LONGITUDE_COLUMNS),
        })
    }
}
