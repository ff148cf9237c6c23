//! Importer Service - Bulk loads field-survey exports into the submission store
//!
//! Responsibilities:
//! - Parse delimited text / workbook exports into rows
//! - Map export columns to internal form fields (fixed registry)
//! - Resolve terminal and supervisor codes to internal ids, once per run
//! - Reject repeat submissions per entity, cycle and calendar month
//! - Write accepted rows in batches, isolating failures per batch
//! - Report progress and an itemized result (errors, duplicates)
//!
//! A run never aborts on a bad row or a failed batch. Only an empty file, a
//! header missing required columns, or a failed identity lookup end it early.

pub mod config;
pub mod dedup;
pub mod export;
pub mod mapping;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod resolver;
pub mod store;
pub mod tabular;
pub mod writer;

pub use config::ImportConfig;
pub use model::{ImportResult, ImportScope, ProgressUpdate};
pub use pipeline::{ImportSource, Importer};
pub use progress::{LogReporter, ProgressReporter};
