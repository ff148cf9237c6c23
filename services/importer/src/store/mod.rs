//! Backing-store boundary consumed by the pipeline.
//!
//! Everything behind this trait is a network round-trip; the pipeline wraps
//! each call in its own timeout.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{DuplicateKey, NewSubmission};

mod memory;
mod postgres;

pub use memory::{MemoryStore, RecordedRun};
pub use postgres::PgSubmissionStore;

/// Audit row describing one run, written before any submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRunRecord {
    pub import_run_id: Uuid,
    pub tenant_id: Uuid,
    pub form_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub total_rows: usize,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Entity code -> entity id for the codes that exist in the tenant.
    async fn resolve_entity_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>>;

    /// Supervisor code -> user id for the codes that exist in the tenant.
    async fn resolve_supervisor_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>>;

    /// Keys already on record for `form_id` among `entity_ids`.
    async fn existing_keys(&self, form_id: Uuid, entity_ids: &[Uuid]) -> Result<Vec<DuplicateKey>>;

    /// Persist all records or none of them.
    async fn insert_batch(&self, records: &[NewSubmission]) -> Result<()>;

    async fn begin_import_run(&self, run: &ImportRunRecord) -> Result<()>;

    async fn finish_import_run(
        &self,
        import_run_id: Uuid,
        status: &str,
        summary: serde_json::Value,
    ) -> Result<()>;
}

/// Bound a store call. The store's own timeouts still apply underneath.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {}s", what, limit.as_secs_f64())),
    }
}
