//! Identity resolution: external entity and supervisor codes -> internal ids.
//!
//! All distinct codes of a run are looked up once, in fixed-size chunks,
//! before any row is processed. A code with no match is simply absent from
//! the cache; the row that uses it fails on its own.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::RawRow;
use crate::store::{with_timeout, SubmissionStore};

/// Code -> id maps for one run. Read-only once populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityCache {
    entities: HashMap<String, Uuid>,
    supervisors: HashMap<String, Uuid>,
}

impl EntityCache {
    pub fn entity_id(&self, code: &str) -> Option<Uuid> {
        self.entities.get(code).copied()
    }

    pub fn supervisor_id(&self, code: &str) -> Option<Uuid> {
        self.supervisors.get(code).copied()
    }

    /// Every resolved entity id, sorted for deterministic chunking.
    pub fn entity_ids(&self) -> Vec<Uuid> {
        let ids: BTreeSet<Uuid> = self.entities.values().copied().collect();
        ids.into_iter().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn supervisor_count(&self) -> usize {
        self.supervisors.len()
    }
}

/// Distinct non-blank values of `column`, in first-appearance order.
pub fn distinct_codes(rows: &[RawRow], column: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter_map(|row| row.get_non_blank(column))
        .filter(|code| seen.insert(code.to_string()))
        .map(str::to_string)
        .collect()
}

/// Resolve every code in chunks of `chunk_size`. Any failed or timed-out
/// chunk fails the whole resolution.
pub async fn resolve_identities(
    store: &dyn SubmissionStore,
    tenant_id: Uuid,
    entity_codes: &[String],
    supervisor_codes: &[String],
    chunk_size: usize,
    call_timeout: Duration,
) -> Result<EntityCache> {
    let chunk_size = chunk_size.max(1);
    let mut cache = EntityCache::default();

    for (idx, chunk) in entity_codes.chunks(chunk_size).enumerate() {
        let found = with_timeout(
            call_timeout,
            "Entity code lookup",
            store.resolve_entity_codes(tenant_id, chunk),
        )
        .await?;
        debug!(chunk = idx, asked = chunk.len(), found = found.len(), "entity codes resolved");
        cache.entities.extend(found);
    }

    for (idx, chunk) in supervisor_codes.chunks(chunk_size).enumerate() {
        let found = with_timeout(
            call_timeout,
            "Supervisor code lookup",
            store.resolve_supervisor_codes(tenant_id, chunk),
        )
        .await?;
        debug!(chunk = idx, asked = chunk.len(), found = found.len(), "supervisor codes resolved");
        cache.supervisors.extend(found);
    }

    info!(
        entities = cache.entity_count(),
        entity_codes = entity_codes.len(),
        supervisors = cache.supervisor_count(),
        supervisor_codes = supervisor_codes.len(),
        "identities loaded"
    );
    Ok(cache)
}
