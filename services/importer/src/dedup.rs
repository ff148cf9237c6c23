//! Duplicate detection over (entity, cycle, calendar month).
//!
//! The set is seeded from the store and then grows as rows are accepted, so
//! a later row in the same file sees keys introduced by earlier rows. Keys
//! are inserted on acceptance, before the batch write is confirmed.

use anyhow::Result;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::model::DuplicateKey;
use crate::store::{with_timeout, SubmissionStore};

#[derive(Debug, Clone, Default)]
pub struct DuplicateSet {
    keys: HashSet<DuplicateKey>,
}

impl DuplicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`. Returns `false` if it was already present.
    pub fn accept(&mut self, key: DuplicateKey) -> bool {
        self.keys.insert(key)
    }

    #[cfg(test)]
    pub fn contains(&self, key: &DuplicateKey) -> bool {
        self.keys.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<DuplicateKey> for DuplicateSet {
    fn from_iter<I: IntoIterator<Item = DuplicateKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Load keys already on record for `form_id`, chunked over `entity_ids`.
pub async fn seed_existing(
    store: &dyn SubmissionStore,
    form_id: Uuid,
    entity_ids: &[Uuid],
    chunk_size: usize,
    call_timeout: Duration,
) -> Result<DuplicateSet> {
    let mut set = DuplicateSet::new();
    for chunk in entity_ids.chunks(chunk_size.max(1)) {
        let keys = with_timeout(
            call_timeout,
            "Existing submission lookup",
            store.existing_keys(form_id, chunk),
        )
        .await?;
        set.keys.extend(keys);
    }
    info!(existing = set.keys.len(), entities = entity_ids.len(), "duplicate set seeded");
    Ok(set)
}
