//! In-process [`SubmissionStore`] used by tests and local experiments.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::{ImportRunRecord, SubmissionStore};
use crate::model::{DuplicateKey, NewSubmission};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub run: ImportRunRecord,
    pub status: Option<String>,
    pub summary: Option<serde_json::Value>,
}

#[derive(Default)]
struct Inner {
    entities: HashMap<(Uuid, String), Uuid>,
    supervisors: HashMap<(Uuid, String), Uuid>,
    submissions: Vec<NewSubmission>,
    runs: Vec<RecordedRun>,
    rejected_codes: HashSet<String>,
    fail_lookups: bool,
    insert_delay: Option<Duration>,
    lookup_calls: usize,
    insert_calls: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_entity(&self, tenant_id: Uuid, code: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner().entities.insert((tenant_id, code.to_string()), id);
        id
    }

    pub fn add_supervisor(&self, tenant_id: Uuid, code: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner().supervisors.insert((tenant_id, code.to_string()), id);
        id
    }

    /// Make any batch containing `entity_code` fail like a constraint violation.
    pub fn reject_batches_with(&self, entity_code: &str) {
        self.inner().rejected_codes.insert(entity_code.to_string());
    }

    pub fn fail_lookups(&self) {
        self.inner().fail_lookups = true;
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.inner().insert_delay = Some(delay);
    }

    pub fn submissions(&self) -> Vec<NewSubmission> {
        self.inner().submissions.clone()
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.inner().runs.clone()
    }

    pub fn lookup_calls(&self) -> usize {
        self.inner().lookup_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.inner().insert_calls
    }

    fn resolve(
        &self,
        tenant_id: Uuid,
        codes: &[String],
        pick: impl Fn(&Inner) -> &HashMap<(Uuid, String), Uuid>,
    ) -> Result<HashMap<String, Uuid>> {
        let mut inner = self.inner();
        inner.lookup_calls += 1;
        if inner.fail_lookups {
            bail!("connection reset by peer");
        }
        let table = pick(&*inner);
        Ok(codes
            .iter()
            .filter_map(|code| {
                table
                    .get(&(tenant_id, code.clone()))
                    .map(|id| (code.clone(), *id))
            })
            .collect())
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn resolve_entity_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        self.resolve(tenant_id, codes, |inner| &inner.entities)
    }

    async fn resolve_supervisor_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        self.resolve(tenant_id, codes, |inner| &inner.supervisors)
    }

    async fn existing_keys(&self, form_id: Uuid, entity_ids: &[Uuid]) -> Result<Vec<DuplicateKey>> {
        let mut inner = self.inner();
        inner.lookup_calls += 1;
        if inner.fail_lookups {
            bail!("connection reset by peer");
        }
        let wanted: HashSet<&Uuid> = entity_ids.iter().collect();
        Ok(inner
            .submissions
            .iter()
            .filter(|s| s.form_id == form_id && wanted.contains(&s.entity_id))
            .map(|s| DuplicateKey::new(s.entity_id, s.cycle, s.submitted_at))
            .collect())
    }

    async fn insert_batch(&self, records: &[NewSubmission]) -> Result<()> {
        let delay = {
            let mut inner = self.inner();
            inner.insert_calls += 1;
            inner.insert_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner();
        if let Some(bad) = records
            .iter()
            .find(|r| inner.rejected_codes.contains(&r.entity_code))
        {
            bail!(
                "duplicate key value violates unique constraint (entity {})",
                bad.entity_code
            );
        }
        inner.submissions.extend_from_slice(records);
        Ok(())
    }

    async fn begin_import_run(&self, run: &ImportRunRecord) -> Result<()> {
        self.inner().runs.push(RecordedRun {
            run: run.clone(),
            status: None,
            summary: None,
        });
        Ok(())
    }

    async fn finish_import_run(
        &self,
        import_run_id: Uuid,
        status: &str,
        summary: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner();
        let Some(recorded) = inner
            .runs
            .iter_mut()
            .find(|r| r.run.import_run_id == import_run_id)
        else {
            bail!("Import run {} not found", import_run_id);
        };
        recorded.status = Some(status.to_string());
        recorded.summary = Some(summary);
        Ok(())
    }
}
