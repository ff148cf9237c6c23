//! Postgres implementation of [`SubmissionStore`] (schema in `schema.sql`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ImportRunRecord, SubmissionStore};
use crate::model::{DuplicateKey, NewSubmission};

#[derive(Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    async fn resolve_codes(
        &self,
        sql: &str,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        let rows: Vec<(String, Uuid)> = sqlx::query_as(sql)
            .bind(tenant_id)
            .bind(codes)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn resolve_entity_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        self.resolve_codes(
            "SELECT code, entity_id FROM entities WHERE tenant_id = $1 AND code = ANY($2)",
            tenant_id,
            codes,
        )
        .await
        .context("Entity code lookup failed")
    }

    async fn resolve_supervisor_codes(
        &self,
        tenant_id: Uuid,
        codes: &[String],
    ) -> Result<HashMap<String, Uuid>> {
        self.resolve_codes(
            "SELECT employee_code, user_id FROM supervisors WHERE tenant_id = $1 AND employee_code = ANY($2)",
            tenant_id,
            codes,
        )
        .await
        .context("Supervisor code lookup failed")
    }

    async fn existing_keys(&self, form_id: Uuid, entity_ids: &[Uuid]) -> Result<Vec<DuplicateKey>> {
        let rows: Vec<(Uuid, i32, i32, i32)> = sqlx::query_as(
            r#"
            SELECT entity_id,
                   cycle,
                   EXTRACT(YEAR FROM submitted_at AT TIME ZONE 'UTC')::int AS year,
                   EXTRACT(MONTH FROM submitted_at AT TIME ZONE 'UTC')::int AS month
            FROM submissions
            WHERE form_id = $1 AND entity_id = ANY($2)
            "#,
        )
        .bind(form_id)
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await
        .context("Existing submission lookup failed")?;

        Ok(rows
            .into_iter()
            .map(|(entity_id, cycle, year, month)| DuplicateKey {
                entity_id,
                cycle: cycle.max(0) as u32,
                year,
                month: month.max(0) as u32,
            })
            .collect())
    }

    async fn insert_batch(&self, records: &[NewSubmission]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO submissions \
             (submission_id, import_run_id, tenant_id, form_id, entity_id, supervisor_id, \
              cycle, submitted_at, latitude, longitude, answers, display, status) ",
        );
        builder.push_values(records, |mut row, r| {
            row.push_bind(r.submission_id)
                .push_bind(r.import_run_id)
                .push_bind(r.tenant_id)
                .push_bind(r.form_id)
                .push_bind(r.entity_id)
                .push_bind(r.supervisor_id)
                .push_bind(r.cycle as i32)
                .push_bind(r.submitted_at)
                .push_bind(r.latitude)
                .push_bind(r.longitude)
                .push_bind(r.answers.clone())
                .push_bind(r.display.clone())
                .push_bind(r.status.as_str());
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .context("Batch insert failed")?;
        Ok(())
    }

    async fn begin_import_run(&self, run: &ImportRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_runs
            (import_run_id, tenant_id, form_id, file_name, content_hash, total_rows, status, detail)
            VALUES ($1, $2, $3, $4, $5, $6, 'running', '{}')
            "#,
        )
        .bind(run.import_run_id)
        .bind(run.tenant_id)
        .bind(run.form_id)
        .bind(&run.file_name)
        .bind(&run.content_hash)
        .bind(run.total_rows as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record import run")?;
        Ok(())
    }

    async fn finish_import_run(
        &self,
        import_run_id: Uuid,
        status: &str,
        summary: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET finished_at = now(), status = $2, detail = detail || $3
            WHERE import_run_id = $1
            "#,
        )
        .bind(import_run_id)
        .bind(status)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("Failed to finish import run")?;
        Ok(())
    }
}
