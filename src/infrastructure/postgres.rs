use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{postgres::PgRow, types::Json, FromRow, PgPool, Row};

use crate::domain::{
    entity::{Job, JobPatch},
    repository::{JobStore, UpdateOptions},
};

#[derive(Clone, Debug)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_jobs (
                seq BIGSERIAL,
                uid TEXT PRIMARY KEY,
                type TEXT NOT NULL DEFAULT 'default',
                state TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                executor TEXT,
                data JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("JobStore::ensure_schema")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS dispatch_jobs_type_created_at
            ON dispatch_jobs (type, created_at, seq)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("JobStore::ensure_schema")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for PgJobStore {
    async fn fetch(&self, types: &[String]) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = sqlx::query_as(
            r#"
            SELECT * FROM dispatch_jobs
            WHERE type = ANY($1)
            ORDER BY created_at, seq
            "#,
        )
        .bind(types)
        .fetch_all(&self.pool)
        .await
        .context("JobStore::fetch")?;

        Ok(jobs)
    }

    async fn load(&self, uid: &str) -> Result<Option<Job>> {
        let job: Option<Job> = sqlx::query_as("SELECT * FROM dispatch_jobs WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .context("JobStore::load")?;

        Ok(job)
    }

    // The row lock lets `apply` check the transition against the stored state;
    // the write itself is still conditioned on the expected state.
    async fn update(
        &self,
        uid: &str,
        patch: &JobPatch,
        options: UpdateOptions,
    ) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await.context("JobStore::update")?;

        let current: Option<Job> =
            sqlx::query_as("SELECT * FROM dispatch_jobs WHERE uid = $1 FOR UPDATE")
                .bind(uid)
                .fetch_optional(&mut tx)
                .await
                .context("JobStore::update")?;

        let mut job = match current {
            Some(job) => job,
            None => return Ok(None),
        };

        if let Some(expected) = &options.expected_state {
            if job.state != *expected {
                return Ok(None);
            }
        }

        job.apply(patch, Utc::now()).context("JobStore::update")?;

        let updated: Option<Job> = sqlx::query_as(
            r#"
            UPDATE dispatch_jobs
            SET state = $2, executor = $3, data = $4
            WHERE uid = $1 AND ($5::text IS NULL OR state = $5)
            RETURNING *
            "#,
        )
        .bind(uid)
        .bind(job.state.to_string())
        .bind(&job.executor)
        .bind(Json(&job))
        .bind(options.expected_state.as_ref().map(ToString::to_string))
        .fetch_optional(&mut tx)
        .await
        .context("JobStore::update")?;

        if updated.is_some() {
            tx.commit().await.context("JobStore::update")?;
        }

        Ok(updated)
    }
}

// Columns are authoritative over the copies inside `data`.
impl FromRow<'_, PgRow> for Job {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let Json(mut job): Json<Job> = row.try_get("data")?;
        let state: String = row.try_get("state")?;

        job.uid = row.try_get("uid")?;
        job.job_type = row.try_get("type")?;
        job.state = state
            .parse()
            .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?;
        job.executor = row.try_get("executor")?;

        Ok(job)
    }
}
