use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{
    entity::{Job, JobPatch},
    repository::{JobStore, UpdateOptions},
};

/// Jobs kept in a single JSON array file.
///
/// The file is read once at open and rewritten on every update, so one
/// process should own it.
#[derive(Debug)]
pub struct DiskJobStore {
    path: PathBuf,
    jobs: RwLock<Vec<Job>>,
}

impl DiskJobStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let jobs: Vec<Job> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("DiskJobStore::open: parsing {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("DiskJobStore::open: reading {}", path.display()))
            }
        };

        debug!(path = %path.display(), jobs = jobs.len(), "Loaded job database");

        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    async fn persist(&self, jobs: &[Job]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(jobs)?;
        let tmp = self.path.with_extension("tmp");

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for DiskJobStore {
    async fn fetch(&self, types: &[String]) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;

        let mut listing: Vec<Job> = jobs
            .iter()
            .filter(|job| types.contains(&job.job_type))
            .cloned()
            .collect();
        listing.sort_by_key(|job| job.created_at);

        Ok(listing)
    }

    async fn load(&self, uid: &str) -> Result<Option<Job>> {
        let jobs = self.jobs.read().await;

        Ok(jobs.iter().find(|job| job.uid == uid).cloned())
    }

    async fn update(
        &self,
        uid: &str,
        patch: &JobPatch,
        options: UpdateOptions,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs.write().await;

        let index = match jobs.iter().position(|job| job.uid == uid) {
            Some(index) => index,
            None => return Ok(None),
        };

        if let Some(expected) = &options.expected_state {
            if jobs[index].state != *expected {
                return Ok(None);
            }
        }

        let mut updated = jobs[index].clone();
        updated
            .apply(patch, Utc::now())
            .context("JobStore::update")?;

        let previous = std::mem::replace(&mut jobs[index], updated.clone());
        if let Err(e) = self.persist(&jobs).await {
            jobs[index] = previous;
            return Err(e).context("JobStore::update");
        }

        Ok(Some(updated))
    }
}
