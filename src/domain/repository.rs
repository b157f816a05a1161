use anyhow::Result;

use super::entity::{Job, JobPatch, JobState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// When set, the write only happens if the stored state still equals this.
    pub expected_state: Option<JobState>,
}

impl UpdateOptions {
    pub fn transactional(expected_state: JobState) -> Self {
        Self {
            expected_state: Some(expected_state),
        }
    }
}

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs of any of the given types, in every state, oldest first.
    async fn fetch(&self, types: &[String]) -> Result<Vec<Job>>;

    async fn load(&self, uid: &str) -> Result<Option<Job>>;

    /// Returns `None` when the job is gone or the expected state no longer holds.
    async fn update(&self, uid: &str, patch: &JobPatch, options: UpdateOptions)
        -> Result<Option<Job>>;
}
