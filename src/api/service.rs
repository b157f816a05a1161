use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    concurrency::{self, ConcurrencyLimits},
    entity::{Job, JobPatch, JobState},
    filter,
    load_balance::OrderingPolicy,
    repository::{JobStore, UpdateOptions},
    request::{TypeRequest, WorkerIdentity},
};

/// Called with the freshly picked job before it is handed to the worker.
#[async_trait::async_trait]
pub trait PickupHook: Send + Sync {
    async fn on_pickup(&self, job: Job) -> Result<Job>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PickupResponse {
    Picked(Job),
    NoWork,
}

#[derive(Debug, Clone)]
pub struct PickupSettings {
    pub ordering: OrderingPolicy,
    pub limits: ConcurrencyLimits,
    pub hook_timeout: Duration,
    /// Extra attempts after another dispatcher claimed our winner first.
    pub retries: u32,
}

impl Default for PickupSettings {
    fn default() -> Self {
        Self {
            ordering: OrderingPolicy::default(),
            limits: ConcurrencyLimits::new(),
            hook_timeout: Duration::from_secs(5),
            retries: 2,
        }
    }
}

enum Claim {
    Won(Job),
    Lost(String),
    Empty,
}

#[derive(Debug)]
pub struct PickupServiceImpl<S>
where
    S: JobStore,
{
    store: S,
    settings: PickupSettings,
    // Held for the whole decide-then-write sequence.
    lock: Mutex<()>,
}

impl<S> PickupServiceImpl<S>
where
    S: JobStore,
{
    pub fn new(store: S, settings: PickupSettings) -> Self {
        Self {
            store,
            settings,
            lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub async fn pickup(
        &self,
        requests: &[TypeRequest],
        identity: &WorkerIdentity,
        hook: Option<&dyn PickupHook>,
    ) -> Result<PickupResponse> {
        let executor = identity.executor();

        let _guard = self.lock.lock().await;

        let mut picked = None;
        for attempt in 0..=self.settings.retries {
            match self.claim(requests, &executor).await? {
                Claim::Won(job) => {
                    picked = Some(job);
                    break;
                }
                Claim::Empty => break,
                Claim::Lost(uid) => {
                    // Best effort, it only feeds the log line.
                    let holder = match self.store.load(&uid).await {
                        Ok(job) => job.and_then(|job| job.executor),
                        Err(e) => {
                            debug!(uid, error = ?e, "Could not load claimed job");
                            None
                        }
                    };
                    warn!(uid, attempt, ?holder, "Job claimed elsewhere");
                }
            }
        }

        let job = match picked {
            Some(job) => job,
            None => {
                info!(executor, "No work available");
                return Ok(PickupResponse::NoWork);
            }
        };

        info!(uid = %job.uid, job_type = %job.job_type, executor, "Job picked");

        let job = match hook {
            Some(hook) => self.run_hook(hook, job).await,
            None => job,
        };

        Ok(PickupResponse::Picked(job))
    }

    async fn claim(&self, requests: &[TypeRequest], executor: &str) -> Result<Claim> {
        let types = TypeRequest::coarse_types(requests);
        let listing = self.store.fetch(&types).await?;

        let saturated = concurrency::saturated_types(&listing, &self.settings.limits);
        if !saturated.is_empty() {
            debug!(?saturated, "Skipping types at their concurrency limit");
        }

        let open: Vec<Job> = listing
            .into_iter()
            .filter(|job| !saturated.contains(&job.job_type))
            .collect();
        let candidates = filter::eligible(open, requests);
        debug!(
            candidates = candidates.len(),
            ordering = %self.settings.ordering,
            "Eligible candidates"
        );

        let winner = self
            .settings
            .ordering
            .select(candidates, &mut rand::thread_rng());
        let winner = match winner {
            Some(job) => job,
            None => return Ok(Claim::Empty),
        };

        let updated = self
            .store
            .update(
                &winner.uid,
                &JobPatch::picked_by(executor),
                UpdateOptions::transactional(JobState::Queued),
            )
            .await?;

        Ok(match updated {
            Some(job) => Claim::Won(job),
            None => Claim::Lost(winner.uid),
        })
    }

    // The job is already claimed, so it goes out even when the hook misbehaves.
    async fn run_hook(&self, hook: &dyn PickupHook, job: Job) -> Job {
        let timeout = self.settings.hook_timeout;

        match tokio::time::timeout(timeout, hook.on_pickup(job.clone())).await {
            Ok(Ok(job)) => job,
            Ok(Err(e)) => {
                warn!(uid = %job.uid, error = ?e, "Pickup hook failed");
                job
            }
            Err(_) => {
                warn!(uid = %job.uid, ?timeout, "Pickup hook timed out");
                job
            }
        }
    }
}
