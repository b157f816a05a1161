use super::{
    entity::{Job, JobState},
    request::TypeRequest,
};

/// Queued jobs whose type is requested and whose attributes satisfy the
/// filter policy of at least one matching request.
pub fn eligible(jobs: Vec<Job>, requests: &[TypeRequest]) -> Vec<Job> {
    jobs.into_iter()
        .filter(|job| job.state == JobState::Queued && matches_any(job, requests))
        .collect()
}

fn matches_any(job: &Job, requests: &[TypeRequest]) -> bool {
    requests
        .iter()
        .filter(|r| r.job_type == job.job_type)
        .any(|r| match &r.filter_policy {
            Some(policy) => policy.allows_stage(job.stage()),
            None => true,
        })
}
