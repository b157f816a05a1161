use std::collections::{HashMap, HashSet};

use super::entity::Job;

/// Maximum number of in-progress jobs per type. Types not listed are unconstrained.
pub type ConcurrencyLimits = HashMap<String, u32>;

/// Types whose in-progress count has reached their limit.
///
/// Computed from a fresh listing on every pickup, so the input must include
/// every state, not only queued jobs.
pub fn saturated_types(jobs: &[Job], limits: &ConcurrencyLimits) -> HashSet<String> {
    if limits.is_empty() {
        return HashSet::new();
    }

    let mut in_progress: HashMap<&str, u32> = HashMap::new();
    for job in jobs.iter().filter(|j| j.state.is_in_progress()) {
        *in_progress.entry(job.job_type.as_str()).or_default() += 1;
    }

    limits
        .iter()
        .filter(|(job_type, limit)| {
            in_progress.get(job_type.as_str()).copied().unwrap_or(0) >= **limit
        })
        .map(|(job_type, _)| job_type.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn job(job_type: &str, state: &str) -> Job {
        serde_json::from_value(json!({
            "uid": format!("{}-{}", job_type, state),
            "type": job_type,
            "state": state,
            "createdAt": "2024-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    fn limits(pairs: &[(&str, u32)]) -> ConcurrencyLimits {
        pairs.iter().map(|(t, n)| (t.to_string(), *n)).collect()
    }

    #[rstest]
    #[case("picked")]
    #[case("started")]
    #[case("render:dorender")]
    fn in_progress_state_saturates_limit_of_one(#[case] state: &str) {
        let jobs = vec![job("figma", state), job("figma", "queued")];

        let saturated = saturated_types(&jobs, &limits(&[("figma", 1)]));

        assert!(saturated.contains("figma"));
    }

    #[test]
    fn finished_jobs_do_not_count() {
        let jobs = vec![
            job("figma", "finished"),
            job("figma", "error"),
            job("figma", "queued"),
        ];

        assert!(saturated_types(&jobs, &limits(&[("figma", 1)])).is_empty());
    }

    #[test]
    fn below_limit_is_not_saturated() {
        let jobs = vec![job("figma", "started"), job("figma", "queued")];

        assert!(saturated_types(&jobs, &limits(&[("figma", 2)])).is_empty());

        let jobs = vec![job("figma", "started"), job("figma", "picked")];
        assert!(saturated_types(&jobs, &limits(&[("figma", 2)])).contains("figma"));
    }

    #[test]
    fn unlisted_types_are_never_saturated() {
        let jobs = vec![job("default", "started"), job("default", "picked")];

        assert!(saturated_types(&jobs, &limits(&[("figma", 1)])).is_empty());
        assert!(saturated_types(&jobs, &ConcurrencyLimits::new()).is_empty());
    }
}
