use std::{cmp::Reverse, collections::HashSet, fmt};

use clap::ArgEnum;
use rand::{seq::SliceRandom, Rng};

use super::entity::Job;

/// How a single job is chosen among eligible candidates. Candidates arrive
/// in creation order, oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ArgEnum)]
pub enum OrderingPolicy {
    #[default]
    Fifo,
    NewestFirst,
    Random,
    Priority,
    StageDistributed,
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fifo => "fifo",
            Self::NewestFirst => "newest-first",
            Self::Random => "random",
            Self::Priority => "priority",
            Self::StageDistributed => "stage-distributed",
        };
        f.write_str(name)
    }
}

impl OrderingPolicy {
    pub fn select<R: Rng + ?Sized>(self, candidates: Vec<Job>, rng: &mut R) -> Option<Job> {
        match self {
            Self::Fifo => candidates.into_iter().next(),
            Self::NewestFirst => candidates.into_iter().last(),
            Self::Random => candidates.choose(rng).cloned(),
            Self::Priority => highest_priority(candidates),
            Self::StageDistributed => one_per_stage(candidates).choose(rng).cloned(),
        }
    }
}

// Stable sort, so equal priorities keep creation order.
fn highest_priority(mut candidates: Vec<Job>) -> Option<Job> {
    candidates.sort_by_key(|job| Reverse(job.priority));
    candidates.into_iter().next()
}

// First candidate of every stage; jobs without a stage share one group.
fn one_per_stage(candidates: Vec<Job>) -> Vec<Job> {
    let mut seen: HashSet<Option<String>> = HashSet::new();

    candidates
        .into_iter()
        .filter(|job| seen.insert(job.attributes.stage.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;

    fn job(uid: &str, priority: serde_json::Value, stage: Option<&str>) -> Job {
        let mut value = json!({
            "uid": uid,
            "state": "queued",
            "priority": priority,
            "createdAt": format!("2024-01-0{}T00:00:00Z", uid),
        });
        if let Some(stage) = stage {
            value["attributes"] = json!({ "stage": stage });
        }
        serde_json::from_value(value).unwrap()
    }

    fn plain(uids: &[&str]) -> Vec<Job> {
        uids.iter().map(|uid| job(uid, json!(0), None)).collect()
    }

    fn pick(policy: OrderingPolicy, candidates: Vec<Job>, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        policy.select(candidates, &mut rng).unwrap().uid
    }

    #[test]
    fn fifo_picks_oldest() {
        assert_eq!(pick(OrderingPolicy::Fifo, plain(&["1", "2", "3"]), 0), "1");
    }

    #[test]
    fn newest_first_picks_newest() {
        assert_eq!(pick(OrderingPolicy::NewestFirst, plain(&["1", "2", "3"]), 0), "3");
    }

    #[test]
    fn random_picks_a_candidate() {
        let mut seen = HashSet::new();
        for seed in 0..64 {
            seen.insert(pick(OrderingPolicy::Random, plain(&["1", "2", "3"]), seed));
        }

        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn priority_breaks_ties_by_age() {
        let candidates = vec![
            job("1", json!(3), None),
            job("2", json!(5), None),
            job("3", json!(5), None),
            job("4", json!(1), None),
        ];

        assert_eq!(pick(OrderingPolicy::Priority, candidates, 0), "2");
    }

    #[test]
    fn priority_treats_garbage_as_zero() {
        let candidates = vec![job("1", json!("urgent"), None), job("2", json!(-1), None)];

        assert_eq!(pick(OrderingPolicy::Priority, candidates, 0), "1");
    }

    #[test]
    fn stage_distributed_keeps_first_job_per_stage() {
        let candidates = vec![
            job("1", json!(0), Some("a")),
            job("2", json!(0), Some("a")),
            job("3", json!(0), Some("b")),
            job("4", json!(0), None),
            job("5", json!(0), None),
        ];

        let reps: Vec<String> = one_per_stage(candidates).into_iter().map(|j| j.uid).collect();

        assert_eq!(reps, vec!["1", "3", "4"]);
    }

    #[test]
    fn stage_distributed_spreads_over_stages() {
        let candidates = || {
            vec![
                job("1", json!(0), Some("a")),
                job("2", json!(0), Some("a")),
                job("3", json!(0), Some("a")),
                job("4", json!(0), Some("b")),
            ]
        };

        let mut seen = HashSet::new();
        for seed in 0..64 {
            seen.insert(pick(OrderingPolicy::StageDistributed, candidates(), seed));
        }

        assert_eq!(seen, HashSet::from(["1".to_string(), "4".to_string()]));
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        for policy in OrderingPolicy::value_variants() {
            assert!(policy.select(Vec::new(), &mut rng).is_none());
        }
    }

    #[test]
    fn policy_names_match_configuration_values() {
        for policy in OrderingPolicy::value_variants() {
            assert_eq!(OrderingPolicy::from_str(&policy.to_string(), false), Ok(*policy));
        }
    }
}
