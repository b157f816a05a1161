use std::{fmt, str::FromStr};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TYPE: &str = "default";

const RENDER_PREFIX: &str = "render:";

/// Lifecycle of a job. Only `Queued` jobs can be picked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobState {
    Queued,
    Picked,
    Started,
    /// `render:<stage>`
    Render(String),
    Finished,
    Error,
    Failed,
}

impl JobState {
    /// Picked, started and any render sub-state occupy a concurrency slot.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Picked | Self::Started | Self::Render(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Picked => 1,
            Self::Started => 2,
            Self::Render(_) => 3,
            Self::Finished | Self::Error | Self::Failed => 4,
        }
    }

    /// States only move forward. Terminal states are reachable from anywhere
    /// that isn't already terminal; moving between render stages is allowed.
    pub fn can_advance_to(&self, next: &JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() >= self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Picked => f.write_str("picked"),
            Self::Started => f.write_str("started"),
            Self::Render(stage) => write!(f, "{}{}", RENDER_PREFIX, stage),
            Self::Finished => f.write_str("finished"),
            Self::Error => f.write_str("error"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let state = match s {
            "queued" => Self::Queued,
            "picked" => Self::Picked,
            "started" => Self::Started,
            "finished" => Self::Finished,
            "error" => Self::Error,
            "failed" => Self::Failed,
            other => match other.strip_prefix(RENDER_PREFIX) {
                Some(stage) => Self::Render(stage.to_string()),
                None => bail!("unknown job state: {:?}", other),
            },
        };

        Ok(state)
    }
}

impl TryFrom<String> for JobState {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.stage.is_none() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    // ID
    pub uid: String,
    #[serde(rename = "type", default = "default_type")]
    pub job_type: String,

    // Scheduling
    pub state: JobState,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    // Bookkeeping
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,

    // Everything the render pipeline cares about (template, assets, actions...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn stage(&self) -> Option<&str> {
        self.attributes.stage.as_deref()
    }

    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(state) = &patch.state {
            if *state != self.state && !self.state.can_advance_to(state) {
                bail!(
                    "job {} cannot move from {} back to {}",
                    self.uid,
                    self.state,
                    state
                );
            }
            self.state = state.clone();
        }

        if let Some(executor) = &patch.executor {
            self.executor = Some(executor.clone());
        }

        self.updated_at = Some(now);

        Ok(())
    }
}

/// Partial update applied by `JobStore::update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub executor: Option<String>,
}

impl JobPatch {
    pub fn picked_by(executor: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Picked),
            executor: Some(executor.into()),
        }
    }
}

fn default_type() -> String {
    DEFAULT_TYPE.to_string()
}

// Anything that doesn't look like a number counts as 0.
fn lenient_priority<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;

    Ok(value.as_ref().map(priority_of).unwrap_or(0))
}

fn priority_of(value: &Value) -> i64 {
    let number = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    };

    number.unwrap_or(0)
}
