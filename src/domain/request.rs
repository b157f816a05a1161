use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::DEFAULT_TYPE;

/// Rejected before the request reaches the pickup critical section.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed types parameter: {0}")]
    MalformedTypes(#[source] serde_json::Error),

    #[error("malformed poll request: {0}")]
    MalformedRequest(#[source] serde_json::Error),
}

/// Extra constraints on which jobs of a coarse type are eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Vec<String>>,
}

impl FilterPolicy {
    pub fn allows_stage(&self, stage: Option<&str>) -> bool {
        match &self.stage {
            Some(allowed) => stage.map_or(false, |s| allowed.iter().any(|a| a == s)),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRequest {
    #[serde(rename = "type", default = "default_type")]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_policy: Option<FilterPolicy>,
}

impl TypeRequest {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            filter_policy: None,
        }
    }

    #[cfg(test)]
    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_policy = Some(FilterPolicy {
            stage: Some(stages.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Parses the `types` query value. A missing or blank value means
    /// `[{"type":"default"}]`.
    pub fn parse_list(raw: Option<&str>) -> Result<Vec<TypeRequest>, RequestError> {
        match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => serde_json::from_str(raw).map_err(RequestError::MalformedTypes),
            None => Ok(vec![TypeRequest::new(DEFAULT_TYPE)]),
        }
    }

    /// Coarse types to fetch, deduplicated, in request order.
    pub fn coarse_types(requests: &[TypeRequest]) -> Vec<String> {
        let mut types: Vec<String> = Vec::with_capacity(requests.len());
        for r in requests {
            if !types.contains(&r.job_type) {
                types.push(r.job_type.clone());
            }
        }
        types
    }
}

fn default_type() -> String {
    DEFAULT_TYPE.to_string()
}

/// How the polling worker identified itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_name: Option<String>,
    pub forwarded_for: Option<String>,
    pub remote_addr: Option<String>,
}

impl WorkerIdentity {
    pub const UNKNOWN: &'static str = "unknown";

    /// First non-empty of worker name, forwarded address, transport address.
    pub fn executor(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|list| list.split(',').next());

        [
            self.worker_name.as_deref(),
            forwarded,
            self.remote_addr.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(Self::UNKNOWN)
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn missing_types_defaults_to_default_type() {
        let types = TypeRequest::parse_list(None).unwrap();
        assert_eq!(types, vec![TypeRequest::new("default")]);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_types_defaults_to_default_type(#[case] raw: &str) {
        let types = TypeRequest::parse_list(Some(raw)).unwrap();
        assert_eq!(types, vec![TypeRequest::new("default")]);
    }

    #[test]
    fn parses_filter_policies() {
        let types = TypeRequest::parse_list(Some(
            r#"[{"type":"figma","filterPolicy":{"stage":["preview","final"]}},{}]"#,
        ))
        .unwrap();

        assert_eq!(
            types,
            vec![
                TypeRequest::new("figma").with_stages(["preview", "final"]),
                TypeRequest::new("default"),
            ]
        );
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"type":"figma"}"#)]
    #[case(r#"[{"type":42}]"#)]
    #[case(r#"[{"type":"figma","filterPolicy":{"stage":"preview"}}]"#)]
    fn rejects_malformed_types(#[case] raw: &str) {
        assert!(matches!(
            TypeRequest::parse_list(Some(raw)),
            Err(RequestError::MalformedTypes(_))
        ));
    }

    #[test]
    fn coarse_types_are_deduplicated() {
        let requests = vec![
            TypeRequest::new("figma").with_stages(["a"]),
            TypeRequest::new("default"),
            TypeRequest::new("figma").with_stages(["b"]),
        ];

        assert_eq!(TypeRequest::coarse_types(&requests), vec!["figma", "default"]);
    }

    #[test]
    fn stage_policy() {
        let policy = FilterPolicy {
            stage: Some(vec!["preview".into()]),
        };

        assert!(policy.allows_stage(Some("preview")));
        assert!(!policy.allows_stage(Some("final")));
        assert!(!policy.allows_stage(None));
        assert!(FilterPolicy::default().allows_stage(None));
    }

    #[rstest]
    #[case(Some("render-01"), Some("10.0.0.9"), Some("127.0.0.1"), "render-01")]
    #[case(Some("  "), Some("10.0.0.9, 10.0.0.1"), Some("127.0.0.1"), "10.0.0.9")]
    #[case(None, Some(""), Some("127.0.0.1"), "127.0.0.1")]
    #[case(None, None, None, "unknown")]
    fn resolves_executor(
        #[case] worker_name: Option<&str>,
        #[case] forwarded_for: Option<&str>,
        #[case] remote_addr: Option<&str>,
        #[case] expected: &str,
    ) {
        let identity = WorkerIdentity {
            worker_name: worker_name.map(String::from),
            forwarded_for: forwarded_for.map(String::from),
            remote_addr: remote_addr.map(String::from),
        };

        assert_eq!(identity.executor(), expected);
    }
}
