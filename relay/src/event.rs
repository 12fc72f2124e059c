//! Workflow job webhook payloads.
//!
//! Only the fields the relay needs are modelled. Everything is defaultable
//! and unknown fields are ignored, since the body comes from the network.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Lifecycle action carried by a workflow job event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobAction {
    Queued,
    InProgress,
    Completed,
    /// Any other action, kept verbatim for logging.
    Unknown(String),
}

impl JobAction {
    pub fn as_str(&self) -> &str {
        match self {
            JobAction::Queued => "queued",
            JobAction::InProgress => "in_progress",
            JobAction::Completed => "completed",
            JobAction::Unknown(raw) => raw,
        }
    }
}

impl Default for JobAction {
    fn default() -> Self {
        JobAction::Unknown(String::new())
    }
}

impl From<String> for JobAction {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "queued" => JobAction::Queued,
            "in_progress" => JobAction::InProgress,
            "completed" => JobAction::Completed,
            _ => JobAction::Unknown(raw),
        }
    }
}

impl From<JobAction> for String {
    fn from(action: JobAction) -> Self {
        match action {
            JobAction::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

/// A `workflow_job` webhook event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: JobAction,

    #[serde(default, deserialize_with = "null_as_default")]
    pub workflow_job: WorkflowJob,

    #[serde(default, deserialize_with = "null_as_default")]
    pub repository: Repository,
}

/// The job the event refers to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowJob {
    /// Workflow run identifier. The sender emits a number; strings are accepted too.
    #[serde(default, deserialize_with = "string_or_number")]
    pub run_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub run_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
}

/// Treat an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webhook_payload() {
        let body = r#"{
            "action": "queued",
            "workflow_job": {
                "id": 29679449,
                "run_id": 940463255,
                "run_url": "https://api.github.com/repos/octo-org/example/actions/runs/940463255",
                "labels": ["self-hosted"]
            },
            "repository": {"id": 1, "full_name": "octo-org/example"},
            "sender": {"login": "octocat"}
        }"#;

        let event: InboundEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, JobAction::Queued);
        assert_eq!(event.workflow_job.run_id, "940463255");
        assert_eq!(
            event.workflow_job.run_url,
            "https://api.github.com/repos/octo-org/example/actions/runs/940463255"
        );
        assert_eq!(event.repository.full_name, "octo-org/example");
    }

    #[test]
    fn test_string_run_id() {
        let body = r#"{"action":"completed","workflow_job":{"run_id":"123","run_url":"http://x"}}"#;
        let event: InboundEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, JobAction::Completed);
        assert_eq!(event.workflow_job.run_id, "123");
        assert_eq!(event.repository.full_name, "");
    }

    #[test]
    fn test_missing_fields_default() {
        let event: InboundEvent = serde_json::from_str("{}").unwrap();
        assert_eq!(event.action, JobAction::Unknown(String::new()));
        assert_eq!(event.workflow_job, WorkflowJob::default());
    }

    #[test]
    fn test_null_fields_default() {
        let body = r#"{"action":"completed","workflow_job":{"run_id":1,"run_url":null}}"#;
        let event: InboundEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, JobAction::Completed);
        assert_eq!(event.workflow_job.run_id, "1");
        assert_eq!(event.workflow_job.run_url, "");

        let body = r#"{"action":"queued","workflow_job":null,"repository":null}"#;
        let event: InboundEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, JobAction::Queued);
        assert_eq!(event.workflow_job, WorkflowJob::default());
        assert_eq!(event.repository, Repository::default());

        let body = r#"{"action":null,"workflow_job":{"run_id":null},"repository":{"full_name":null}}"#;
        let event: InboundEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.action, JobAction::default());
        assert_eq!(event.workflow_job.run_id, "");
        assert_eq!(event.repository.full_name, "");
    }

    #[test]
    fn test_unknown_action_preserved() {
        let event: InboundEvent = serde_json::from_str(r#"{"action":"waiting"}"#).unwrap();
        assert_eq!(event.action, JobAction::Unknown("waiting".to_string()));
        assert_eq!(event.action.as_str(), "waiting");
    }

    #[test]
    fn test_invalid_run_id_type() {
        let body = r#"{"action":"queued","workflow_job":{"run_id":{"nested":true}}}"#;
        assert!(serde_json::from_str::<InboundEvent>(body).is_err());
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let event = InboundEvent {
            action: JobAction::InProgress,
            workflow_job: WorkflowJob {
                run_id: "42".to_string(),
                run_url: "http://runs/42".to_string(),
            },
            repository: Repository {
                full_name: "acme/widgets".to_string(),
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"action\":\"in_progress\""));

        let parsed: InboundEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
