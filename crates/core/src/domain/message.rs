// Notification Message Model
//
// Messages are never persisted. They only signal that durable state may have changed.

use crate::domain::job::{Job, JobId};
use serde::{Deserialize, Serialize};

/// Event kind carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Job lifecycle
    JobEnqueued,
    JobUpdated,
    JobCompleted,
    JobQueueUpdated,

    // Worker lifecycle
    Initial,
    InitializationProgress,
    OffscreenReady,
    OffscreenFailed,

    // Control requests (worker -> controller)
    GetBackgroundJobs,
    ClaimJobForOffscreen,
    UpdateJobProgress,
    CompleteJob,

    // Liveness
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::JobEnqueued => "JOB_ENQUEUED",
            MessageType::JobUpdated => "JOB_UPDATED",
            MessageType::JobCompleted => "JOB_COMPLETED",
            MessageType::JobQueueUpdated => "JOB_QUEUE_UPDATED",
            MessageType::Initial => "INITIAL",
            MessageType::InitializationProgress => "INITIALIZATION_PROGRESS",
            MessageType::OffscreenReady => "OFFSCREEN_READY",
            MessageType::OffscreenFailed => "OFFSCREEN_FAILED",
            MessageType::GetBackgroundJobs => "GET_BACKGROUND_JOBS",
            MessageType::ClaimJobForOffscreen => "CLAIM_JOB_FOR_OFFSCREEN",
            MessageType::UpdateJobProgress => "UPDATE_JOB_PROGRESS",
            MessageType::CompleteJob => "COMPLETE_JOB",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope hint: which class of consumer a message is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    #[default]
    All,
    Background,
    Offscreen,
    Ui,
}

/// Subscription topic: every message, or one event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    All,
    Kind(MessageType),
}

impl Topic {
    pub fn matches(&self, kind: MessageType) -> bool {
        match self {
            Topic::All => true,
            Topic::Kind(k) => *k == kind,
        }
    }
}

impl From<MessageType> for Topic {
    fn from(kind: MessageType) -> Self {
        Topic::Kind(kind)
    }
}

/// Short-lived event broadcast across contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub job_id: Option<JobId>,
    /// Embedded job snapshot (fast path, progress streaming)
    pub job: Option<Job>,
    pub timestamp: i64,
    #[serde(default)]
    pub destination: Destination,
    /// Kind-specific extras (startup progress, ping nonce, error text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NotificationMessage {
    pub fn new(kind: MessageType, timestamp: i64) -> Self {
        Self {
            kind,
            job_id: None,
            job: None,
            timestamp,
            destination: Destination::All,
            data: None,
        }
    }

    /// Message about a job, carrying its id and a snapshot
    pub fn for_job(kind: MessageType, job: &Job, timestamp: i64) -> Self {
        Self {
            job_id: Some(job.id.clone()),
            job: Some(job.clone()),
            ..Self::new(kind, timestamp)
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Drop the embedded snapshot, keeping only the id
    pub fn without_snapshot(mut self) -> Self {
        self.job = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_matching() {
        assert!(Topic::All.matches(MessageType::Ping));
        assert!(Topic::Kind(MessageType::JobEnqueued).matches(MessageType::JobEnqueued));
        assert!(!Topic::Kind(MessageType::JobEnqueued).matches(MessageType::JobUpdated));
    }

    #[test]
    fn test_message_wire_format() {
        let job = Job::new_test("echo", json!({"text": "hi"}));
        let msg = NotificationMessage::for_job(MessageType::JobEnqueued, &job, 42)
            .with_destination(Destination::Offscreen);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "JOB_ENQUEUED");
        assert_eq!(value["jobId"], job.id.as_str());
        assert_eq!(value["destination"], "offscreen");
        assert_eq!(value["job"]["payload"]["text"], "hi");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_as_str_matches_serde() {
        for kind in [
            MessageType::ClaimJobForOffscreen,
            MessageType::JobQueueUpdated,
            MessageType::InitializationProgress,
        ] {
            let value = serde_json::to_value(kind).unwrap();
            assert_eq!(value, json!(kind.as_str()));
        }
    }
}
