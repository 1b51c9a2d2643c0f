use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the three priority classes a task can be submitted under.
///
/// The numeric mapping in [`Priority::weight`] and the queue naming in
/// [`Priority::queue_name`] are fixed by the wire contract (§4.1/§6 of the
/// spec) and must not be changed independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn weight(self) -> u8 {
        match self {
            Priority::High => 9,
            Priority::Normal => 5,
            Priority::Low => 1,
        }
    }

    pub fn queue_name(self) -> &'static str {
        match self {
            Priority::High => "gpu-high",
            Priority::Normal => "gpu-normal",
            Priority::Low => "gpu-low",
        }
    }

    pub fn routing_key(self) -> &'static str {
        match self {
            Priority::High => "gpu.high",
            Priority::Normal => "gpu.normal",
            Priority::Low => "gpu.low",
        }
    }

    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Client-visible task state machine (§3).
///
/// `Pending` doubles as the "unknown to the broker" state — a task the
/// broker has never heard of reports the same way as one still waiting to
/// be picked up by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TaskState {
    Pending,
    Started,
    Retry { error: String },
    Success {
        timing: HashMap<String, f64>,
        result: serde_json::Map<String, serde_json::Value>,
    },
    Failure { error: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success { .. } | TaskState::Failure { .. })
    }

    /// The name clients see in the `status` field of the status response.
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Retry { .. } => "RETRY",
            TaskState::Success { .. } => "SUCCESS",
            TaskState::Failure { .. } => "FAILURE",
        }
    }
}

/// The job envelope placed on the broker queue by the Dispatcher (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub task_id: Uuid,
    pub model_name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub callback_url: Option<String>,
    pub priority: Priority,
}

/// The result envelope written by the worker and read back by the gateway
/// (§3). Once a task reaches a terminal state the envelope is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<HashMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    pub fn success(
        task_id: Uuid,
        timing: HashMap<String, f64>,
        result: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            status: "SUCCESS".into(),
            timing: Some(timing),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            status: "FAILURE".into(),
            timing: None,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_weights_match_wire_contract() {
        assert_eq!(Priority::High.weight(), 9);
        assert_eq!(Priority::Normal.weight(), 5);
        assert_eq!(Priority::Low.weight(), 1);
        assert_eq!(Priority::High.queue_name(), "gpu-high");
        assert_eq!(Priority::Low.queue_name(), "gpu-low");
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Success { timing: HashMap::new(), result: serde_json::Map::new() }
            .is_terminal());
        assert!(TaskState::Failure { error: "boom".into() }.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Started.is_terminal());
        assert!(!TaskState::Retry { error: "e".into() }.is_terminal());
    }
}
