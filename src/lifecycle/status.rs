use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot returned by `ClientLifecycleManager::status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub initialized: bool,
    pub running: bool,
    /// The hub auth task is between failed attempts.
    pub retrying: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u64>,
    /// Milliseconds until the next auth attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,
    /// `states` rendered as JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Value>,
}

impl EngineStatus {
    pub(crate) fn clear_retry(&mut self) {
        self.retrying = false;
        self.retry_attempt = None;
        self.next_retry_in = None;
    }
}
