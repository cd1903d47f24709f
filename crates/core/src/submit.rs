//! Submit-result envelope and upstream acknowledgement message.
//!
//! Every `submit_*` operation resolves to a [`SubmitResult`]; every upstream
//! command primitive resolves to a [`Message`]. Both share the same numeric
//! code space so an upstream acknowledgement can be forwarded verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Stable result codes surfaced by the submit API.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitCode {
    /// Generic failure (queue full, upstream error, storage error).
    Failure = 0,
    /// Accepted and dispatched to an idle worker.
    Success = 1,
    /// The prompt hit the banned-word dictionary.
    BannedPrompt = 2,
    /// The request failed preflight validation.
    ValidationError = 4,
    /// No eligible instance / parent task / modal window.
    NotFound = 9,
    /// The task already exists in a waiting state (modal handoff).
    /// **Not terminal** — the task stays live for `submit_modal`.
    Existed = 21,
    /// Accepted and queued behind other work.
    InQueue = 22,
}

impl SubmitCode {
    /// Numeric wire code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Envelope returned by every submit operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub code: SubmitCode,
    pub description: String,
    /// The task id, when a task was created or addressed.
    pub result: Option<TaskId>,
    /// Free-form result properties (`finalPrompt`, `remix`, queue position).
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl SubmitResult {
    pub fn of(code: SubmitCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            result: None,
            properties: BTreeMap::new(),
        }
    }

    /// `SUCCESS` with the created task id.
    pub fn success(task_id: TaskId) -> Self {
        Self::of(SubmitCode::Success, "Submitted").with_result(task_id)
    }

    /// `IN_QUEUE` with the created task id and how many tasks sit ahead.
    pub fn in_queue(task_id: TaskId, ahead: usize) -> Self {
        Self::of(SubmitCode::InQueue, format!("In queue, {ahead} task(s) ahead"))
            .with_result(task_id)
            .with_property("queuePosition", serde_json::json!(ahead))
    }

    pub fn with_result(mut self, task_id: TaskId) -> Self {
        self.result = Some(task_id);
        self
    }

    pub fn with_property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, SubmitCode::Success | SubmitCode::InQueue)
    }
}

impl From<&crate::CoreError> for SubmitResult {
    fn from(err: &crate::CoreError) -> Self {
        SubmitResult::of(err.submit_code(), err.to_string())
    }
}

/// Acknowledgement returned by an upstream command primitive.
///
/// `code` shares the [`SubmitCode`] space but stays an `i32` because
/// backends may answer with codes outside the stable set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub code: i32,
    pub description: String,
}

impl Message {
    pub fn success() -> Self {
        Self {
            code: SubmitCode::Success.code(),
            description: "Success".to_string(),
        }
    }

    pub fn of(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SubmitCode::Success.code()
    }

    /// Codes that mean "accepted but delayed" — the task stays in progress
    /// and waits for correlated events instead of failing.
    pub fn is_delayed(&self) -> bool {
        self.code == SubmitCode::Existed.code() || self.code == SubmitCode::InQueue.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_values_are_stable() {
        assert_eq!(SubmitCode::Failure.code(), 0);
        assert_eq!(SubmitCode::Success.code(), 1);
        assert_eq!(SubmitCode::BannedPrompt.code(), 2);
        assert_eq!(SubmitCode::ValidationError.code(), 4);
        assert_eq!(SubmitCode::NotFound.code(), 9);
        assert_eq!(SubmitCode::Existed.code(), 21);
        assert_eq!(SubmitCode::InQueue.code(), 22);
    }

    #[test]
    fn in_queue_records_position() {
        let result = SubmitResult::in_queue("123".to_string(), 2);
        assert_eq!(result.code, SubmitCode::InQueue);
        assert_eq!(result.result.as_deref(), Some("123"));
        assert_eq!(result.properties["queuePosition"], 2);
        assert!(result.is_success());
    }

    #[test]
    fn existed_is_not_success() {
        let result = SubmitResult::of(SubmitCode::Existed, "Waiting for window confirm");
        assert!(!result.is_success());
    }

    #[test]
    fn delayed_message_codes() {
        assert!(Message::of(21, "existed").is_delayed());
        assert!(Message::of(22, "queued").is_delayed());
        assert!(!Message::success().is_delayed());
        assert!(!Message::of(0, "boom").is_delayed());
    }
}
