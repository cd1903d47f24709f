//! Task entity and its satellite value types.
//!
//! A task is created at submit time, mutated only by the orchestrator and the
//! correlator while non-terminal, and retained indefinitely. The free-form
//! property bag of the wire format is narrowed to the typed [`TaskRuntime`]
//! struct — unknown properties are rejected by construction.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state_machine;
use crate::types::{ChannelId, TaskId, Timestamp};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The closed set of drawing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Imagine,
    Upscale,
    Variation,
    Reroll,
    Describe,
    Blend,
    Shorten,
    Zoom,
    Pan,
    Inpaint,
    Edit,
    Retexture,
    Video,
    Show,
    Action,
    Seed,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NotStart,
    /// Waiting for a two-phase window confirm (`submit_modal`).
    Modal,
    Submitted,
    InProgress,
    Success,
    Failure,
    Cancel,
}

impl TaskStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancel)
    }
}

/// Logical bot style. Affects remix toggles and which private channel
/// receives `/info` and `/show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotFamily {
    Mj,
    Niji,
}

/// Upstream provider family with distinct upload and command semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendFamily {
    Chat,
    Partner,
    Official,
}

/// Scheduling speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeedMode {
    Fast,
    Relax,
    Turbo,
}

// ---------------------------------------------------------------------------
// Satellite types
// ---------------------------------------------------------------------------

/// An actionable component descriptor from the upstream button grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub custom_id: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub label: String,
    /// Upstream style code (2 = grey, 3 = green/active).
    pub style: i32,
    /// Upstream component type code (2 = button).
    #[serde(default = "Button::default_type")]
    pub r#type: i32,
}

impl Button {
    fn default_type() -> i32 {
        2
    }

    pub fn new(custom_id: impl Into<String>, label: impl Into<String>, style: i32) -> Self {
        Self {
            custom_id: custom_id.into(),
            emoji: String::new(),
            label: label.into(),
            style,
            r#type: 2,
        }
    }
}

/// User-supplied account preferences attached to a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountFilter {
    /// Acceptable speed modes; empty = no constraint.
    #[serde(default)]
    pub modes: Vec<SpeedMode>,
    /// Explicit instance (channel id) whitelist; empty = no constraint.
    #[serde(default)]
    pub instance_ids: Vec<String>,
    /// Vertical-domain ids the caller wants to route within.
    #[serde(default)]
    pub domain_ids: Vec<String>,
    /// Preferred mode when the account allows several.
    #[serde(default)]
    pub speed_preference: Option<SpeedMode>,
    /// Caller's remix preference, when it should override the account toggle.
    #[serde(default)]
    pub remix: Option<bool>,
}

impl AccountFilter {
    /// Whether `mode` is acceptable under this filter.
    pub fn accepts_mode(&self, mode: SpeedMode) -> bool {
        self.modes.is_empty() || self.modes.contains(&mode)
    }

    /// Whether `instance` is acceptable under this filter.
    pub fn accepts_instance(&self, instance: &str) -> bool {
        self.instance_ids.is_empty() || self.instance_ids.iter().any(|id| id == instance)
    }
}

/// Typed replacement for the legacy free-form property bag.
///
/// Every field is set at most once by the orchestrator or the correlator;
/// anything outside this struct is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRuntime {
    /// Caller-generated correlation nonce echoed by the upstream.
    pub nonce: Option<String>,
    /// Upstream message id, assigned at first correlation.
    pub message_id: Option<String>,
    /// Grid image hash parsed from the attachment URL.
    pub message_hash: Option<String>,
    /// Upstream message flags, carried into follow-up interactions.
    pub flags: Option<i64>,
    /// The button custom id that created this task (follow-up actions).
    pub custom_id: Option<String>,
    /// Final prompt as echoed by the upstream header.
    pub final_prompt: Option<String>,
    /// Rewritten custom id used for the second modal phase.
    pub remix_custom_id: Option<String>,
    /// Marker that the task went through the remix modal path.
    pub remix_modal: Option<String>,
    /// Message id of the opened modal window (set by the correlator).
    pub remix_modal_message_id: Option<String>,
    /// The parent grid's upsample custom id, kept for pan rewrites.
    pub remix_u_custom_id: Option<String>,
    /// Interaction metadata id of the modal window (set by the correlator).
    pub interaction_metadata_id: Option<String>,
    /// Chat-platform application instance id for component interactions.
    pub chat_instance_id: Option<String>,
    /// Message id of the `/show` reply awaited during seed retrieval.
    pub seed_message_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A drawing job and its full lineage/progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    pub action: TaskAction,
    pub status: TaskStatus,
    pub bot_family: BotFamily,
    pub backend_family: BackendFamily,
    #[serde(default)]
    pub mode: Option<SpeedMode>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub prompt_en: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Intermediate image URLs observed while in progress.
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub runtime: TaskRuntime,
    #[serde(default)]
    pub submit_time: Option<Timestamp>,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub finish_time: Option<Timestamp>,
    #[serde(default)]
    pub fail_reason: Option<String>,
    /// Progress string such as `"50%"`.
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub seed: Option<String>,
    /// Owning account channel id while submitted/in-progress.
    #[serde(default)]
    pub instance_id: Option<ChannelId>,
    /// Owning sub-channel id, when dispatched through one.
    #[serde(default)]
    pub sub_instance_id: Option<ChannelId>,
    #[serde(default)]
    pub account_filter: AccountFilter,
    /// Set once the single allowed Modal -> NotStart reopen has been used.
    #[serde(default)]
    pub modal_reopened: bool,
}

impl Task {
    /// Create a fresh `NOT_START` task.
    pub fn new(id: TaskId, action: TaskAction, bot_family: BotFamily, backend: BackendFamily) -> Self {
        Self {
            id,
            parent_id: None,
            action,
            status: TaskStatus::NotStart,
            bot_family,
            backend_family: backend,
            mode: None,
            prompt: None,
            prompt_en: None,
            description: None,
            image_url: None,
            image_urls: Vec::new(),
            buttons: Vec::new(),
            runtime: TaskRuntime::default(),
            submit_time: None,
            start_time: None,
            finish_time: None,
            fail_reason: None,
            progress: None,
            seed: None,
            instance_id: None,
            sub_instance_id: None,
            account_filter: AccountFilter::default(),
            modal_reopened: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validated status transition.
    ///
    /// Rejects anything the state machine forbids; the single permitted
    /// `Modal -> NotStart` reopen is tracked on the task itself.
    pub fn transition(&mut self, to: TaskStatus) -> Result<(), CoreError> {
        if self.status == TaskStatus::Modal && to == TaskStatus::NotStart {
            if self.modal_reopened {
                return Err(CoreError::Validation(format!(
                    "Task {} already reopened from modal once",
                    self.id
                )));
            }
            self.modal_reopened = true;
        }
        state_machine::validate_transition(self.status, to)
            .map_err(CoreError::Validation)?;
        self.status = to;
        Ok(())
    }

    /// Move to `IN_PROGRESS` and stamp the start time.
    pub fn start(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.transition(TaskStatus::InProgress)?;
        self.start_time = Some(now);
        self.progress = Some("0%".to_string());
        Ok(())
    }

    /// Terminal success.
    pub fn succeed(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.transition(TaskStatus::Success)?;
        self.finish_time = Some(now);
        self.progress = Some("100%".to_string());
        Ok(())
    }

    /// Terminal failure with a reason.
    pub fn fail(&mut self, now: Timestamp, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition(TaskStatus::Failure)?;
        self.finish_time = Some(now);
        self.fail_reason = Some(reason.into());
        Ok(())
    }

    /// Terminal cancel. Best-effort: no upstream recall is attempted.
    pub fn cancel(&mut self, now: Timestamp) -> Result<(), CoreError> {
        self.transition(TaskStatus::Cancel)?;
        self.finish_time = Some(now);
        Ok(())
    }

    /// Validate that a follow-up task is compatible with its parent.
    ///
    /// A child inherits backend and bot family; a mismatch is a
    /// validation error.
    pub fn check_follow_up(&self, parent: &Task) -> Result<(), CoreError> {
        if self.backend_family != parent.backend_family {
            return Err(CoreError::Validation(format!(
                "Backend family mismatch with parent task {}",
                parent.id
            )));
        }
        if self.bot_family != parent.bot_family {
            return Err(CoreError::Validation(format!(
                "Bot family mismatch with parent task {}",
                parent.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn task() -> Task {
        Task::new(
            "17000000000000001".to_string(),
            TaskAction::Imagine,
            BotFamily::Mj,
            BackendFamily::Chat,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut t = task();
        t.transition(TaskStatus::Submitted).unwrap();
        t.start(Utc::now()).unwrap();
        assert_eq!(t.progress.as_deref(), Some("0%"));
        t.succeed(Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Success);
        assert_eq!(t.progress.as_deref(), Some("100%"));
        assert!(t.finish_time.is_some());
    }

    #[test]
    fn terminal_status_is_final() {
        let mut t = task();
        t.transition(TaskStatus::Submitted).unwrap();
        t.start(Utc::now()).unwrap();
        t.fail(Utc::now(), "boom").unwrap();
        assert!(t.transition(TaskStatus::Success).is_err());
        assert!(t.transition(TaskStatus::InProgress).is_err());
    }

    #[test]
    fn modal_round_trip_allowed_once() {
        let mut t = task();
        t.transition(TaskStatus::Modal).unwrap();
        t.transition(TaskStatus::NotStart).unwrap();
        assert!(t.modal_reopened);

        t.transition(TaskStatus::Modal).unwrap();
        let err = t.transition(TaskStatus::NotStart).unwrap_err();
        assert!(err.to_string().contains("already reopened"));
    }

    #[test]
    fn follow_up_family_mismatch_rejected() {
        let parent = task();
        let mut child = task();
        child.bot_family = BotFamily::Niji;
        assert!(child.check_follow_up(&parent).is_err());

        let mut child = task();
        child.backend_family = BackendFamily::Partner;
        assert!(child.check_follow_up(&parent).is_err());

        let child = task();
        assert!(child.check_follow_up(&parent).is_ok());
    }

    #[test]
    fn filter_accepts_when_unconstrained() {
        let filter = AccountFilter::default();
        assert!(filter.accepts_mode(SpeedMode::Fast));
        assert!(filter.accepts_instance("any-channel"));
    }

    #[test]
    fn filter_constrains_modes_and_instances() {
        let filter = AccountFilter {
            modes: vec![SpeedMode::Relax],
            instance_ids: vec!["chan-1".to_string()],
            ..Default::default()
        };
        assert!(filter.accepts_mode(SpeedMode::Relax));
        assert!(!filter.accepts_mode(SpeedMode::Fast));
        assert!(filter.accepts_instance("chan-1"));
        assert!(!filter.accepts_instance("chan-2"));
    }

    #[test]
    fn runtime_rejects_unknown_properties() {
        let json = r#"{"nonce":"1","unexpected":"x"}"#;
        assert!(serde_json::from_str::<TaskRuntime>(json).is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let json = serde_json::to_string(&TaskStatus::NotStart).unwrap();
        assert_eq!(json, "\"NOT_START\"");
    }
}
