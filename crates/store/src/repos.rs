//! Repository traits.
//!
//! Contracts:
//! - `save` is an upsert with last-writer-wins semantics for live tasks.
//!   A task already in a terminal status is never overwritten — the save is
//!   a silent no-op. This is what makes upstream event replay idempotent at
//!   the persistence boundary.
//! - Callers must not interleave updates to one task without holding its
//!   task-level lock (the engine's lock registry).
//! - Errors surface as [`StoreError`](crate::StoreError) and are retryable
//!   by the orchestrator only during submission, never after a nonce has
//!   been sent upstream.

use async_trait::async_trait;

use atelier_core::account::Account;
use atelier_core::banned::KeywordSet;
use atelier_core::task::{Task, TaskAction, TaskStatus};
use atelier_core::types::{ChannelId, TaskId};

use crate::StoreResult;

/// Predicate filter for task listing/counting.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Keep tasks whose status is in this set; empty = any.
    pub statuses: Vec<TaskStatus>,
    /// Keep tasks whose action is in this set; empty = any.
    pub actions: Vec<TaskAction>,
    pub parent_id: Option<TaskId>,
    pub instance_id: Option<ChannelId>,
    /// Newest first when set; the natural order is oldest first.
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn by_statuses(statuses: Vec<TaskStatus>) -> Self {
        Self {
            statuses,
            ..Default::default()
        }
    }

    pub fn on_instance(mut self, instance_id: impl Into<ChannelId>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Whether `task` satisfies every set predicate.
    pub fn matches(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && (self.actions.is_empty() || self.actions.contains(&task.action))
            && self
                .parent_id
                .as_ref()
                .is_none_or(|p| task.parent_id.as_ref() == Some(p))
            && self
                .instance_id
                .as_ref()
                .is_none_or(|i| task.instance_id.as_ref() == Some(i))
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get(&self, id: &str) -> StoreResult<Option<Task>>;

    /// Upsert. No-op when the stored task is already terminal.
    async fn save(&self, task: &Task) -> StoreResult<()>;

    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Tasks matching `query`, ordered by submission (task ids are
    /// time-prefixed, so id order is chronological order).
    async fn list(&self, query: &TaskQuery) -> StoreResult<Vec<Task>>;

    async fn count(&self, query: &TaskQuery) -> StoreResult<usize>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, channel_id: &str) -> StoreResult<Option<Account>>;
    async fn save(&self, account: &Account) -> StoreResult<()>;
    async fn delete(&self, channel_id: &str) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<Account>>;
}

#[async_trait]
pub trait DictionaryRepository: Send + Sync {
    async fn list_domains(&self) -> StoreResult<Vec<KeywordSet>>;
    async fn save_domain(&self, set: &KeywordSet) -> StoreResult<()>;
    async fn delete_domain(&self, id: &str) -> StoreResult<()>;

    async fn list_banned(&self) -> StoreResult<Vec<KeywordSet>>;
    async fn save_banned(&self, set: &KeywordSet) -> StoreResult<()>;
    async fn delete_banned(&self, id: &str) -> StoreResult<()>;
}
