//! Event correlator.
//!
//! Consumes normalized chat events plus partner/official poll updates,
//! resolves each to a running task (nonce, then message id, then referenced
//! message id, then a prompt match against the instance's in-flight tasks),
//! and drives progress updates and terminal transitions. All task writes
//! happen under the task-level lock; replayed events are dropped before any
//! write, so applying the same event twice leaves the store byte-identical.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use atelier_core::task::{Task, TaskAction};
use atelier_core::types::TaskId;
use atelier_events::{TaskBus, TaskEvent};
use atelier_gateway::content;
use atelier_gateway::{EventData, MessageKind, PolledStatus, PolledTaskUpdate};
use atelier_store::TaskRepository;

use crate::instance::UpstreamInstance;
use crate::locks::{LockRegistry, SeenEvents};
use crate::registry::AccountRegistry;

/// How long the correlator waits for a task-level lock.
const TASK_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Correlates upstream happenings back to in-flight tasks.
pub struct Correlator {
    registry: Arc<AccountRegistry>,
    store: Arc<dyn TaskRepository>,
    bus: Arc<TaskBus>,
    seen: Arc<SeenEvents>,
    locks: Arc<LockRegistry>,
}

impl Correlator {
    pub fn new(
        registry: Arc<AccountRegistry>,
        store: Arc<dyn TaskRepository>,
        bus: Arc<TaskBus>,
        seen: Arc<SeenEvents>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            seen,
            locks,
        }
    }

    /// Drain an event channel until it closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<EventData>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => break,
                },
            }
        }
        tracing::info!("Correlator loop exited");
    }

    /// Apply one chat event.
    pub async fn on_event(&self, event: EventData) {
        if !self.seen.insert(&dedup_key(&event)) {
            tracing::trace!(event_id = %event.id, "Duplicate event dropped");
            return;
        }

        let instance = match self.resolve_instance(&event.channel_id).await {
            Some(instance) => instance,
            None => {
                tracing::trace!(channel_id = %event.channel_id, "Event for unknown channel");
                return;
            }
        };

        if event.kind == MessageKind::ModalCreate {
            self.handle_modal_opened(&instance, &event).await;
            return;
        }

        let task_id = match self.resolve_task(&instance, &event).await {
            Some(task_id) => task_id,
            None => {
                tracing::trace!(event_id = %event.id, "Event matches no in-flight task");
                return;
            }
        };

        self.apply_event(&instance, &task_id, &event).await;
    }

    /// Apply one partner/official poll payload.
    pub async fn on_poll_update(&self, update: PolledTaskUpdate) {
        let task_id = update.task_id.clone();
        let guard = self
            .locks
            .acquire(&format!("task:{task_id}"), TASK_LOCK_WAIT)
            .await;
        let _guard = match guard {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Task lock unavailable");
                return;
            }
        };
        let mut task = match self.load_live_task(&task_id).await {
            Some(task) => task,
            None => return,
        };

        if let Some(hash) = &update.message_hash {
            task.runtime.message_hash.get_or_insert_with(|| hash.clone());
        }
        if let Some(prompt) = &update.final_prompt {
            task.runtime.final_prompt.get_or_insert_with(|| prompt.clone());
        }
        if !update.buttons.is_empty() {
            task.buttons = update.buttons.clone();
        }

        match update.status {
            PolledStatus::Submitted | PolledStatus::InProgress => {
                if let Some(progress) = &update.progress {
                    task.progress = Some(progress.clone());
                }
                if let Some(url) = &update.image_url {
                    task.image_url = Some(url.clone());
                }
                self.persist(&task).await;
                self.bus.publish(TaskEvent::updated(task_id));
            }
            PolledStatus::Success => {
                if let Some(url) = &update.image_url {
                    task.image_url = Some(url.clone());
                }
                if task.succeed(Utc::now()).is_ok() {
                    self.persist(&task).await;
                    self.bus.publish(TaskEvent::finished(task_id, task.status));
                }
            }
            PolledStatus::Failure => {
                let reason = update
                    .fail_reason
                    .clone()
                    .unwrap_or_else(|| "Upstream failure".to_string());
                if task.fail(Utc::now(), reason).is_ok() {
                    self.persist(&task).await;
                    self.bus.publish(TaskEvent::finished(task_id, task.status));
                }
            }
        }
    }

    // -- resolution --

    async fn resolve_instance(&self, channel_id: &str) -> Option<Arc<UpstreamInstance>> {
        if let Some(instance) = self.registry.by_channel(channel_id).await {
            return Some(instance);
        }
        self.registry.by_sub_channel(channel_id).await
    }

    /// Correlation key priority: nonce, message id, referenced message id,
    /// prompt match among the instance's in-flight tasks.
    async fn resolve_task(&self, instance: &UpstreamInstance, event: &EventData) -> Option<TaskId> {
        if let Some(nonce) = &event.nonce {
            if let Some(task_id) = instance.find_by_nonce(nonce).await {
                return Some(task_id);
            }
        }
        if let Some(task_id) = instance.find_by_message_id(&event.id).await {
            return Some(task_id);
        }
        if let Some(referenced) = &event.referenced_message_id {
            if let Some(task_id) = instance.find_by_message_id(referenced).await {
                return Some(task_id);
            }
        }
        let header = content::parse_content_header(&event.content)?;
        for task_id in instance.running_task_ids().await {
            let Ok(Some(task)) = self.store.get(&task_id).await else {
                continue;
            };
            if prompt_matches(&task, &header.prompt) {
                return Some(task_id);
            }
        }
        None
    }

    // -- handlers --

    async fn handle_modal_opened(&self, instance: &UpstreamInstance, event: &EventData) {
        let Some(nonce) = &event.nonce else {
            tracing::trace!(event_id = %event.id, "Modal event without nonce");
            return;
        };
        let Some(task_id) = instance.find_by_nonce(nonce).await else {
            return;
        };
        let guard = self
            .locks
            .acquire(&format!("task:{task_id}"), TASK_LOCK_WAIT)
            .await;
        let Ok(_guard) = guard else { return };
        let Some(mut task) = self.load_live_task(&task_id).await else {
            return;
        };
        task.runtime.remix_modal_message_id = Some(event.id.clone());
        task.runtime.interaction_metadata_id = Some(
            event
                .interaction_metadata
                .as_ref()
                .map(|m| m.id.clone())
                .unwrap_or_else(|| event.id.clone()),
        );
        self.persist(&task).await;
        self.bus.publish(TaskEvent::modal_opened(task_id));
        tracing::debug!(event_id = %event.id, "Modal window correlated");
    }

    async fn apply_event(&self, instance: &UpstreamInstance, task_id: &str, event: &EventData) {
        let guard = self
            .locks
            .acquire(&format!("task:{task_id}"), TASK_LOCK_WAIT)
            .await;
        let _guard = match guard {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Task lock unavailable");
                return;
            }
        };
        let mut task = match self.load_live_task(task_id).await {
            Some(task) => task,
            None => return,
        };

        // Failure markers win over everything else.
        if let Some(reason) = content::error_reason(&event.content) {
            if task.fail(Utc::now(), reason).is_ok() {
                self.persist(&task).await;
                self.bus
                    .publish(TaskEvent::finished(task_id.to_string(), task.status));
            }
            return;
        }

        // First-correlation bookkeeping.
        if task.runtime.message_id.is_none() {
            task.runtime.message_id = Some(event.id.clone());
            instance.bind_message_id(&event.id, task_id).await;
        }
        if task.runtime.message_hash.is_none() {
            if let Some(url) = event.first_attachment_url() {
                task.runtime.message_hash = content::parse_message_hash(url);
            }
        }
        if let Some(header) = content::parse_content_header(&event.content) {
            task.runtime.final_prompt.get_or_insert(header.prompt);
        }

        match event.kind {
            MessageKind::Create => self.handle_create(instance, task, event).await,
            MessageKind::Update => self.handle_update(task, event).await,
            MessageKind::Delete | MessageKind::ModalCreate => {}
        }
    }

    async fn handle_create(
        &self,
        instance: &UpstreamInstance,
        mut task: Task,
        event: &EventData,
    ) {
        let task_id = task.id.clone();

        // Seed flow: the /show reply carries the image; it is not a result.
        if task.action == TaskAction::Seed {
            self.handle_seed_event(instance, task, event).await;
            return;
        }

        if event.content.contains(content::WAITING_TO_START) {
            task.progress = Some("0%".to_string());
            self.persist(&task).await;
            self.bus.publish(TaskEvent::updated(task_id));
            return;
        }

        if let Some(url) = event.first_attachment_url() {
            // Reroll replies can be redelivered under a fresh event id;
            // dedup them by the owning task within this process.
            if task.action == TaskAction::Reroll
                && !self.seen.insert(&format!("reroll-task:{}", task.id))
            {
                return;
            }
            // The final grid arrives on a new message id; rebind so
            // follow-up actions address the result message.
            task.runtime.message_id = Some(event.id.clone());
            instance.bind_message_id(&event.id, &task_id).await;
            if let Some(hash) = content::parse_message_hash(url) {
                task.runtime.message_hash = Some(hash);
            }
            task.image_url = Some(url.to_string());
            let buttons = event.buttons();
            if !buttons.is_empty() {
                task.buttons = buttons;
            }
            if task.succeed(Utc::now()).is_ok() {
                self.persist(&task).await;
                self.bus
                    .publish(TaskEvent::finished(task_id, task.status));
            }
            return;
        }

        // Text-only replies finish describe/shorten tasks.
        if matches!(task.action, TaskAction::Describe | TaskAction::Shorten) {
            task.description = Some(event.content.clone());
            let buttons = event.buttons();
            if !buttons.is_empty() {
                task.buttons = buttons;
            }
            if task.succeed(Utc::now()).is_ok() {
                self.persist(&task).await;
                self.bus
                    .publish(TaskEvent::finished(task_id, task.status));
            }
            return;
        }

        tracing::trace!(task_id = %task_id, "Unclassified CREATE event ignored");
    }

    async fn handle_update(&self, mut task: Task, event: &EventData) {
        let task_id = task.id.clone();
        let mut changed = false;

        if let Some(progress) = content::parse_progress(&event.content) {
            task.progress = Some(progress);
            changed = true;
        }
        if let Some(url) = event.first_attachment_url() {
            if !task.image_urls.iter().any(|u| u == url) {
                task.image_urls.push(url.to_string());
            }
            task.image_url = Some(url.to_string());
            changed = true;
        }
        let buttons = event.buttons();
        if !buttons.is_empty() {
            task.buttons = buttons;
            changed = true;
        }

        if changed {
            self.persist(&task).await;
            self.bus.publish(TaskEvent::updated(task_id));
        }
    }

    /// Seed flow events: first the /show reply (records the message id to
    /// react to), then the seed DM (records the seed and finishes).
    async fn handle_seed_event(
        &self,
        instance: &UpstreamInstance,
        mut task: Task,
        event: &EventData,
    ) {
        let task_id = task.id.clone();

        if let Some(seed) = content::parse_seed(&event.content) {
            task.seed = Some(seed);
            if task.succeed(Utc::now()).is_ok() {
                self.persist(&task).await;
                self.bus
                    .publish(TaskEvent::finished(task_id, task.status));
            }
            return;
        }

        if task.runtime.seed_message_id.is_none() && event.first_attachment_url().is_some() {
            task.runtime.seed_message_id = Some(event.id.clone());
            instance.bind_message_id(&event.id, &task_id).await;
            self.persist(&task).await;
            self.bus.publish(TaskEvent::updated(task_id));
        }
    }

    // -- plumbing --

    /// Load the task unless it is already terminal (replay guard).
    async fn load_live_task(&self, task_id: &str) -> Option<Task> {
        match self.store.get(task_id).await {
            Ok(Some(task)) if !task.is_terminal() => Some(task),
            Ok(Some(_)) => {
                tracing::trace!(task_id = %task_id, "Event for terminal task ignored");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Store read failed");
                None
            }
        }
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save(task).await {
            tracing::error!(task_id = %task.id, error = %e, "Store write failed");
        }
    }
}

/// Replay-dedup key.
///
/// Replays are byte-identical; progress edits reuse the message id with new
/// content, so the key folds the mutable parts in alongside the event id.
fn dedup_key(event: &EventData) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    event.content.hash(&mut hasher);
    event.attachments.len().hash(&mut hasher);
    event.nonce.hash(&mut hasher);
    format!("{}:{:?}:{:016x}", event.id, event.kind, hasher.finish())
}

/// Whether a header prompt addresses this task.
fn prompt_matches(task: &Task, header_prompt: &str) -> bool {
    if let Some(final_prompt) = &task.runtime.final_prompt {
        if final_prompt == header_prompt {
            return true;
        }
    }
    match &task.prompt_en {
        Some(prompt_en) if !prompt_en.is_empty() => header_prompt.contains(prompt_en.as_str()),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
