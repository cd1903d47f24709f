#![allow(dead_code)]

//! Shared harness for engine integration tests.
//!
//! Builds the full wiring (in-memory store, bus, registry, orchestrator,
//! correlator) around a [`RecordingSender`] double that logs every upstream
//! command and answers with scripted acknowledgements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use atelier_core::account::Account;
use atelier_core::submit::Message;
use atelier_core::task::{Task, TaskStatus};
use atelier_engine::{
    AccountRegistry, Correlator, DictionaryCache, EngineConfig, LockRegistry, Orchestrator,
    SeenEvents, UpstreamInstance,
};
use atelier_events::TaskBus;
use atelier_gateway::event_data::{
    Attachment, ComponentRow, EventData, InteractionMetadata, MessageComponent,
};
use atelier_gateway::{BlendDimensions, CommandSender, GatewayResult, MessageKind};
use atelier_store::MemoryStore;
use atelier_store::TaskRepository;

// ---------------------------------------------------------------------------
// RecordingSender
// ---------------------------------------------------------------------------

/// Command double: records `method:argument` entries and answers with the
/// scripted response for the method (success by default).
#[derive(Default)]
pub struct RecordingSender {
    calls: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, Message>>,
    seed_history: Mutex<Vec<EventData>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_call(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }

    pub fn script_response(&self, method: &str, message: Message) {
        self.responses
            .lock()
            .unwrap()
            .insert(method.to_string(), message);
    }

    pub fn script_seed_history(&self, messages: Vec<EventData>) {
        *self.seed_history.lock().unwrap() = messages;
    }

    fn record(&self, method: &str, detail: String) -> Message {
        self.calls.lock().unwrap().push(format!("{method}:{detail}"));
        self.responses
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .unwrap_or_else(Message::success)
    }
}

#[async_trait]
impl CommandSender for RecordingSender {
    async fn imagine(&self, prompt: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("imagine", prompt.to_string()))
    }

    async fn upscale(
        &self,
        message_id: &str,
        index: u8,
        hash: &str,
        _flags: i64,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("upscale", format!("{message_id}:{index}:{hash}")))
    }

    async fn variation(
        &self,
        message_id: &str,
        index: u8,
        hash: &str,
        _flags: i64,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("variation", format!("{message_id}:{index}:{hash}")))
    }

    async fn reroll(
        &self,
        message_id: &str,
        hash: &str,
        _flags: i64,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("reroll", format!("{message_id}:{hash}")))
    }

    async fn action(
        &self,
        message_id: &str,
        custom_id: &str,
        _flags: i64,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("action", format!("{message_id}:{custom_id}")))
    }

    async fn modal(
        &self,
        modal_message_id: &str,
        modal_custom_id: &str,
        prompt: &str,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("modal", format!("{modal_message_id}:{modal_custom_id}:{prompt}")))
    }

    async fn inpaint(
        &self,
        modal_message_id: &str,
        modal_custom_id: &str,
        prompt: &str,
        _mask_base64: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("inpaint", format!("{modal_message_id}:{modal_custom_id}:{prompt}")))
    }

    async fn describe(&self, upload_name: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("describe", upload_name.to_string()))
    }

    async fn describe_link(&self, link: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("describe_link", link.to_string()))
    }

    async fn blend(
        &self,
        upload_names: &[String],
        _dimensions: BlendDimensions,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("blend", upload_names.join(",")))
    }

    async fn shorten(&self, prompt: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("shorten", prompt.to_string()))
    }

    async fn edit(&self, prompt: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("edit", prompt.to_string()))
    }

    async fn retexture(&self, prompt: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("retexture", prompt.to_string()))
    }

    async fn video(&self, prompt: &str, motion: &str, _nonce: &str) -> GatewayResult<Message> {
        Ok(self.record("video", format!("{motion}:{prompt}")))
    }

    async fn show(&self, job_id: &str, _nonce: &str, channel_id: &str) -> GatewayResult<Message> {
        Ok(self.record("show", format!("{channel_id}:{job_id}")))
    }

    async fn info(&self, _nonce: &str, channel_id: &str) -> GatewayResult<Message> {
        Ok(self.record("info", channel_id.to_string()))
    }

    async fn setting(&self, _nonce: &str, channel_id: &str) -> GatewayResult<Message> {
        Ok(self.record("setting", channel_id.to_string()))
    }

    async fn setting_select(&self, message_id: &str, value: &str) -> GatewayResult<Message> {
        Ok(self.record("setting_select", format!("{message_id}:{value}")))
    }

    async fn setting_button(
        &self,
        message_id: &str,
        custom_id: &str,
        _nonce: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("setting_button", format!("{message_id}:{custom_id}")))
    }

    async fn seed(&self, hash: &str, _nonce: &str, channel_id: &str) -> GatewayResult<Message> {
        Ok(self.record("seed", format!("{channel_id}:{hash}")))
    }

    async fn seed_messages(
        &self,
        channel_id: &str,
        _limit: usize,
    ) -> GatewayResult<Vec<EventData>> {
        self.record("seed_messages", channel_id.to_string());
        Ok(self.seed_history.lock().unwrap().clone())
    }

    async fn seed_react(
        &self,
        message_id: &str,
        channel_id: &str,
        emoji: &str,
    ) -> GatewayResult<Message> {
        Ok(self.record("seed_react", format!("{channel_id}:{message_id}:{emoji}")))
    }

    async fn upload(&self, filename: &str, _bytes: Vec<u8>) -> GatewayResult<String> {
        self.record("upload", filename.to_string());
        Ok(format!("uploads/{filename}"))
    }

    async fn send_image(&self, upload_ref: &str, channel_id: &str) -> GatewayResult<String> {
        self.record("send_image", format!("{channel_id}:{upload_ref}"));
        Ok(format!("https://storage.example/{upload_ref}"))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<TaskBus>,
    pub locks: Arc<LockRegistry>,
    pub seen: Arc<SeenEvents>,
    pub registry: Arc<AccountRegistry>,
    pub cache: Arc<DictionaryCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub correlator: Arc<Correlator>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(TaskBus::default());
        let locks = LockRegistry::new();
        let seen = Arc::new(SeenEvents::default());
        let registry = AccountRegistry::new();
        let cache = Arc::new(DictionaryCache::new(store.clone()));
        let config = Arc::new(config);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            store.clone(),
            Arc::clone(&cache),
            Arc::clone(&locks),
            Arc::clone(&bus),
        ));
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&registry),
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&seen),
            Arc::clone(&locks),
        ));
        Self {
            store,
            bus,
            locks,
            seen,
            registry,
            cache,
            orchestrator,
            correlator,
        }
    }

    /// Spawn and register an instance for `account`; returns its sender.
    pub async fn add_account(&self, account: Account) -> Arc<RecordingSender> {
        let sender = RecordingSender::new();
        let instance = UpstreamInstance::spawn(
            account,
            sender.clone(),
            self.store.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.locks),
        );
        self.registry.register(instance).await;
        sender
    }

    pub async fn task(&self, id: &str) -> Task {
        TaskRepository::get(self.store.as_ref(), id)
            .await
            .expect("store read")
            .expect("task exists")
    }

    /// Wait until the task reaches `status` (virtual-time friendly).
    pub async fn wait_status(&self, id: &str, status: TaskStatus, timeout: Duration) -> Task {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.task(id).await;
            if task.status == status {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {:?}, wanted {status:?}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait until `sender` has logged a call starting with `prefix`.
    pub async fn wait_call(&self, sender: &RecordingSender, prefix: &str, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !sender.has_call(prefix) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no call starting with {prefix:?}; got {:?}",
                sender.calls()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// A chat account with instant pacing, sized for tests.
pub fn fast_account(channel_id: &str, core_size: usize, fast_queue: usize) -> Account {
    let mut account = Account::new(channel_id, "guild-1");
    account.core_size = core_size;
    account.queue_sizes.fast = fast_queue;
    account.queue_sizes.relax = 0;
    account.queue_sizes.turbo = 0;
    account.allowed_modes = vec![atelier_core::task::SpeedMode::Fast];
    account.interval_secs = 0.0;
    account.after_interval_min_secs = 0.0;
    account.after_interval_max_secs = 0.0;
    account.timeout_minutes = 5;
    account
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn event(id: &str, channel_id: &str, kind: MessageKind, content: &str) -> EventData {
    EventData {
        id: id.to_string(),
        author_id: "upstream-bot".to_string(),
        kind,
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        attachments: Vec::new(),
        components: Vec::new(),
        interaction_metadata: None,
        flags: None,
        referenced_message_id: None,
        nonce: None,
    }
}

pub fn with_nonce(mut event: EventData, nonce: &str) -> EventData {
    event.nonce = Some(nonce.to_string());
    event
}

pub fn with_attachment(mut event: EventData, url: &str) -> EventData {
    event.attachments.push(Attachment {
        url: url.to_string(),
        filename: None,
    });
    event
}

pub fn with_reference(mut event: EventData, message_id: &str) -> EventData {
    event.referenced_message_id = Some(message_id.to_string());
    event
}

pub fn with_interaction(mut event: EventData, interaction_id: &str) -> EventData {
    event.interaction_metadata = Some(InteractionMetadata {
        id: interaction_id.to_string(),
        name: None,
    });
    event
}

/// The standard U1..U4 / V1..V4 / reroll grid under a finished imagine.
pub fn with_grid_buttons(mut event: EventData, hash: &str) -> EventData {
    let mut upscales = Vec::new();
    let mut variations = Vec::new();
    for index in 1..=4 {
        upscales.push(button(
            &format!("MJ::JOB::upsample::{index}::{hash}"),
            &format!("U{index}"),
        ));
        variations.push(button(
            &format!("MJ::JOB::variation::{index}::{hash}"),
            &format!("V{index}"),
        ));
    }
    upscales.push(button(&format!("MJ::JOB::reroll::0::{hash}::SOLO"), ""));
    event.components = vec![
        ComponentRow { components: upscales },
        ComponentRow {
            components: variations,
        },
    ];
    event
}

fn button(custom_id: &str, label: &str) -> MessageComponent {
    MessageComponent {
        custom_id: custom_id.to_string(),
        label: label.to_string(),
        emoji: None,
        style: 2,
        kind: 2,
    }
}
