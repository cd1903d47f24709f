//! Task orchestrator.
//!
//! One `submit_*` entrypoint per action. Preflight (banned-word scan,
//! domain routing, uploads) runs before an instance is committed; the
//! backend command itself is packaged as a producer and executed by the
//! chosen instance's worker pool. The button decision table, the modal
//! two-phase flow and the seed flow live here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::time::Instant;

use atelier_core::account::{Account, Capability};
use atelier_core::banned::find_banned_word;
use atelier_core::custom_id::{CustomId, PicReaderTarget};
use atelier_core::domain::matching_domain_ids;
use atelier_core::submit::{Message, SubmitCode, SubmitResult};
use atelier_core::task::{
    AccountFilter, BotFamily, SpeedMode, Task, TaskAction, TaskRuntime, TaskStatus,
};
use atelier_core::types::{next_nonce, next_task_id, TaskId};
use atelier_core::CoreError;
use atelier_events::{TaskBus, TaskEvent};
use atelier_gateway::{content, upload, BlendDimensions, CommandSender};
use atelier_store::{TaskQuery, TaskRepository};

use crate::cache::DictionaryCache;
use crate::config::EngineConfig;
use crate::instance::{Producer, UpstreamInstance};
use crate::locks::LockRegistry;
use crate::registry::AccountRegistry;
use crate::selector::{SelectRequirements, Selector};

/// Poll interval while waiting for the modal window to open.
const MODAL_POLL_INTERVAL: Duration = Duration::from_millis(2_500);

/// Ceiling on the modal-window wait.
const MODAL_OPEN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Settle pause between the window opening and the second-phase submit.
const MODAL_SETTLE: Duration = Duration::from_millis(1_200);

/// Ceiling on each seed-flow wait (show reply, then the seed DM).
const SEED_STEP_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Poll interval for the seed-flow waits.
const SEED_POLL_INTERVAL: Duration = Duration::from_millis(2_500);

/// After this long without a correlated show reply, scan the private
/// channel history directly.
const SEED_SCAN_AFTER: Duration = Duration::from_secs(30);

/// How many private-channel messages the fallback scan fetches.
const SEED_SCAN_LIMIT: usize = 50;

/// Reaction that asks the upstream to DM the seed.
const SEED_REACTION: &str = "\u{2709}\u{fe0f}";

/// How long orchestrator paths wait for a task-level lock.
const TASK_LOCK_WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImagineRequest {
    pub prompt: String,
    /// Attached images: `http(s)` URLs or base64 data URLs.
    pub images: Vec<String>,
    pub bot_family: Option<BotFamily>,
    pub mode: Option<SpeedMode>,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DescribeRequest {
    pub image: String,
    pub bot_family: Option<BotFamily>,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlendRequest {
    pub images: Vec<String>,
    pub dimensions: BlendDimensions,
    #[serde(default)]
    pub bot_family: Option<BotFamily>,
    #[serde(default)]
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShortenRequest {
    pub prompt: String,
    pub bot_family: Option<BotFamily>,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShowRequest {
    pub job_id: String,
    pub bot_family: Option<BotFamily>,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditRequest {
    pub image: String,
    pub prompt: String,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoRequest {
    pub image: Option<String>,
    pub prompt: String,
    /// `"high"` or `"low"` camera motion.
    pub motion: Option<String>,
    pub bot_family: Option<BotFamily>,
    pub filter: AccountFilter,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionRequest {
    pub task_id: TaskId,
    pub custom_id: String,
    /// Chat-platform application instance id, when the edge received one.
    pub chat_instance_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModalRequest {
    pub task_id: TaskId,
    /// User-edited prompt for the window, when the action allows one.
    pub prompt: Option<String>,
    /// Region mask for inpaint, base64-encoded.
    pub mask_base64: Option<String>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Arc<EngineConfig>,
    registry: Arc<AccountRegistry>,
    selector: Selector,
    store: Arc<dyn TaskRepository>,
    cache: Arc<DictionaryCache>,
    locks: Arc<LockRegistry>,
    bus: Arc<TaskBus>,
    http: reqwest::Client,
}

impl Orchestrator {
    pub fn new(
        config: Arc<EngineConfig>,
        registry: Arc<AccountRegistry>,
        store: Arc<dyn TaskRepository>,
        cache: Arc<DictionaryCache>,
        locks: Arc<LockRegistry>,
        bus: Arc<TaskBus>,
    ) -> Self {
        let selector = Selector::new(Arc::clone(&registry), Arc::clone(&config));
        Self {
            config,
            registry,
            selector,
            store,
            cache,
            locks,
            bus,
            http: reqwest::Client::new(),
        }
    }

    // -- submissions ------------------------------------------------------

    pub async fn submit_imagine(&self, request: ImagineRequest) -> SubmitResult {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return SubmitResult::of(SubmitCode::ValidationError, "Prompt must not be empty");
        }
        // Translation is an external helper; the English prompt is the
        // caller's prompt until one is plugged in.
        let prompt_en = prompt.clone();
        if let Err(result) = self.scan_banned(&prompt_en).await {
            return result;
        }

        let bot = self.effective_bot(request.bot_family);
        let mut requirements = SelectRequirements {
            bot_family: Some(bot),
            preferred_mode: request.mode,
            ..Default::default()
        };
        if !request.filter.domain_ids.is_empty() {
            requirements.is_domain = true;
            requirements.domain_ids = request.filter.domain_ids.clone();
        } else if self.config.enable_vertical_domain {
            match self.cache.domains().await {
                Ok(sets) => {
                    let ids = matching_domain_ids(&prompt_en, &sets);
                    if !ids.is_empty() {
                        requirements.is_domain = true;
                        requirements.domain_ids = ids;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Domain cache unavailable; routing without it");
                }
            }
        }

        let instance = match self
            .select_with_domain_retry(&request.filter, requirements)
            .await
        {
            Some(instance) => instance,
            None => {
                return SubmitResult::of(SubmitCode::NotFound, "No available account instance")
            }
        };
        let account = instance.account().await;

        let image_urls = match self.resolve_images(&instance, &account, &request.images).await {
            Ok(urls) => urls,
            Err(e) => return SubmitResult::from(&e),
        };

        let mut task = self.new_task(TaskAction::Imagine, bot, &account, request.filter);
        task.mode = request.mode;
        task.prompt = Some(prompt.clone());
        task.prompt_en = Some(prompt_en.clone());
        task.description = Some(format!("/imagine {prompt}"));

        let final_prompt = prefix_urls(&image_urls, &prompt_en);
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            sender
                .imagine(&final_prompt, &nonce)
                .await
                .map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    pub async fn submit_describe(&self, request: DescribeRequest) -> SubmitResult {
        if request.image.trim().is_empty() {
            return SubmitResult::of(SubmitCode::ValidationError, "Image must not be empty");
        }
        let bot = self.effective_bot(request.bot_family);
        let requirements = SelectRequirements {
            bot_family: Some(bot),
            capability: Some(Capability::Describe),
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let mut task = self.new_task(TaskAction::Describe, bot, &account, request.filter);
        task.description = Some("/describe".to_string());
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();

        if upload::is_http_url(&request.image) {
            let link = request.image.clone();
            let producer: Producer = Box::pin(async move {
                sender
                    .describe_link(&link, &nonce)
                    .await
                    .map_err(CoreError::from)
            });
            return instance.submit_task(task, producer).await;
        }

        let upload_name = match self.upload_data_url(&instance, &request.image).await {
            Ok(name) => name,
            Err(e) => return SubmitResult::from(&e),
        };
        let producer: Producer = Box::pin(async move {
            sender
                .describe(&upload_name, &nonce)
                .await
                .map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    pub async fn submit_blend(&self, request: BlendRequest) -> SubmitResult {
        if !(2..=5).contains(&request.images.len()) {
            return SubmitResult::of(
                SubmitCode::ValidationError,
                "Blend needs between 2 and 5 images",
            );
        }
        let bot = self.effective_bot(request.bot_family);
        let requirements = SelectRequirements {
            bot_family: Some(bot),
            capability: Some(Capability::Blend),
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let mut upload_names = Vec::with_capacity(request.images.len());
        for image in &request.images {
            let name = if upload::is_http_url(image) {
                match self.rehost(&instance, image).await {
                    Ok(name) => name,
                    Err(e) => return SubmitResult::from(&e),
                }
            } else {
                match self.upload_data_url(&instance, image).await {
                    Ok(name) => name,
                    Err(e) => return SubmitResult::from(&e),
                }
            };
            upload_names.push(name);
        }

        let mut task = self.new_task(TaskAction::Blend, bot, &account, request.filter);
        task.description = Some("/blend".to_string());
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();
        let dimensions = request.dimensions;
        let producer: Producer = Box::pin(async move {
            sender
                .blend(&upload_names, dimensions, &nonce)
                .await
                .map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    pub async fn submit_shorten(&self, request: ShortenRequest) -> SubmitResult {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return SubmitResult::of(SubmitCode::ValidationError, "Prompt must not be empty");
        }
        if let Err(result) = self.scan_banned(&prompt).await {
            return result;
        }
        let bot = self.effective_bot(request.bot_family);
        let requirements = SelectRequirements {
            bot_family: Some(bot),
            capability: Some(Capability::Shorten),
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let mut task = self.new_task(TaskAction::Shorten, bot, &account, request.filter);
        task.prompt = Some(prompt.clone());
        task.prompt_en = Some(prompt.clone());
        task.description = Some(format!("/shorten {prompt}"));
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            sender.shorten(&prompt, &nonce).await.map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    pub async fn submit_show(&self, request: ShowRequest) -> SubmitResult {
        if request.job_id.trim().is_empty() {
            return SubmitResult::of(SubmitCode::ValidationError, "Job id must not be empty");
        }
        let bot = self.effective_bot(request.bot_family);
        let requirements = SelectRequirements {
            bot_family: Some(bot),
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let mut task = self.new_task(TaskAction::Show, bot, &account, request.filter);
        task.description = Some(format!("/show {}", request.job_id));
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let channel_id = account.channel_id.clone();
        let job_id = request.job_id.clone();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            sender
                .show(&job_id, &nonce, &channel_id)
                .await
                .map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    /// Edit an existing image with a prompt (partner/official backends).
    pub async fn submit_edit(&self, request: EditRequest) -> SubmitResult {
        self.submit_cloud_rework(TaskAction::Edit, request).await
    }

    /// Re-texture an existing image (partner/official backends).
    pub async fn submit_retexture(&self, request: EditRequest) -> SubmitResult {
        self.submit_cloud_rework(TaskAction::Retexture, request).await
    }

    pub async fn submit_video(&self, request: VideoRequest) -> SubmitResult {
        if !self.config.enable_video {
            return SubmitResult::of(SubmitCode::ValidationError, "Video is disabled");
        }
        let prompt = request.prompt.trim().to_string();
        if let Err(result) = self.scan_banned(&prompt).await {
            return result;
        }
        let bot = self.effective_bot(request.bot_family);
        let requirements = SelectRequirements {
            bot_family: Some(bot),
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let image_urls = match &request.image {
            Some(image) => match self.resolve_images(&instance, &account, &[image.clone()]).await
            {
                Ok(urls) => urls,
                Err(e) => return SubmitResult::from(&e),
            },
            None => Vec::new(),
        };

        let mut task = self.new_task(TaskAction::Video, bot, &account, request.filter);
        task.prompt = Some(prompt.clone());
        task.prompt_en = Some(prompt.clone());
        task.description = Some(format!("/video {prompt}"));
        let final_prompt = prefix_urls(&image_urls, &prompt);
        let motion = request.motion.unwrap_or_else(|| "low".to_string());
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            sender
                .video(&final_prompt, &motion, &nonce)
                .await
                .map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    async fn submit_cloud_rework(&self, action: TaskAction, request: EditRequest) -> SubmitResult {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() || request.image.trim().is_empty() {
            return SubmitResult::of(
                SubmitCode::ValidationError,
                "Image and prompt must not be empty",
            );
        }
        if let Err(result) = self.scan_banned(&prompt).await {
            return result;
        }
        let requirements = SelectRequirements {
            bot_family: Some(BotFamily::Mj),
            backends: vec![
                atelier_core::task::BackendFamily::Partner,
                atelier_core::task::BackendFamily::Official,
            ],
            ..Default::default()
        };
        let Some(instance) = self.selector.choose(&request.filter, &requirements).await else {
            return SubmitResult::of(SubmitCode::NotFound, "No available account instance");
        };
        let account = instance.account().await;

        let image_urls = match self
            .resolve_images(&instance, &account, &[request.image.clone()])
            .await
        {
            Ok(urls) => urls,
            Err(e) => return SubmitResult::from(&e),
        };

        let mut task = self.new_task(action, BotFamily::Mj, &account, request.filter);
        task.prompt = Some(prompt.clone());
        task.prompt_en = Some(prompt.clone());
        task.description = Some(format!("/{} {prompt}", action_verb(action)));
        let final_prompt = prefix_urls(&image_urls, &prompt);
        let nonce = task.runtime.nonce.clone().unwrap_or_default();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            let result = match action {
                TaskAction::Retexture => sender.retexture(&final_prompt, &nonce).await,
                _ => sender.edit(&final_prompt, &nonce).await,
            };
            result.map_err(CoreError::from)
        });
        instance.submit_task(task, producer).await
    }

    // -- button actions ---------------------------------------------------

    /// Dispatch a button click against a finished task.
    pub async fn submit_action(&self, request: ActionRequest) -> SubmitResult {
        let parent = match self.store.get(&request.task_id).await {
            Ok(Some(parent)) => parent,
            Ok(None) => return SubmitResult::of(SubmitCode::NotFound, "Task not found"),
            Err(e) => return SubmitResult::from(&CoreError::from(e)),
        };
        let Some(parsed) = CustomId::parse(&request.custom_id) else {
            return SubmitResult::of(SubmitCode::ValidationError, "Unknown customId");
        };
        let Some(message_id) = parent.runtime.message_id.clone() else {
            return SubmitResult::of(
                SubmitCode::ValidationError,
                "Parent task has no upstream message",
            );
        };
        let Some(instance) = self.owning_instance(&parent).await else {
            return SubmitResult::of(SubmitCode::NotFound, "Account instance unavailable");
        };
        let account = instance.account().await;
        let bot = parent.bot_family;
        let flags = parent.runtime.flags.unwrap_or(0);

        match parsed {
            // Bookmarks are fire-and-forget; no task is created.
            CustomId::Bookmark { .. } => {
                let sender = instance.sender();
                let custom_id = request.custom_id.clone();
                let nonce = next_nonce();
                tokio::spawn(async move {
                    if let Err(e) = sender.action(&message_id, &custom_id, flags, &nonce).await {
                        tracing::warn!(error = %e, "Bookmark action failed");
                    }
                });
                SubmitResult::of(SubmitCode::Success, "Bookmark submitted")
            }

            CustomId::CustomZoom { .. } => {
                self.modal_handoff(&instance, &parent, TaskAction::Zoom, &request, None)
                    .await
            }
            CustomId::Inpaint { .. } => {
                self.modal_handoff(&instance, &parent, TaskAction::Inpaint, &request, None)
                    .await
            }
            CustomId::Job { ref kind, .. } if kind.starts_with("animate") => {
                if !self.config.enable_video {
                    return SubmitResult::of(SubmitCode::ValidationError, "Video is disabled");
                }
                self.modal_handoff(&instance, &parent, TaskAction::Video, &request, None)
                    .await
            }

            CustomId::PicReader { target: PicReaderTarget::All } => {
                self.pic_reader_fan_out(&instance, &parent, &request).await
            }
            CustomId::PicReader { target: PicReaderTarget::Line(n) } => {
                let Some(line) = parent
                    .description
                    .as_deref()
                    .and_then(|d| content::extract_numbered_line(d, n))
                else {
                    return SubmitResult::of(SubmitCode::NotFound, "Prompt line not found");
                };
                self.modal_handoff(&instance, &parent, TaskAction::Imagine, &request, Some(line))
                    .await
            }
            CustomId::PromptAnalyzer { index } => {
                let Some(line) = parent
                    .description
                    .as_deref()
                    .and_then(|d| content::extract_shortened_prompt(d, index))
                else {
                    return SubmitResult::of(SubmitCode::NotFound, "Prompt line not found");
                };
                self.modal_handoff(&instance, &parent, TaskAction::Imagine, &request, Some(line))
                    .await
            }

            CustomId::Pan { .. } => {
                self.remix_or_queue(&instance, &account, &parent, TaskAction::Pan, &request)
                    .await
            }
            CustomId::Variation { .. }
            | CustomId::LowVariation { .. }
            | CustomId::HighVariation { .. } => {
                self.remix_or_queue(&instance, &account, &parent, TaskAction::Variation, &request)
                    .await
            }
            CustomId::Reroll { .. } => {
                self.remix_or_queue(&instance, &account, &parent, TaskAction::Reroll, &request)
                    .await
            }

            CustomId::Upsample { index, hash } => {
                let mut child = self.child_task(&parent, TaskAction::Upscale, &request);
                child.description = Some(format!("/up {index} of {}", parent.id));
                let nonce = child.runtime.nonce.clone().unwrap_or_default();
                let sender = instance.sender();
                let producer: Producer = Box::pin(async move {
                    sender
                        .upscale(&message_id, index, &hash, flags, &nonce)
                        .await
                        .map_err(CoreError::from)
                });
                instance.submit_task(child, producer).await
            }

            // Modal-internal shapes are not clickable buttons.
            CustomId::RemixModal { .. }
            | CustomId::PanModal { .. }
            | CustomId::ImagineModal { .. } => {
                SubmitResult::of(SubmitCode::ValidationError, "Not an actionable component")
            }

            CustomId::HighVariabilityMode { .. } | CustomId::Job { .. } => {
                let mut child = self.child_task(&parent, TaskAction::Action, &request);
                child.description = Some(format!("/action {}", request.custom_id));
                let nonce = child.runtime.nonce.clone().unwrap_or_default();
                let custom_id = request.custom_id.clone();
                let sender = instance.sender();
                let producer: Producer = Box::pin(async move {
                    sender
                        .action(&message_id, &custom_id, flags, &nonce)
                        .await
                        .map_err(CoreError::from)
                });
                instance.submit_task(child, producer).await
            }
        }
    }

    /// Pan/variation/reroll honor the account remix toggle: with remix on
    /// the submission goes through the modal window (auto-submitted when
    /// the account says so), otherwise it is a plain queued command.
    async fn remix_or_queue(
        &self,
        instance: &Arc<UpstreamInstance>,
        account: &Account,
        parent: &Task,
        action: TaskAction,
        request: &ActionRequest,
    ) -> SubmitResult {
        let remix = parent
            .account_filter
            .remix
            .unwrap_or_else(|| account.remix_on(parent.bot_family));
        if remix {
            let handoff = self
                .modal_handoff(instance, parent, action, request, None)
                .await;
            if account.remix_auto_submit {
                if let Some(child_id) = handoff.result.clone() {
                    return self
                        .submit_modal(ModalRequest {
                            task_id: child_id,
                            prompt: None,
                            mask_base64: None,
                        })
                        .await;
                }
            }
            return handoff;
        }

        let parsed = CustomId::parse(&request.custom_id);
        let message_id = parent.runtime.message_id.clone().unwrap_or_default();
        let flags = parent.runtime.flags.unwrap_or(0);
        let mut child = self.child_task(parent, action, request);
        child.description = Some(format!("/action {}", request.custom_id));
        let nonce = child.runtime.nonce.clone().unwrap_or_default();
        let custom_id = request.custom_id.clone();
        let sender = instance.sender();
        let producer: Producer = Box::pin(async move {
            let result = match parsed {
                Some(CustomId::Variation { index, hash }) => {
                    sender
                        .variation(&message_id, index, &hash, flags, &nonce)
                        .await
                }
                Some(CustomId::Reroll { hash }) => {
                    sender.reroll(&message_id, &hash, flags, &nonce).await
                }
                _ => sender.action(&message_id, &custom_id, flags, &nonce).await,
            };
            result.map_err(CoreError::from)
        });
        instance.submit_task(child, producer).await
    }

    /// Create a MODAL child and hand the window back to the caller.
    async fn modal_handoff(
        &self,
        _instance: &Arc<UpstreamInstance>,
        parent: &Task,
        action: TaskAction,
        request: &ActionRequest,
        final_prompt: Option<String>,
    ) -> SubmitResult {
        let mut child = self.child_task(parent, action, request);
        let prompt = final_prompt
            .or_else(|| parent.runtime.final_prompt.clone())
            .or_else(|| parent.prompt_en.clone())
            .unwrap_or_default();
        child.runtime.final_prompt = Some(prompt.clone());
        if let Err(e) = child.transition(TaskStatus::Modal) {
            return SubmitResult::from(&e);
        }
        if let Err(e) = self.store.save(&child).await {
            return SubmitResult::from(&CoreError::from(e));
        }
        tracing::info!(task_id = %child.id, action = ?action, "Modal window handoff");
        SubmitResult::of(SubmitCode::Existed, "Waiting for window confirm")
            .with_result(child.id)
            .with_property("finalPrompt", serde_json::json!(prompt))
            .with_property("remix", serde_json::json!(true))
    }

    /// `PicReader::all`: up to four independent MODAL submits, each with a
    /// fresh nonce and its own prompt line.
    async fn pic_reader_fan_out(
        &self,
        instance: &Arc<UpstreamInstance>,
        parent: &Task,
        request: &ActionRequest,
    ) -> SubmitResult {
        let Some(description) = parent.description.clone() else {
            return SubmitResult::of(SubmitCode::NotFound, "Prompt line not found");
        };
        let mut task_ids = Vec::new();
        for n in 1..=4u8 {
            let Some(line) = content::extract_numbered_line(&description, n) else {
                continue;
            };
            let line_request = ActionRequest {
                task_id: request.task_id.clone(),
                custom_id: CustomId::PicReader {
                    target: PicReaderTarget::Line(n),
                }
                .to_string(),
                chat_instance_id: request.chat_instance_id.clone(),
            };
            let handoff = self
                .modal_handoff(
                    instance,
                    parent,
                    TaskAction::Imagine,
                    &line_request,
                    Some(line),
                )
                .await;
            let Some(child_id) = handoff.result.clone() else {
                continue;
            };
            let result = self
                .submit_modal(ModalRequest {
                    task_id: child_id.clone(),
                    prompt: None,
                    mask_base64: None,
                })
                .await;
            if result.is_success() {
                task_ids.push(serde_json::json!(child_id));
            }
        }
        if task_ids.is_empty() {
            return SubmitResult::of(SubmitCode::NotFound, "Prompt line not found");
        }
        SubmitResult::of(SubmitCode::Success, format!("{} tasks submitted", task_ids.len()))
            .with_property("taskIds", serde_json::Value::Array(task_ids))
    }

    // -- modal two-phase --------------------------------------------------

    /// Second half of the two-phase confirm: re-gate, open the window,
    /// wait for the correlated window ids, then dispatch the specific
    /// second-phase command.
    pub async fn submit_modal(&self, request: ModalRequest) -> SubmitResult {
        let mut task = match self.store.get(&request.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return SubmitResult::of(SubmitCode::NotFound, "Task not found"),
            Err(e) => return SubmitResult::from(&CoreError::from(e)),
        };
        if task.status != TaskStatus::Modal {
            return SubmitResult::of(SubmitCode::NotFound, "Task is not waiting for a window");
        }
        if let Some(parent_id) = &task.parent_id {
            match self.store.get(parent_id).await {
                Ok(Some(parent)) => {
                    if let Err(e) = task.check_follow_up(&parent) {
                        return SubmitResult::from(&e);
                    }
                }
                Ok(None) => {}
                Err(e) => return SubmitResult::from(&CoreError::from(e)),
            }
        }
        if let Some(prompt) = &request.prompt {
            if let Err(result) = self.scan_banned(prompt).await {
                return result;
            }
            task.runtime.final_prompt = Some(prompt.clone());
        }

        let Some(instance) = self.owning_instance(&task).await else {
            return SubmitResult::of(SubmitCode::NotFound, "Account instance unavailable");
        };
        let account = instance.account().await;

        let Some(custom_id_raw) = task.runtime.custom_id.clone() else {
            return SubmitResult::of(SubmitCode::ValidationError, "Task has no customId");
        };
        let Some(parsed) = CustomId::parse(&custom_id_raw) else {
            return SubmitResult::of(SubmitCode::ValidationError, "Unknown customId");
        };
        let Some(parent_message_id) = task.runtime.message_id.clone() else {
            return SubmitResult::of(
                SubmitCode::ValidationError,
                "Task has no upstream message",
            );
        };

        let plan = ModalPlan {
            store: Arc::clone(&self.store),
            sender: instance.sender(),
            locks: Arc::clone(&self.locks),
            task_id: task.id.clone(),
            parsed,
            custom_id_raw,
            parent_message_id,
            flags: task.runtime.flags.unwrap_or(0),
            nonce: task.runtime.nonce.clone().unwrap_or_default(),
            final_prompt: task.runtime.final_prompt.clone().unwrap_or_default(),
            mask_base64: request.mask_base64.clone(),
            high_variability: account.high_variability_active(task.bot_family),
        };
        let producer: Producer = Box::pin(run_modal_plan(plan));
        instance.submit_task(task, producer).await
    }

    // -- seed -------------------------------------------------------------

    /// Retrieve the seed of a finished task through the private channel.
    pub async fn fetch_seed(&self, task_id: &str) -> SubmitResult {
        let parent = match self.store.get(task_id).await {
            Ok(Some(parent)) => parent,
            Ok(None) => return SubmitResult::of(SubmitCode::NotFound, "Task not found"),
            Err(e) => return SubmitResult::from(&CoreError::from(e)),
        };

        // A previous retrieval may already carry the seed.
        let existing = TaskQuery {
            actions: vec![TaskAction::Seed],
            parent_id: Some(parent.id.clone()),
            ..Default::default()
        };
        if let Ok(children) = self.store.list(&existing).await {
            if let Some(done) = children.iter().find(|t| t.seed.is_some()) {
                return SubmitResult::of(SubmitCode::Success, "Seed already known")
                    .with_result(done.id.clone())
                    .with_property("seed", serde_json::json!(done.seed.clone()));
            }
        }

        let Some(hash) = parent.runtime.message_hash.clone() else {
            return SubmitResult::of(SubmitCode::ValidationError, "Task has no image hash");
        };
        let Some(instance) = self.owning_instance(&parent).await else {
            return SubmitResult::of(SubmitCode::NotFound, "Account instance unavailable");
        };
        let account = instance.account().await;
        let Some(private_channel) = account
            .private_channel_for(parent.bot_family)
            .map(str::to_string)
        else {
            return SubmitResult::of(
                SubmitCode::ValidationError,
                "No private channel configured",
            );
        };

        let mut seed_task = Task::new(
            next_task_id(),
            TaskAction::Seed,
            parent.bot_family,
            parent.backend_family,
        );
        seed_task.parent_id = Some(parent.id.clone());
        seed_task.instance_id = parent.instance_id.clone();
        seed_task.runtime = TaskRuntime {
            nonce: Some(next_nonce()),
            message_hash: Some(hash.clone()),
            ..Default::default()
        };
        seed_task.description = Some(format!("/seed of {}", parent.id));
        if let Err(e) = seed_task.transition(TaskStatus::Submitted) {
            return SubmitResult::from(&e);
        }
        seed_task.submit_time = Some(Utc::now());
        if let Err(e) = seed_task.start(Utc::now()) {
            return SubmitResult::from(&e);
        }
        if let Err(e) = self.store.save(&seed_task).await {
            return SubmitResult::from(&CoreError::from(e));
        }
        let nonce = seed_task.runtime.nonce.clone().unwrap_or_default();
        instance.bind_nonce(&nonce, &seed_task.id).await;

        let sender = instance.sender();
        match sender.seed(&hash, &nonce, &private_channel).await {
            Ok(ack) if ack.is_success() => {}
            Ok(ack) => {
                self.fail_seed_task(&seed_task.id, &ack.description).await;
                return SubmitResult::of(SubmitCode::Failure, ack.description);
            }
            Err(e) => {
                let core: CoreError = e.into();
                self.fail_seed_task(&seed_task.id, &core.to_string()).await;
                return SubmitResult::from(&core);
            }
        }

        // Wait for the /show reply, scanning the channel history as a
        // fallback when the event stream misses it.
        let Some(seed_message_id) = self
            .await_show_reply(&instance, &seed_task.id, &hash, &private_channel)
            .await
        else {
            self.fail_seed_task(&seed_task.id, "timeout").await;
            return SubmitResult::of(SubmitCode::NotFound, "timeout");
        };

        if let Err(e) = sender
            .seed_react(&seed_message_id, &private_channel, SEED_REACTION)
            .await
        {
            let core: CoreError = e.into();
            self.fail_seed_task(&seed_task.id, &core.to_string()).await;
            return SubmitResult::from(&core);
        }

        let Some(seed) = self
            .poll_task_field(&seed_task.id, SEED_STEP_TIMEOUT, |t| t.seed.clone())
            .await
        else {
            self.fail_seed_task(&seed_task.id, "timeout").await;
            return SubmitResult::of(SubmitCode::NotFound, "timeout");
        };

        SubmitResult::of(SubmitCode::Success, "Seed retrieved")
            .with_result(seed_task.id)
            .with_property("seed", serde_json::json!(seed))
    }

    // -- cancel -----------------------------------------------------------

    /// Explicit cancel. Best-effort: no upstream recall is attempted.
    pub async fn cancel_task(&self, task_id: &str) -> SubmitResult {
        let guard = self
            .locks
            .acquire(&format!("task:{task_id}"), TASK_LOCK_WAIT)
            .await;
        let _guard = match guard {
            Ok(guard) => guard,
            Err(e) => return SubmitResult::from(&e),
        };
        let mut task = match self.store.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return SubmitResult::of(SubmitCode::NotFound, "Task not found"),
            Err(e) => return SubmitResult::from(&CoreError::from(e)),
        };
        if task.is_terminal() {
            return SubmitResult::of(SubmitCode::ValidationError, "Task already terminal");
        }
        if let Err(e) = task.cancel(Utc::now()) {
            return SubmitResult::from(&e);
        }
        if let Err(e) = self.store.save(&task).await {
            return SubmitResult::from(&CoreError::from(e));
        }
        self.bus
            .publish(TaskEvent::finished(task.id.clone(), task.status));
        SubmitResult::of(SubmitCode::Success, "Cancelled").with_result(task.id)
    }

    // -- helpers ----------------------------------------------------------

    fn new_task(
        &self,
        action: TaskAction,
        bot: BotFamily,
        account: &Account,
        filter: AccountFilter,
    ) -> Task {
        let mut task = Task::new(next_task_id(), action, bot, account.backend_family);
        task.runtime.nonce = Some(next_nonce());
        task.account_filter = filter;
        task
    }

    fn child_task(&self, parent: &Task, action: TaskAction, request: &ActionRequest) -> Task {
        let mut child = Task::new(next_task_id(), action, parent.bot_family, parent.backend_family);
        child.parent_id = Some(parent.id.clone());
        child.mode = parent.mode;
        child.prompt = parent.prompt.clone();
        child.prompt_en = parent.prompt_en.clone();
        child.instance_id = parent.instance_id.clone();
        child.account_filter = parent.account_filter.clone();
        child.runtime = TaskRuntime {
            nonce: Some(next_nonce()),
            message_id: parent.runtime.message_id.clone(),
            message_hash: parent.runtime.message_hash.clone(),
            flags: parent.runtime.flags,
            custom_id: Some(request.custom_id.clone()),
            chat_instance_id: request.chat_instance_id.clone(),
            // Keep the parent's upsample custom id for pan-modal rewrites.
            remix_u_custom_id: match parent.action {
                TaskAction::Upscale => parent.runtime.custom_id.clone(),
                _ => parent.runtime.remix_u_custom_id.clone(),
            },
            ..Default::default()
        };
        child
    }

    fn effective_bot(&self, requested: Option<BotFamily>) -> BotFamily {
        match requested.unwrap_or(BotFamily::Mj) {
            BotFamily::Niji if self.config.enable_convert_niji_to_mj => BotFamily::Mj,
            bot => bot,
        }
    }

    async fn scan_banned(&self, prompt: &str) -> Result<(), SubmitResult> {
        let sets = match self.cache.banned().await {
            Ok(sets) => sets,
            Err(e) => {
                tracing::warn!(error = %e, "Banned-word cache unavailable");
                return Ok(());
            }
        };
        match find_banned_word(prompt, &sets) {
            Some(word) => Err(SubmitResult::of(
                SubmitCode::BannedPrompt,
                format!("Banned prompt: {word}"),
            )
            .with_property("bannedWord", serde_json::json!(word))),
            None => Ok(()),
        }
    }

    /// Domain-scoped selection retries exactly once with the domain off.
    async fn select_with_domain_retry(
        &self,
        filter: &AccountFilter,
        mut requirements: SelectRequirements,
    ) -> Option<Arc<UpstreamInstance>> {
        let chosen = self.selector.choose(filter, &requirements).await;
        if chosen.is_some() || !requirements.is_domain {
            return chosen;
        }
        tracing::debug!("Domain-scoped selection empty; retrying without domain");
        requirements.is_domain = false;
        self.selector.choose(filter, &requirements).await
    }

    async fn owning_instance(&self, task: &Task) -> Option<Arc<UpstreamInstance>> {
        let channel_id = task.instance_id.as_deref()?;
        self.registry.by_channel(channel_id).await
    }

    /// Resolve caller image references to URLs usable in a prompt.
    async fn resolve_images(
        &self,
        instance: &Arc<UpstreamInstance>,
        account: &Account,
        images: &[String],
    ) -> Result<Vec<String>, CoreError> {
        use atelier_core::task::BackendFamily;

        let mut urls = Vec::with_capacity(images.len());
        for image in images {
            if upload::is_http_url(image) {
                let pass_through = match account.backend_family {
                    BackendFamily::Partner => self.config.enable_partner_prompt_link,
                    BackendFamily::Chat | BackendFamily::Official => {
                        !self.config.enable_save_user_upload_link
                    }
                };
                if pass_through {
                    urls.push(image.clone());
                } else {
                    let bytes = upload::fetch_bytes(&self.http, image)
                        .await
                        .map_err(CoreError::from)?;
                    urls.push(self.upload_and_post(instance, account, "png", bytes).await?);
                }
            } else {
                let name = self.upload_data_url_posted(instance, account, image).await?;
                urls.push(name);
            }
        }
        Ok(urls)
    }

    /// Decode and upload a data URL; resolves to the raw upload reference.
    async fn upload_data_url(
        &self,
        instance: &Arc<UpstreamInstance>,
        image: &str,
    ) -> Result<String, CoreError> {
        if !self.config.enable_user_upload_base64 {
            return Err(CoreError::Validation(
                "Base64 image upload is disabled".to_string(),
            ));
        }
        let data = upload::parse_data_url(image)
            .map_err(|e| CoreError::Validation(format!("Invalid image reference: {e}")))?;
        let filename = format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            upload::suffix_for_mime(&data.mime)
        );
        instance
            .sender()
            .upload(&filename, data.bytes)
            .await
            .map_err(CoreError::from)
    }

    /// Decode, upload and, when the backend answers with a bare upload
    /// reference, post the file so a message URL can go into the prompt.
    async fn upload_data_url_posted(
        &self,
        instance: &Arc<UpstreamInstance>,
        account: &Account,
        image: &str,
    ) -> Result<String, CoreError> {
        let reference = self.upload_data_url(instance, image).await?;
        if upload::is_http_url(&reference) {
            return Ok(reference);
        }
        instance
            .sender()
            .send_image(&reference, &account.channel_id)
            .await
            .map_err(CoreError::from)
    }

    /// Re-host a remote image: fetch the bytes, upload them.
    async fn rehost(
        &self,
        instance: &Arc<UpstreamInstance>,
        url: &str,
    ) -> Result<String, CoreError> {
        let bytes = upload::fetch_bytes(&self.http, url)
            .await
            .map_err(CoreError::from)?;
        let filename = format!("{}.png", uuid::Uuid::new_v4());
        instance
            .sender()
            .upload(&filename, bytes)
            .await
            .map_err(CoreError::from)
    }

    async fn upload_and_post(
        &self,
        instance: &Arc<UpstreamInstance>,
        account: &Account,
        suffix: &str,
        bytes: Vec<u8>,
    ) -> Result<String, CoreError> {
        let filename = format!("{}.{suffix}", uuid::Uuid::new_v4());
        let reference = instance
            .sender()
            .upload(&filename, bytes)
            .await
            .map_err(CoreError::from)?;
        if upload::is_http_url(&reference) {
            return Ok(reference);
        }
        instance
            .sender()
            .send_image(&reference, &account.channel_id)
            .await
            .map_err(CoreError::from)
    }

    /// Wait for the correlated /show reply; after [`SEED_SCAN_AFTER`] also
    /// scan the channel history once.
    async fn await_show_reply(
        &self,
        instance: &Arc<UpstreamInstance>,
        seed_task_id: &str,
        hash: &str,
        private_channel: &str,
    ) -> Option<String> {
        let deadline = Instant::now() + SEED_STEP_TIMEOUT;
        let scan_at = Instant::now() + SEED_SCAN_AFTER;
        let mut scanned = false;
        loop {
            if let Ok(Some(task)) = self.store.get(seed_task_id).await {
                if let Some(message_id) = task.runtime.seed_message_id {
                    return Some(message_id);
                }
                if task.is_terminal() {
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            if !scanned && Instant::now() >= scan_at {
                scanned = true;
                self.scan_for_show_reply(instance, seed_task_id, hash, private_channel)
                    .await;
            }
            tokio::time::sleep(SEED_POLL_INTERVAL).await;
        }
    }

    async fn scan_for_show_reply(
        &self,
        instance: &Arc<UpstreamInstance>,
        seed_task_id: &str,
        hash: &str,
        private_channel: &str,
    ) {
        let messages = match instance
            .sender()
            .seed_messages(private_channel, SEED_SCAN_LIMIT)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "Seed history scan failed");
                return;
            }
        };
        let hit = messages.iter().find(|m| {
            m.first_attachment_url()
                .and_then(content::parse_message_hash)
                .is_some_and(|h| h == hash)
        });
        let Some(message) = hit else { return };

        let guard = self
            .locks
            .acquire(&format!("task:{seed_task_id}"), TASK_LOCK_WAIT)
            .await;
        let Ok(_guard) = guard else { return };
        if let Ok(Some(mut task)) = self.store.get(seed_task_id).await {
            if task.runtime.seed_message_id.is_none() && !task.is_terminal() {
                task.runtime.seed_message_id = Some(message.id.clone());
                instance.bind_message_id(&message.id, seed_task_id).await;
                if let Err(e) = self.store.save(&task).await {
                    tracing::error!(task_id = %seed_task_id, error = %e, "Store write failed");
                }
            }
        }
    }

    async fn poll_task_field<F>(
        &self,
        task_id: &str,
        timeout: Duration,
        extract: F,
    ) -> Option<String>
    where
        F: Fn(&Task) -> Option<String>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(task)) = self.store.get(task_id).await {
                if let Some(value) = extract(&task) {
                    return Some(value);
                }
                if task.status == TaskStatus::Failure || task.status == TaskStatus::Cancel {
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(SEED_POLL_INTERVAL).await;
        }
    }

    async fn fail_seed_task(&self, task_id: &str, reason: &str) {
        let guard = self
            .locks
            .acquire(&format!("task:{task_id}"), TASK_LOCK_WAIT)
            .await;
        let Ok(_guard) = guard else { return };
        if let Ok(Some(mut task)) = self.store.get(task_id).await {
            if !task.is_terminal() && task.fail(Utc::now(), reason).is_ok() {
                if let Err(e) = self.store.save(&task).await {
                    tracing::error!(task_id = %task_id, error = %e, "Store write failed");
                }
                self.bus
                    .publish(TaskEvent::finished(task_id.to_string(), task.status));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Modal plan
// ---------------------------------------------------------------------------

/// Everything the queued two-phase producer needs.
struct ModalPlan {
    store: Arc<dyn TaskRepository>,
    sender: Arc<dyn CommandSender>,
    locks: Arc<LockRegistry>,
    task_id: TaskId,
    parsed: CustomId,
    custom_id_raw: String,
    parent_message_id: String,
    flags: i64,
    nonce: String,
    final_prompt: String,
    mask_base64: Option<String>,
    high_variability: bool,
}

/// Run the two-phase modal protocol.
///
/// Phase 1 clicks the stored component; the correlator then records the
/// opened window's ids on the task. Phase 2 submits inside the window with
/// the action-specific (possibly rewritten) custom id.
async fn run_modal_plan(plan: ModalPlan) -> Result<Message, CoreError> {
    let ack = plan
        .sender
        .action(
            &plan.parent_message_id,
            &plan.custom_id_raw,
            plan.flags,
            &plan.nonce,
        )
        .await
        .map_err(CoreError::from)?;
    if !ack.is_success() && !ack.is_delayed() {
        return Ok(ack);
    }

    let deadline = Instant::now() + MODAL_OPEN_TIMEOUT;
    let modal_message_id = loop {
        match plan.store.get(&plan.task_id).await {
            Ok(Some(task)) => {
                if let (Some(modal), Some(_interaction)) = (
                    task.runtime.remix_modal_message_id.clone(),
                    task.runtime.interaction_metadata_id.clone(),
                ) {
                    break modal;
                }
                if task.is_terminal() {
                    return Ok(Message::of(
                        SubmitCode::Failure.code(),
                        "Task finished before the window opened",
                    ));
                }
            }
            Ok(None) => {
                return Ok(Message::of(SubmitCode::NotFound.code(), "Task vanished"));
            }
            Err(e) => {
                tracing::error!(task_id = %plan.task_id, error = %e, "Store read failed");
            }
        }
        if Instant::now() >= deadline {
            return Ok(Message::of(SubmitCode::NotFound.code(), "timeout"));
        }
        tokio::time::sleep(MODAL_POLL_INTERVAL).await;
    };

    tokio::time::sleep(MODAL_SETTLE).await;

    // Work out the second-phase custom id, consulting the previously
    // recorded remix state for rerolls.
    let previous_remix = {
        match plan.store.get(&plan.task_id).await {
            Ok(Some(task)) => task.runtime.remix_custom_id.clone(),
            _ => None,
        }
    };
    let remix_u_custom_id = match plan.store.get(&plan.task_id).await {
        Ok(Some(task)) => task.runtime.remix_u_custom_id.clone(),
        _ => None,
    };

    let phase_two = match &plan.parsed {
        CustomId::Pan { .. } => rewrite_pan(&plan.parsed),
        CustomId::Variation { .. }
        | CustomId::LowVariation { .. }
        | CustomId::HighVariation { .. } => {
            rewrite_variation(&plan.parsed, plan.high_variability)
        }
        CustomId::Reroll { .. } => Some(rewrite_reroll(
            previous_remix.as_deref(),
            remix_u_custom_id.as_deref(),
            &plan.parent_message_id,
        )),
        CustomId::PicReader { .. } | CustomId::PromptAnalyzer { .. } => Some(
            CustomId::ImagineModal {
                message_id: modal_message_id.clone(),
            }
            .to_string(),
        ),
        _ => None,
    };
    let phase_two_id = phase_two.clone().unwrap_or_else(|| plan.custom_id_raw.clone());

    // Record the rewrite so a later reroll can chain off it.
    {
        let guard = plan
            .locks
            .acquire(&format!("task:{}", plan.task_id), TASK_LOCK_WAIT)
            .await;
        if let Ok(_guard) = guard {
            if let Ok(Some(mut task)) = plan.store.get(&plan.task_id).await {
                if !task.is_terminal() {
                    task.runtime.remix_custom_id = Some(phase_two_id.clone());
                    task.runtime.remix_modal = Some("true".to_string());
                    if let Err(e) = plan.store.save(&task).await {
                        tracing::error!(task_id = %plan.task_id, error = %e, "Store write failed");
                    }
                }
            }
        }
    }

    let ack = match &plan.parsed {
        CustomId::Inpaint { .. } => {
            plan.sender
                .inpaint(
                    &modal_message_id,
                    &phase_two_id,
                    &plan.final_prompt,
                    plan.mask_base64.as_deref().unwrap_or(""),
                )
                .await
        }
        _ => {
            plan.sender
                .modal(&modal_message_id, &phase_two_id, &plan.final_prompt, &plan.nonce)
                .await
        }
    };
    ack.map_err(CoreError::from)
}

// ---------------------------------------------------------------------------
// Custom-id rewriting
// ---------------------------------------------------------------------------

/// `MJ::JOB::pan_{dir}::{index}::{hash}::SOLO` -> `MJ::PanModal::{dir}::{hash}::{index}`
fn rewrite_pan(parsed: &CustomId) -> Option<String> {
    match parsed {
        CustomId::Pan {
            direction,
            index,
            hash,
        } => Some(
            CustomId::PanModal {
                direction: *direction,
                hash: hash.clone(),
                index: *index,
            }
            .to_string(),
        ),
        _ => None,
    }
}

/// Variation buttons become `MJ::RemixModal::{hash}::{index}::{0|1}`.
///
/// The suffix reflects the account's high-variability setting; explicit
/// low/high variation buttons override it.
fn rewrite_variation(parsed: &CustomId, high_variability: bool) -> Option<String> {
    let (hash, index, high) = match parsed {
        CustomId::Variation { index, hash } => (hash, *index, high_variability),
        CustomId::LowVariation { index, hash } => (hash, *index, false),
        CustomId::HighVariation { index, hash } => (hash, *index, true),
        _ => return None,
    };
    Some(
        CustomId::RemixModal {
            hash: hash.clone(),
            index,
            high_variability: high,
        }
        .to_string(),
    )
}

/// Reroll second-phase id: first time an imagine modal on the parent
/// message; afterwards the previously recorded remix id, except that a
/// previous pan modal is re-synthesized from the parent's upsample id.
fn rewrite_reroll(
    previous_remix: Option<&str>,
    remix_u_custom_id: Option<&str>,
    parent_message_id: &str,
) -> String {
    match previous_remix.and_then(CustomId::parse) {
        None => CustomId::ImagineModal {
            message_id: parent_message_id.to_string(),
        }
        .to_string(),
        Some(CustomId::PanModal { direction, .. }) => {
            match remix_u_custom_id.and_then(CustomId::parse) {
                Some(CustomId::Upsample { index, hash }) => CustomId::PanModal {
                    direction,
                    hash,
                    index,
                }
                .to_string(),
                _ => previous_remix.unwrap_or_default().to_string(),
            }
        }
        Some(_) => previous_remix.unwrap_or_default().to_string(),
    }
}

/// Verb used in the human-readable task description.
fn action_verb(action: TaskAction) -> &'static str {
    match action {
        TaskAction::Edit => "edit",
        TaskAction::Retexture => "retexture",
        _ => "action",
    }
}

/// Prepend resolved image URLs to a prompt, space-separated.
fn prefix_urls(urls: &[String], prompt: &str) -> String {
    if urls.is_empty() {
        prompt.to_string()
    } else {
        format!("{} {prompt}", urls.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
