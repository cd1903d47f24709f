//! Backend command primitives.
//!
//! One method per supported upstream command. Each backend family (chat,
//! partner, official) ships its own implementation outside this workspace;
//! the engine only holds an `Arc<dyn CommandSender>` per instance. Methods
//! resolve to the upstream acknowledgement [`Message`] — correlation of the
//! eventual result happens separately through the event stream.

use async_trait::async_trait;

use atelier_core::submit::Message;

use crate::event_data::EventData;
use crate::GatewayResult;

/// Aspect ratio choices for a blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlendDimensions {
    Portrait,
    Square,
    Landscape,
}

/// The per-backend command surface.
///
/// All ids are upstream ids (message ids, custom ids); `nonce` is the
/// caller-generated correlation key echoed on the acknowledging event.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn imagine(&self, prompt: &str, nonce: &str) -> GatewayResult<Message>;

    async fn upscale(
        &self,
        message_id: &str,
        index: u8,
        hash: &str,
        flags: i64,
        nonce: &str,
    ) -> GatewayResult<Message>;

    async fn variation(
        &self,
        message_id: &str,
        index: u8,
        hash: &str,
        flags: i64,
        nonce: &str,
    ) -> GatewayResult<Message>;

    async fn reroll(
        &self,
        message_id: &str,
        hash: &str,
        flags: i64,
        nonce: &str,
    ) -> GatewayResult<Message>;

    /// Click an arbitrary component.
    async fn action(
        &self,
        message_id: &str,
        custom_id: &str,
        flags: i64,
        nonce: &str,
    ) -> GatewayResult<Message>;

    /// Submit inside an opened modal window (zoom, pan, remix, pic-reader).
    async fn modal(
        &self,
        modal_message_id: &str,
        modal_custom_id: &str,
        prompt: &str,
        nonce: &str,
    ) -> GatewayResult<Message>;

    /// Region repaint: modal submit carrying the mask.
    async fn inpaint(
        &self,
        modal_message_id: &str,
        modal_custom_id: &str,
        prompt: &str,
        mask_base64: &str,
    ) -> GatewayResult<Message>;

    /// Describe a previously uploaded image.
    async fn describe(&self, upload_name: &str, nonce: &str) -> GatewayResult<Message>;

    /// Describe an image by link.
    async fn describe_link(&self, link: &str, nonce: &str) -> GatewayResult<Message>;

    async fn blend(
        &self,
        upload_names: &[String],
        dimensions: BlendDimensions,
        nonce: &str,
    ) -> GatewayResult<Message>;

    async fn shorten(&self, prompt: &str, nonce: &str) -> GatewayResult<Message>;

    /// Edit an existing image with a prompt (partner/official backends).
    /// Image URLs arrive prepended to `prompt`.
    async fn edit(&self, prompt: &str, nonce: &str) -> GatewayResult<Message>;

    /// Re-texture an existing image (partner/official backends).
    async fn retexture(&self, prompt: &str, nonce: &str) -> GatewayResult<Message>;

    /// Animate an image into a short clip with `"high"`/`"low"` motion.
    async fn video(&self, prompt: &str, motion: &str, nonce: &str) -> GatewayResult<Message>;

    /// Resurrect a job by id into `channel_id`.
    async fn show(&self, job_id: &str, nonce: &str, channel_id: &str) -> GatewayResult<Message>;

    async fn info(&self, nonce: &str, channel_id: &str) -> GatewayResult<Message>;

    async fn setting(&self, nonce: &str, channel_id: &str) -> GatewayResult<Message>;

    async fn setting_select(&self, message_id: &str, value: &str) -> GatewayResult<Message>;

    async fn setting_button(
        &self,
        message_id: &str,
        custom_id: &str,
        nonce: &str,
    ) -> GatewayResult<Message>;

    /// Post the seed-fetch command for `hash` into a private channel.
    async fn seed(&self, hash: &str, nonce: &str, channel_id: &str) -> GatewayResult<Message>;

    /// Recent messages of a private channel, newest first. Used by the
    /// seed flow to locate the seed-carrying reply.
    async fn seed_messages(&self, channel_id: &str, limit: usize)
        -> GatewayResult<Vec<EventData>>;

    /// Add a reaction (the seed envelope) to a message.
    async fn seed_react(
        &self,
        message_id: &str,
        channel_id: &str,
        emoji: &str,
    ) -> GatewayResult<Message>;

    /// Upload bytes to the backend; resolves to an upload reference, or a
    /// ready-to-use `http(s)` URL on backends that host directly.
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> GatewayResult<String>;

    /// Post an uploaded file into a channel; resolves to the message URL.
    async fn send_image(&self, upload_ref: &str, channel_id: &str) -> GatewayResult<String>;
}
