//! REST poll client for the partner/official backends.
//!
//! Those backends expose no event stream; the engine polls their task
//! endpoint and normalizes every payload into a [`PolledTaskUpdate`], which
//! the correlator consumes through the same update path as chat events.

use async_trait::async_trait;
use serde::Deserialize;

use atelier_core::task::Button;
use atelier_core::types::TaskId;

use crate::{GatewayError, GatewayResult};

/// Default per-request timeout for polls.
const POLL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Task status as reported by a polled backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolledStatus {
    Submitted,
    InProgress,
    Success,
    Failure,
}

/// Normalized polled payload.
#[derive(Debug, Clone)]
pub struct PolledTaskUpdate {
    /// Our task id, echoed back by the backend.
    pub task_id: TaskId,
    pub status: PolledStatus,
    pub progress: Option<String>,
    pub image_url: Option<String>,
    pub fail_reason: Option<String>,
    pub final_prompt: Option<String>,
    pub message_hash: Option<String>,
    pub buttons: Vec<Button>,
}

/// Poll seam; the engine holds one per partner/official instance.
#[async_trait]
pub trait UpstreamPoller: Send + Sync {
    /// Fetch the current state of the given task.
    async fn poll(&self, task_id: &str) -> GatewayResult<PolledTaskUpdate>;
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// Raw JSON shape of the partner task endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolledTaskPayload {
    id: String,
    status: PolledStatus,
    #[serde(default)]
    progress: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    fail_reason: Option<String>,
    #[serde(default)]
    prompt_en: Option<String>,
    #[serde(default)]
    message_hash: Option<String>,
    #[serde(default)]
    buttons: Vec<PolledButton>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolledButton {
    custom_id: String,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    label: String,
    #[serde(default = "default_style")]
    style: i32,
    #[serde(rename = "type", default = "default_component_type")]
    kind: i32,
}

fn default_style() -> i32 {
    2
}
fn default_component_type() -> i32 {
    2
}

impl From<PolledTaskPayload> for PolledTaskUpdate {
    fn from(payload: PolledTaskPayload) -> Self {
        Self {
            task_id: payload.id,
            status: payload.status,
            progress: payload.progress,
            image_url: payload.image_url,
            fail_reason: payload.fail_reason,
            final_prompt: payload.prompt_en,
            message_hash: payload.message_hash,
            buttons: payload
                .buttons
                .into_iter()
                .map(|b| Button {
                    custom_id: b.custom_id,
                    emoji: b.emoji,
                    label: b.label,
                    style: b.style,
                    r#type: b.kind,
                })
                .collect(),
        }
    }
}

/// Parse a raw poll response body.
pub fn parse_poll_payload(body: &str) -> GatewayResult<PolledTaskUpdate> {
    let payload: PolledTaskPayload = serde_json::from_str(body)
        .map_err(|e| GatewayError::Parse(format!("poll payload: {e}")))?;
    Ok(payload.into())
}

// ---------------------------------------------------------------------------
// REST implementation
// ---------------------------------------------------------------------------

/// `reqwest`-backed poller for partner/official task endpoints.
pub struct RestPoller {
    http: reqwest::Client,
    base_url: String,
    api_secret: Option<String>,
}

impl RestPoller {
    pub fn new(base_url: impl Into<String>, api_secret: Option<String>) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_secret,
        })
    }
}

#[async_trait]
impl UpstreamPoller for RestPoller {
    async fn poll(&self, task_id: &str) -> GatewayResult<PolledTaskUpdate> {
        let url = format!("{}/task/{task_id}/fetch", self.base_url);
        let mut request = self.http.get(&url);
        if let Some(secret) = &self.api_secret {
            request = request.header("x-api-secret", secret);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream {
                code: status.as_u16() as i32,
                message: format!("poll of {url} answered {status}"),
            });
        }
        let body = response.text().await?;
        parse_poll_payload(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_payload() {
        let body = r#"{
            "id": "17000000000000001",
            "status": "SUCCESS",
            "progress": "100%",
            "imageUrl": "https://cdn.example.com/a_b_hash1.png",
            "promptEn": "a red cube",
            "messageHash": "hash1",
            "buttons": [
                {"customId": "MJ::JOB::upsample::1::hash1", "label": "U1"}
            ]
        }"#;
        let update = parse_poll_payload(body).unwrap();
        assert_eq!(update.task_id, "17000000000000001");
        assert_eq!(update.status, PolledStatus::Success);
        assert_eq!(update.progress.as_deref(), Some("100%"));
        assert_eq!(update.message_hash.as_deref(), Some("hash1"));
        assert_eq!(update.buttons.len(), 1);
        assert_eq!(update.buttons[0].custom_id, "MJ::JOB::upsample::1::hash1");
    }

    #[test]
    fn parses_failure_payload() {
        let body = r#"{"id": "1", "status": "FAILURE", "failReason": "moderated"}"#;
        let update = parse_poll_payload(body).unwrap();
        assert_eq!(update.status, PolledStatus::Failure);
        assert_eq!(update.fail_reason.as_deref(), Some("moderated"));
        assert!(update.buttons.is_empty());
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_poll_payload("{\"status\": \"NOPE\"}").is_err());
        assert!(parse_poll_payload("not json").is_err());
    }
}
