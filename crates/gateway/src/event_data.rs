//! Normalized chat-platform event model.
//!
//! One [`EventData`] per chat message (or interaction callback). The
//! transport adapter deserializes raw gateway frames into this shape; the
//! correlator consumes it without knowing anything about the wire.

use serde::{Deserialize, Serialize};

use atelier_core::task::Button;

/// Kind of chat event, normalized across gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Create,
    Update,
    Delete,
    /// A modal confirm window opened in response to an interaction.
    ModalCreate,
}

/// An image (or file) attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// A row of actionable components on a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentRow {
    #[serde(default)]
    pub components: Vec<MessageComponent>,
}

/// One actionable component (button / select) on a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageComponent {
    #[serde(default)]
    pub custom_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub emoji: Option<ComponentEmoji>,
    #[serde(default = "default_style")]
    pub style: i32,
    #[serde(rename = "type", default = "default_component_type")]
    pub kind: i32,
}

fn default_style() -> i32 {
    2
}
fn default_component_type() -> i32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentEmoji {
    #[serde(default)]
    pub name: String,
}

/// Metadata describing the interaction a message replies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// One normalized chat-platform event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// Gateway event id — the replay-dedup key.
    pub id: String,
    pub author_id: String,
    pub kind: MessageKind,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub components: Vec<ComponentRow>,
    #[serde(default)]
    pub interaction_metadata: Option<InteractionMetadata>,
    #[serde(default)]
    pub flags: Option<i64>,
    #[serde(default)]
    pub referenced_message_id: Option<String>,
    /// Echo of the caller-generated nonce, present on acknowledgements.
    #[serde(default)]
    pub nonce: Option<String>,
}

impl EventData {
    /// First attachment URL, if any.
    pub fn first_attachment_url(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.url.as_str())
    }

    /// Flatten the component grid into task [`Button`]s, skipping
    /// components without a custom id (link buttons, selects).
    pub fn buttons(&self) -> Vec<Button> {
        self.components
            .iter()
            .flat_map(|row| row.components.iter())
            .filter(|c| !c.custom_id.is_empty())
            .map(|c| Button {
                custom_id: c.custom_id.clone(),
                emoji: c.emoji.as_ref().map(|e| e.name.clone()).unwrap_or_default(),
                label: c.label.clone(),
                style: c.style,
                r#type: c.kind,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_event() {
        let json = r#"{
            "id": "111",
            "author_id": "bot-1",
            "kind": "CREATE",
            "channel_id": "chan-1"
        }"#;
        let event: EventData = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, MessageKind::Create);
        assert!(event.content.is_empty());
        assert!(event.attachments.is_empty());
        assert!(event.nonce.is_none());
    }

    #[test]
    fn buttons_flatten_rows_and_skip_linkish_components() {
        let json = r#"{
            "id": "111",
            "author_id": "bot-1",
            "kind": "CREATE",
            "channel_id": "chan-1",
            "components": [
                {"components": [
                    {"custom_id": "MJ::JOB::upsample::1::h", "label": "U1", "style": 2, "type": 2},
                    {"custom_id": "", "label": "Open website", "style": 5, "type": 2}
                ]},
                {"components": [
                    {"custom_id": "MJ::JOB::reroll::0::h::SOLO", "emoji": {"name": "🔄"}, "style": 2, "type": 2}
                ]}
            ]
        }"#;
        let event: EventData = serde_json::from_str(json).unwrap();
        let buttons = event.buttons();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].custom_id, "MJ::JOB::upsample::1::h");
        assert_eq!(buttons[0].label, "U1");
        assert_eq!(buttons[1].emoji, "🔄");
    }
}
