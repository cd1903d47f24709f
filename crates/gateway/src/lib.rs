//! Upstream-facing surface of the orchestration core.
//!
//! The chat-platform transport (WebSocket framing, heartbeats, reconnect)
//! lives outside this workspace; it delivers already-framed [`EventData`]
//! records. This crate owns everything about their *content*: the typed
//! event model, the content parsers the correlator relies on, the
//! [`CommandSender`] seam implemented per backend family, upload helpers,
//! and the REST poll client for the partner/official backends.

pub mod command;
pub mod content;
pub mod event_data;
pub mod poller;
pub mod upload;

mod error;

pub use command::{BlendDimensions, CommandSender};
pub use error::GatewayError;
pub use event_data::{Attachment, EventData, InteractionMetadata, MessageKind};
pub use poller::{PolledStatus, PolledTaskUpdate, RestPoller, UpstreamPoller};

/// Convenience alias used across the crate.
pub type GatewayResult<T> = Result<T, GatewayError>;
