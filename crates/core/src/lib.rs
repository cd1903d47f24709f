//! Pure domain logic for the atelier drawing-task orchestration core.
//!
//! This crate has **zero internal dependencies** so it can be used by the
//! store, gateway and engine crates alike. Everything here is synchronous
//! and side-effect free apart from the id/nonce counters in [`types`].

pub mod account;
pub mod banned;
pub mod custom_id;
pub mod domain;
pub mod error;
pub mod selection;
pub mod state_machine;
pub mod submit;
pub mod task;
pub mod types;

pub use error::CoreError;
pub use submit::{Message, SubmitCode, SubmitResult};
pub use task::{BackendFamily, BotFamily, SpeedMode, Task, TaskAction, TaskStatus};
