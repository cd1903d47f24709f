//! Repository interfaces for the orchestration core, plus the in-memory
//! reference implementation.
//!
//! The core persists three families of entities: tasks, accounts and keyword
//! dictionaries. Adapters for embedded/document databases implement the
//! traits in this crate; the engine only ever sees `Arc<dyn …>`.

mod error;
mod memory;
mod repos;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use repos::{AccountRepository, DictionaryRepository, TaskQuery, TaskRepository};

/// Convenience alias used by repository methods.
pub type StoreResult<T> = Result<T, StoreError>;
