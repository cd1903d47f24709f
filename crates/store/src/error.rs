//! Store error type.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing adapter failed (I/O, serialization, connection).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for atelier_core::CoreError {
    fn from(err: StoreError) -> Self {
        atelier_core::CoreError::Storage(err.to_string())
    }
}
