//! Stable error kinds shared by every layer of the orchestration core.
//!
//! The variants are deliberately coarse: they are the error *kinds* that
//! survive across backend families, not per-call diagnostics. Pre-dispatch
//! failures (validation, queue-full) are returned to the caller; post-dispatch
//! failures are recorded on the task instead of being thrown.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The prompt contains a banned keyword. Carries the offending substring
    /// exactly as it appears in the caller's prompt.
    #[error("Banned prompt: {0}")]
    BannedPrompt(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The per-mode queue on the selected instance is at capacity.
    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The upstream acknowledged the command with a non-success code.
    #[error("Upstream rejected: {0}")]
    UpstreamRejected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The submit-result code this error maps to when surfaced to a caller.
    pub fn submit_code(&self) -> crate::submit::SubmitCode {
        use crate::submit::SubmitCode;
        match self {
            CoreError::BannedPrompt(_) => SubmitCode::BannedPrompt,
            CoreError::Validation(_) => SubmitCode::ValidationError,
            CoreError::NotFound(_) => SubmitCode::NotFound,
            CoreError::QueueFull(_)
            | CoreError::UploadFailed(_)
            | CoreError::UpstreamRejected(_)
            | CoreError::Timeout(_)
            | CoreError::Storage(_)
            | CoreError::Internal(_) => SubmitCode::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::SubmitCode;

    #[test]
    fn banned_prompt_keeps_offending_substring() {
        let err = CoreError::BannedPrompt("Forbidden".to_string());
        assert_eq!(err.to_string(), "Banned prompt: Forbidden");
    }

    #[test]
    fn submit_code_mapping() {
        assert_eq!(
            CoreError::BannedPrompt("x".into()).submit_code(),
            SubmitCode::BannedPrompt
        );
        assert_eq!(
            CoreError::Validation("x".into()).submit_code(),
            SubmitCode::ValidationError
        );
        assert_eq!(
            CoreError::NotFound("x".into()).submit_code(),
            SubmitCode::NotFound
        );
        assert_eq!(
            CoreError::QueueFull("x".into()).submit_code(),
            SubmitCode::Failure
        );
        assert_eq!(
            CoreError::Timeout("x".into()).submit_code(),
            SubmitCode::Failure
        );
    }
}
