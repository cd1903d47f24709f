//! Gateway error type.

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The HTTP/transport call itself failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-success status.
    #[error("Upstream rejected ({code}): {message}")]
    Upstream { code: i32, message: String },

    /// A payload could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An image upload failed.
    #[error("Upload failed: {0}")]
    Upload(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

impl From<GatewayError> for atelier_core::CoreError {
    fn from(err: GatewayError) -> Self {
        use atelier_core::CoreError;
        match err {
            GatewayError::Upload(msg) => CoreError::UploadFailed(msg),
            GatewayError::Upstream { code, message } => {
                CoreError::UpstreamRejected(format!("{message} (code {code})"))
            }
            GatewayError::Transport(msg) | GatewayError::Parse(msg) => CoreError::Internal(msg),
        }
    }
}
