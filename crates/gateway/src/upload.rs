//! Upload helpers shared by every backend family.
//!
//! Submissions reference images either as `http(s)` URLs or as base64 data
//! URLs. Data URLs are decoded here; re-hosting (fetch the bytes of a remote
//! URL so they can be re-uploaded) uses a plain `reqwest` GET.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::{GatewayError, GatewayResult};

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Whether the reference is a plain `http(s)` URL.
pub fn is_http_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Decode a `data:<mime>;base64,<body>` URL.
pub fn parse_data_url(reference: &str) -> GatewayResult<DataUrl> {
    let body = reference
        .strip_prefix("data:")
        .ok_or_else(|| GatewayError::Parse("not a data URL".to_string()))?;
    let (header, payload) = body
        .split_once(',')
        .ok_or_else(|| GatewayError::Parse("data URL without payload".to_string()))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| GatewayError::Parse("data URL is not base64-encoded".to_string()))?;
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| GatewayError::Parse(format!("invalid base64 payload: {e}")))?;
    Ok(DataUrl {
        mime: mime.to_string(),
        bytes,
    })
}

/// File suffix guessed from a MIME type; defaults to `png`.
pub fn suffix_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/png" => "png",
        _ => "png",
    }
}

/// Fetch the raw bytes behind a URL (for re-hosting user links).
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> GatewayResult<Vec<u8>> {
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(GatewayError::Upload(format!(
            "fetch of {url} answered {}",
            response.status()
        )));
    }
    Ok(response.bytes().await?.to_vec())
}
