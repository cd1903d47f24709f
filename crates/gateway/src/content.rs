//! Content parsers for upstream messages.
//!
//! Upstream messages carry their semantics in the text: the `**prompt**`
//! header, the `(NN%)` progress marker, lifecycle markers like
//! `(Waiting to start)`, and numbered prompt lines in describe/shorten
//! replies. The grid hash rides in the attachment URL filename.

use std::sync::LazyLock;

use regex::Regex;

/// The four accepted `**prompt** - …` header shapes, tried in order.
/// The first match wins; the order must not be changed.
static HEADER_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"\*\*(.*)\*\* - (.*?)<@\d+> \((.*?)\)").expect("valid regex"),
        Regex::new(r"\*\*(.*)\*\* - <@\d+> \((.*?)\)").expect("valid regex"),
        Regex::new(r"\*\*(.*)\*\* - Variations by <@\d+> \((.*?)\)").expect("valid regex"),
        Regex::new(r"\*\*(.*)\*\* - Variations \(.*?\) by <@\d+> \((.*?)\)").expect("valid regex"),
    ]
});

/// `(NN%)` progress marker.
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{1,3}%)\)").expect("valid regex"));

/// Seed value in a seed-reply direct message.
static SEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)seed[:\s*]+(\d+)").expect("valid regex"));

/// Marker on the placeholder message posted before rendering starts.
pub const WAITING_TO_START: &str = "(Waiting to start)";

/// Marker on a message for a job that was stopped upstream.
pub const STOPPED: &str = "(Stopped)";

/// Anchor line required in shorten replies before prompt lines count.
pub const SHORTENED_PROMPTS_ANCHOR: &str = "Shortened prompts";

/// Content markers that mean the job failed upstream.
const ERROR_MARKERS: &[&str] = &[
    "Action needed to continue",
    "Pending mod message",
    "Blocked",
    "Banned prompt",
    "Invalid prompt",
    "Invalid parameter",
    "Invalid link",
    "Sorry! Could not complete the job",
    "Queue full",
];

/// Prompt and trailing status extracted from a message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHeader {
    /// Text between the `**` markers — the upstream's final prompt.
    pub prompt: String,
    /// Text of the trailing parenthesis (`fast`, `relaxed`, `Stopped`…).
    pub status: String,
}

/// Try the four header shapes in order and return the first match.
pub fn parse_content_header(content: &str) -> Option<ContentHeader> {
    for pattern in HEADER_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(content) {
            let prompt = captures.get(1)?.as_str().to_string();
            // The status is always the last capture group of the shape.
            let status = captures
                .get(captures.len() - 1)?
                .as_str()
                .to_string();
            return Some(ContentHeader { prompt, status });
        }
    }
    None
}

/// Grid image hash: the attachment URL filename segment after the last `_`
/// and before the last `.`.
pub fn parse_message_hash(url: &str) -> Option<String> {
    let tail = url.rsplit('_').next()?;
    if tail.len() == url.len() {
        // No underscore in the URL at all.
        return None;
    }
    let hash = tail.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(tail);
    (!hash.is_empty()).then(|| hash.to_string())
}

/// Extract the `(NN%)` progress marker, if present.
pub fn parse_progress(content: &str) -> Option<String> {
    PROGRESS_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the seed value from a seed-reply message.
pub fn parse_seed(content: &str) -> Option<String> {
    SEED_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether the content carries one of the known failure markers; returns
/// the matched marker as the failure reason.
pub fn error_reason(content: &str) -> Option<String> {
    if content.contains(STOPPED) {
        return Some("Stopped".to_string());
    }
    ERROR_MARKERS
        .iter()
        .find(|marker| content.contains(**marker))
        .map(|marker| (*marker).to_string())
}

/// Strip the leading emoji/number token (`1️⃣`, `2.`, …) from a prompt line.
fn strip_leading_token(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((token, rest)) if token.starts_with(|c: char| c.is_ascii_digit()) => rest.trim(),
        _ => trimmed,
    }
}

/// N-th (1-based) numbered prompt line of a describe reply.
pub fn extract_numbered_line(content: &str, n: u8) -> Option<String> {
    numbered_lines(content)
        .nth(usize::from(n).checked_sub(1)?)
        .map(str::to_string)
}

/// N-th (1-based) prompt line of a shorten reply.
///
/// The reply must carry the "Shortened prompts" anchor; without it the
/// extraction reports nothing rather than falling through to raw content.
pub fn extract_shortened_prompt(content: &str, n: u8) -> Option<String> {
    let (_, after_anchor) = content.split_once(SHORTENED_PROMPTS_ANCHOR)?;
    extract_numbered_line(after_anchor, n)
}

/// Lines that begin with a number token, with the token stripped.
fn numbered_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()))
        .map(strip_leading_token)
        .filter(|line| !line.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
