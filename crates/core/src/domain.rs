//! Vertical-domain keyword matching.
//!
//! A domain is a curated keyword set that steers account selection toward
//! accounts specialised in that subject. A prompt matches a domain when any
//! prompt token — or its naive `+s` plural — appears in an enabled set.

use crate::banned::KeywordSet;

/// Characters (besides whitespace) that separate prompt tokens.
const TOKEN_SEPARATORS: [char; 3] = [',', '.', '-'];

/// Split a prompt into lowercase tokens on `, . -` and whitespace.
pub fn tokenize(prompt: &str) -> Vec<String> {
    prompt
        .split(|c: char| c.is_whitespace() || TOKEN_SEPARATORS.contains(&c))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Ids of every enabled domain set the prompt matches.
pub fn matching_domain_ids(prompt: &str, sets: &[KeywordSet]) -> Vec<String> {
    let tokens = tokenize(prompt);
    sets.iter()
        .filter(|set| set.enabled)
        .filter(|set| {
            tokens
                .iter()
                .any(|t| set.contains(t) || set.contains(&format!("{t}s")))
        })
        .map(|set| set.id.clone())
        .collect()
}
