//! Banned-word scanning.
//!
//! The scan is a word-boundary match of every enabled banned keyword against
//! the ASCII-lowercased English prompt. On a hit the *caller's* spelling of
//! the word is returned so the error message can quote the prompt verbatim.

/// A keyword dictionary entry (domain or banned), as persisted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeywordSet {
    pub id: String,
    /// Unique, trimmed, lowercased keywords.
    pub keywords: Vec<String>,
    pub enabled: bool,
}

impl KeywordSet {
    pub fn new(id: impl Into<String>, keywords: impl IntoIterator<Item = String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();
        Self {
            id: id.into(),
            keywords,
            enabled: true,
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.keywords.iter().any(|k| k == word)
    }
}

/// Find the first banned keyword in `prompt`, honoring word boundaries.
///
/// Returns the offending substring exactly as it appears in the prompt
/// (original casing). ASCII lowercasing keeps byte offsets stable, so the
/// matched range can be sliced straight out of the input.
pub fn find_banned_word<'a>(prompt: &'a str, sets: &[KeywordSet]) -> Option<&'a str> {
    let lowered = prompt.to_ascii_lowercase();
    for set in sets.iter().filter(|s| s.enabled) {
        for keyword in &set.keywords {
            if keyword.is_empty() {
                continue;
            }
            for (start, matched) in lowered.match_indices(keyword.as_str()) {
                if is_word_boundary(&lowered, start, start + matched.len()) {
                    return Some(&prompt[start..start + matched.len()]);
                }
            }
        }
    }
    None
}

/// Both ends of `[start, end)` must sit on non-alphanumeric neighbours.
fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before_ok = start == 0
        || text[..start]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_alphanumeric());
    let after_ok = end == text.len()
        || text[end..].chars().next().is_some_and(|c| !c.is_alphanumeric());
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banned(words: &[&str]) -> Vec<KeywordSet> {
        vec![KeywordSet::new(
            "default",
            words.iter().map(|w| w.to_string()),
        )]
    }

    #[test]
    fn hit_preserves_original_casing() {
        let sets = banned(&["forbidden"]);
        let hit = find_banned_word("a Forbidden tower", &sets);
        assert_eq!(hit, Some("Forbidden"));
    }

    #[test]
    fn substring_inside_word_does_not_hit() {
        let sets = banned(&["ban"]);
        assert_eq!(find_banned_word("an urban scene", &sets), None);
        assert_eq!(find_banned_word("ban hammer", &sets), Some("ban"));
    }

    #[test]
    fn boundary_at_punctuation() {
        let sets = banned(&["blood"]);
        assert_eq!(find_banned_word("red,blood.everywhere", &sets), Some("blood"));
    }

    #[test]
    fn disabled_set_is_skipped() {
        let mut sets = banned(&["forbidden"]);
        sets[0].enabled = false;
        assert_eq!(find_banned_word("forbidden", &sets), None);
    }

    #[test]
    fn keywords_are_trimmed_and_deduped() {
        let set = KeywordSet::new("d", vec!["  Gore ".to_string(), "gore".to_string()]);
        assert_eq!(set.keywords, vec!["gore"]);
    }

    #[test]
    fn empty_prompt_no_hit() {
        let sets = banned(&["x"]);
        assert_eq!(find_banned_word("", &sets), None);
    }
}
