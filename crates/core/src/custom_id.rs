//! Button custom-id grammar.
//!
//! Upstream buttons carry `::`-separated custom ids. The grammar is parsed
//! bit-exactly — including the casing quirks (`JOB` for drawing jobs but
//! `Job` for the prompt analyzer) — and rendered back verbatim by the
//! `Display` implementations, which is how follow-up custom ids are rewritten
//! for the modal second phase.

use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Pan direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanDirection {
    Left,
    Right,
    Up,
    Down,
}

impl fmt::Display for PanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PanDirection::Left => "left",
            PanDirection::Right => "right",
            PanDirection::Up => "up",
            PanDirection::Down => "down",
        };
        f.write_str(s)
    }
}

impl FromStr for PanDirection {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(PanDirection::Left),
            "right" => Ok(PanDirection::Right),
            "up" => Ok(PanDirection::Up),
            "down" => Ok(PanDirection::Down),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// PicReader target
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicReaderTarget {
    /// One of the four described prompts (1-based).
    Line(u8),
    /// Fan out all four prompts.
    All,
}

impl fmt::Display for PicReaderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PicReaderTarget::Line(n) => write!(f, "{n}"),
            PicReaderTarget::All => f.write_str("all"),
        }
    }
}

// ---------------------------------------------------------------------------
// CustomId
// ---------------------------------------------------------------------------

/// A parsed button custom id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomId {
    /// `MJ::JOB::upsample::{index}::{hash}`
    Upsample { index: u8, hash: String },
    /// `MJ::JOB::variation::{index}::{hash}`
    Variation { index: u8, hash: String },
    /// `MJ::JOB::low_variation::{index}::{hash}::SOLO`
    LowVariation { index: u8, hash: String },
    /// `MJ::JOB::high_variation::{index}::{hash}::SOLO`
    HighVariation { index: u8, hash: String },
    /// `MJ::JOB::reroll::0::{hash}::SOLO`
    Reroll { hash: String },
    /// `MJ::JOB::pan_{dir}::{index}::{hash}::SOLO`
    Pan {
        direction: PanDirection,
        index: u8,
        hash: String,
    },
    /// `MJ::JOB::PicReader::{1..4|all}`
    PicReader { target: PicReaderTarget },
    /// `MJ::Job::PromptAnalyzer::{N}` — note the `Job` casing.
    PromptAnalyzer { index: u8 },
    /// `MJ::CustomZoom::{hash}`
    CustomZoom { hash: String },
    /// `MJ::Inpaint::{...}` — opaque tail carried through verbatim.
    Inpaint { rest: String },
    /// `MJ::BOOKMARK::{...}` — opaque tail, fire-and-forget.
    Bookmark { rest: String },
    /// `MJ::RemixModal::{hash}::{index}::{0|1}`
    RemixModal {
        hash: String,
        index: u8,
        high_variability: bool,
    },
    /// `MJ::PanModal::{dir}::{hash}::{index}`
    PanModal {
        direction: PanDirection,
        hash: String,
        index: u8,
    },
    /// `MJ::ImagineModal::{messageId}`
    ImagineModal { message_id: String },
    /// `MJ::Settings::HighVariabilityMode::{0|1}`
    HighVariabilityMode { enabled: bool },
    /// Any other `MJ::JOB::{kind}::{...}` shape (e.g. animate buttons).
    Job { kind: String, rest: String },
}

impl CustomId {
    /// Parse a custom id. Returns `None` for anything outside the grammar.
    pub fn parse(raw: &str) -> Option<CustomId> {
        let body = raw.strip_prefix("MJ::")?;
        let segments: Vec<&str> = body.split("::").collect();
        match segments.as_slice() {
            ["JOB", rest @ ..] => Self::parse_job(rest),
            ["Job", "PromptAnalyzer", n] => Some(CustomId::PromptAnalyzer {
                index: n.parse().ok()?,
            }),
            ["CustomZoom", hash] => Some(CustomId::CustomZoom {
                hash: (*hash).to_string(),
            }),
            ["Inpaint", rest @ ..] if !rest.is_empty() => Some(CustomId::Inpaint {
                rest: rest.join("::"),
            }),
            ["BOOKMARK", rest @ ..] if !rest.is_empty() => Some(CustomId::Bookmark {
                rest: rest.join("::"),
            }),
            ["RemixModal", hash, index, flag] => Some(CustomId::RemixModal {
                hash: (*hash).to_string(),
                index: index.parse().ok()?,
                high_variability: Self::parse_bit(flag)?,
            }),
            ["PanModal", dir, hash, index] => Some(CustomId::PanModal {
                direction: dir.parse().ok()?,
                hash: (*hash).to_string(),
                index: index.parse().ok()?,
            }),
            ["ImagineModal", message_id] => Some(CustomId::ImagineModal {
                message_id: (*message_id).to_string(),
            }),
            ["Settings", "HighVariabilityMode", flag] => Some(CustomId::HighVariabilityMode {
                enabled: Self::parse_bit(flag)?,
            }),
            _ => None,
        }
    }

    fn parse_job(segments: &[&str]) -> Option<CustomId> {
        match segments {
            ["upsample", index, hash] => Some(CustomId::Upsample {
                index: index.parse().ok()?,
                hash: (*hash).to_string(),
            }),
            ["variation", index, hash] => Some(CustomId::Variation {
                index: index.parse().ok()?,
                hash: (*hash).to_string(),
            }),
            ["low_variation", index, hash, "SOLO"] => Some(CustomId::LowVariation {
                index: index.parse().ok()?,
                hash: (*hash).to_string(),
            }),
            ["high_variation", index, hash, "SOLO"] => Some(CustomId::HighVariation {
                index: index.parse().ok()?,
                hash: (*hash).to_string(),
            }),
            ["reroll", "0", hash, "SOLO"] => Some(CustomId::Reroll {
                hash: (*hash).to_string(),
            }),
            // Reroll is pinned to index 0; anything else is outside the grammar.
            ["reroll", ..] => None,
            ["PicReader", "all"] => Some(CustomId::PicReader {
                target: PicReaderTarget::All,
            }),
            ["PicReader", n] => {
                let n: u8 = n.parse().ok()?;
                (1..=4).contains(&n).then_some(CustomId::PicReader {
                    target: PicReaderTarget::Line(n),
                })
            }
            [kind, rest @ ..] => {
                if let Some(dir) = kind.strip_prefix("pan_") {
                    if let ["SOLO"] = rest.get(2..)? {
                        return Some(CustomId::Pan {
                            direction: dir.parse().ok()?,
                            index: rest[0].parse().ok()?,
                            hash: rest[1].to_string(),
                        });
                    }
                }
                (!rest.is_empty()).then(|| CustomId::Job {
                    kind: (*kind).to_string(),
                    rest: rest.join("::"),
                })
            }
            _ => None,
        }
    }

    fn parse_bit(s: &str) -> Option<bool> {
        match s {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        }
    }

    /// The grid hash embedded in this custom id, when it has one.
    pub fn hash(&self) -> Option<&str> {
        match self {
            CustomId::Upsample { hash, .. }
            | CustomId::Variation { hash, .. }
            | CustomId::LowVariation { hash, .. }
            | CustomId::HighVariation { hash, .. }
            | CustomId::Reroll { hash }
            | CustomId::Pan { hash, .. }
            | CustomId::CustomZoom { hash }
            | CustomId::RemixModal { hash, .. }
            | CustomId::PanModal { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomId::Upsample { index, hash } => {
                write!(f, "MJ::JOB::upsample::{index}::{hash}")
            }
            CustomId::Variation { index, hash } => {
                write!(f, "MJ::JOB::variation::{index}::{hash}")
            }
            CustomId::LowVariation { index, hash } => {
                write!(f, "MJ::JOB::low_variation::{index}::{hash}::SOLO")
            }
            CustomId::HighVariation { index, hash } => {
                write!(f, "MJ::JOB::high_variation::{index}::{hash}::SOLO")
            }
            CustomId::Reroll { hash } => write!(f, "MJ::JOB::reroll::0::{hash}::SOLO"),
            CustomId::Pan {
                direction,
                index,
                hash,
            } => write!(f, "MJ::JOB::pan_{direction}::{index}::{hash}::SOLO"),
            CustomId::PicReader { target } => write!(f, "MJ::JOB::PicReader::{target}"),
            CustomId::PromptAnalyzer { index } => {
                write!(f, "MJ::Job::PromptAnalyzer::{index}")
            }
            CustomId::CustomZoom { hash } => write!(f, "MJ::CustomZoom::{hash}"),
            CustomId::Inpaint { rest } => write!(f, "MJ::Inpaint::{rest}"),
            CustomId::Bookmark { rest } => write!(f, "MJ::BOOKMARK::{rest}"),
            CustomId::RemixModal {
                hash,
                index,
                high_variability,
            } => write!(
                f,
                "MJ::RemixModal::{hash}::{index}::{}",
                u8::from(*high_variability)
            ),
            CustomId::PanModal {
                direction,
                hash,
                index,
            } => write!(f, "MJ::PanModal::{direction}::{hash}::{index}"),
            CustomId::ImagineModal { message_id } => {
                write!(f, "MJ::ImagineModal::{message_id}")
            }
            CustomId::HighVariabilityMode { enabled } => write!(
                f,
                "MJ::Settings::HighVariabilityMode::{}",
                u8::from(*enabled)
            ),
            CustomId::Job { kind, rest } => write!(f, "MJ::JOB::{kind}::{rest}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(raw: &str) -> CustomId {
        let parsed = CustomId::parse(raw).unwrap_or_else(|| panic!("failed to parse {raw}"));
        assert_eq!(parsed.to_string(), raw, "display must render verbatim");
        parsed
    }

    #[test]
    fn upsample() {
        let id = round_trip("MJ::JOB::upsample::3::a1b2c3d4");
        assert_eq!(
            id,
            CustomId::Upsample {
                index: 3,
                hash: "a1b2c3d4".to_string()
            }
        );
        assert_eq!(id.hash(), Some("a1b2c3d4"));
    }

    #[test]
    fn variation() {
        round_trip("MJ::JOB::variation::1::deadbeef");
    }

    #[test]
    fn low_and_high_variation() {
        round_trip("MJ::JOB::low_variation::1::deadbeef::SOLO");
        round_trip("MJ::JOB::high_variation::2::deadbeef::SOLO");
    }

    #[test]
    fn reroll() {
        let id = round_trip("MJ::JOB::reroll::0::cafe01::SOLO");
        assert_eq!(
            id,
            CustomId::Reroll {
                hash: "cafe01".to_string()
            }
        );
    }

    #[test]
    fn reroll_requires_zero_index() {
        assert!(CustomId::parse("MJ::JOB::reroll::1::cafe01::SOLO").is_none());
    }

    #[test]
    fn pan_directions() {
        for dir in ["left", "right", "up", "down"] {
            let raw = format!("MJ::JOB::pan_{dir}::2::hash42::SOLO");
            round_trip(&raw);
        }
    }

    #[test]
    fn pic_reader_lines_and_all() {
        for n in 1..=4u8 {
            let raw = format!("MJ::JOB::PicReader::{n}");
            assert_eq!(
                round_trip(&raw),
                CustomId::PicReader {
                    target: PicReaderTarget::Line(n)
                }
            );
        }
        assert_eq!(
            round_trip("MJ::JOB::PicReader::all"),
            CustomId::PicReader {
                target: PicReaderTarget::All
            }
        );
    }

    #[test]
    fn pic_reader_out_of_range_rejected() {
        assert!(CustomId::parse("MJ::JOB::PicReader::5").is_none());
        assert!(CustomId::parse("MJ::JOB::PicReader::0").is_none());
    }

    #[test]
    fn prompt_analyzer_uses_job_casing() {
        let id = round_trip("MJ::Job::PromptAnalyzer::2");
        assert_eq!(id, CustomId::PromptAnalyzer { index: 2 });
        // The drawing-job casing does not parse as an analyzer.
        assert!(matches!(
            CustomId::parse("MJ::JOB::PromptAnalyzer::2"),
            Some(CustomId::Job { .. })
        ));
    }

    #[test]
    fn custom_zoom_and_inpaint() {
        round_trip("MJ::CustomZoom::abcd1234");
        let id = round_trip("MJ::Inpaint::1::abcd1234::0.5");
        assert_eq!(
            id,
            CustomId::Inpaint {
                rest: "1::abcd1234::0.5".to_string()
            }
        );
    }

    #[test]
    fn bookmark_tail_is_opaque() {
        round_trip("MJ::BOOKMARK::some::opaque::tail");
    }

    #[test]
    fn remix_modal() {
        let id = round_trip("MJ::RemixModal::hash99::2::1");
        assert_eq!(
            id,
            CustomId::RemixModal {
                hash: "hash99".to_string(),
                index: 2,
                high_variability: true
            }
        );
        assert!(CustomId::parse("MJ::RemixModal::hash99::2::7").is_none());
    }

    #[test]
    fn pan_modal() {
        let id = round_trip("MJ::PanModal::left::HASH::3");
        assert_eq!(
            id,
            CustomId::PanModal {
                direction: PanDirection::Left,
                hash: "HASH".to_string(),
                index: 3
            }
        );
    }

    #[test]
    fn imagine_modal() {
        round_trip("MJ::ImagineModal::112233445566");
    }

    #[test]
    fn high_variability_setting() {
        assert_eq!(
            round_trip("MJ::Settings::HighVariabilityMode::1"),
            CustomId::HighVariabilityMode { enabled: true }
        );
    }

    #[test]
    fn unknown_job_kind_falls_back() {
        let id = round_trip("MJ::JOB::animate_high::1::hash::SOLO");
        assert_eq!(
            id,
            CustomId::Job {
                kind: "animate_high".to_string(),
                rest: "1::hash::SOLO".to_string()
            }
        );
    }

    #[test]
    fn non_grammar_inputs_rejected() {
        assert!(CustomId::parse("").is_none());
        assert!(CustomId::parse("MJ::").is_none());
        assert!(CustomId::parse("NIJI::JOB::upsample::1::h").is_none());
        assert!(CustomId::parse("MJ::JOB::upsample::x::h").is_none());
    }
}
