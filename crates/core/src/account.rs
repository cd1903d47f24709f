//! Upstream account entity.
//!
//! Accounts are created and mutated out-of-band (admin surfaces); the core
//! observes them through the registry. Everything here is the pure view:
//! capability checks, mode gates, work-hour windows, remix toggles and the
//! settings button grid snapshot.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::task::{BackendFamily, BotFamily, Button, SpeedMode};
use crate::types::{ChannelId, Timestamp};

/// Per-mode queue capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizes {
    pub fast: usize,
    pub relax: usize,
    pub turbo: usize,
}

impl Default for QueueSizes {
    fn default() -> Self {
        Self {
            fast: 10,
            relax: 10,
            turbo: 10,
        }
    }
}

impl QueueSizes {
    pub fn for_mode(&self, mode: SpeedMode) -> usize {
        match mode {
            SpeedMode::Fast => self.fast,
            SpeedMode::Relax => self.relax,
            SpeedMode::Turbo => self.turbo,
        }
    }
}

/// Optional capability required by a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Blend,
    Describe,
    Shorten,
}

/// One upstream account and its scheduling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Primary channel id; doubles as the account identifier.
    pub channel_id: ChannelId,
    pub guild_id: String,
    /// Private channel that receives `/info` and `/show` for the MJ bot.
    #[serde(default)]
    pub mj_private_channel_id: Option<String>,
    /// Same, for the NIJI bot.
    #[serde(default)]
    pub niji_private_channel_id: Option<String>,
    pub backend_family: BackendFamily,
    #[serde(default = "default_true")]
    pub enable_mj: bool,
    #[serde(default)]
    pub enable_niji: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Worker-pool size.
    #[serde(default = "default_core_size")]
    pub core_size: usize,
    #[serde(default)]
    pub queue_sizes: QueueSizes,
    /// Pacing before the first send of a burst, seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: f64,
    /// Lower bound of the random pause between successive sends, seconds.
    #[serde(default = "default_after_min")]
    pub after_interval_min_secs: f64,
    /// Upper bound of the random pause between successive sends, seconds.
    #[serde(default = "default_after_max")]
    pub after_interval_max_secs: f64,
    /// Per-task deadline from SUBMITTED to terminal.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Weight for weighted selection; 0 removes the account from that rule.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Manual ordering key, ascending; ties in selection break on this.
    #[serde(default)]
    pub sort: i32,
    /// Work-hours window, `"HH:mm-HH:mm"` (comma-separated ranges allowed).
    /// Empty means always on duty.
    #[serde(default)]
    pub work_time: Option<String>,
    /// Sleep ("fishing") window in the same format; inside it the account
    /// is not alive.
    #[serde(default)]
    pub sleep_time: Option<String>,
    /// Secondary channels the account may dispatch through.
    #[serde(default)]
    pub sub_channel_ids: Vec<String>,
    #[serde(default = "default_modes")]
    pub allowed_modes: Vec<SpeedMode>,
    /// Mode currently selected in the upstream settings grid.
    #[serde(default)]
    pub current_mode: Option<SpeedMode>,
    #[serde(default = "default_true")]
    pub enable_blend: bool,
    #[serde(default = "default_true")]
    pub enable_describe: bool,
    #[serde(default = "default_true")]
    pub enable_shorten: bool,
    /// Whether this account participates in vertical-domain routing.
    #[serde(default)]
    pub enable_vertical_domain: bool,
    /// Vertical-domain ids this account is tagged with.
    #[serde(default)]
    pub domain_ids: Vec<String>,
    #[serde(default)]
    pub mj_remix_on: bool,
    #[serde(default)]
    pub niji_remix_on: bool,
    /// When remix is on, submit the modal automatically instead of
    /// returning a window handoff.
    #[serde(default)]
    pub remix_auto_submit: bool,
    /// Snapshot of the MJ settings button grid.
    #[serde(default)]
    pub mj_buttons: Vec<Button>,
    /// Snapshot of the NIJI settings button grid.
    #[serde(default)]
    pub niji_buttons: Vec<Button>,
}

fn default_true() -> bool {
    true
}
fn default_core_size() -> usize {
    3
}
fn default_interval() -> f64 {
    1.2
}
fn default_after_min() -> f64 {
    1.2
}
fn default_after_max() -> f64 {
    1.8
}
fn default_timeout_minutes() -> u64 {
    5
}
fn default_weight() -> u32 {
    1
}
fn default_modes() -> Vec<SpeedMode> {
    vec![SpeedMode::Fast, SpeedMode::Relax]
}

/// Style code the upstream uses for an active (green) settings button.
const BUTTON_STYLE_ACTIVE: i32 = 3;

impl Account {
    pub fn new(channel_id: impl Into<ChannelId>, guild_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            guild_id: guild_id.into(),
            mj_private_channel_id: None,
            niji_private_channel_id: None,
            backend_family: BackendFamily::Chat,
            enable_mj: true,
            enable_niji: false,
            enabled: true,
            core_size: default_core_size(),
            queue_sizes: QueueSizes::default(),
            interval_secs: default_interval(),
            after_interval_min_secs: default_after_min(),
            after_interval_max_secs: default_after_max(),
            timeout_minutes: default_timeout_minutes(),
            weight: default_weight(),
            sort: 0,
            work_time: None,
            sleep_time: None,
            sub_channel_ids: Vec::new(),
            allowed_modes: default_modes(),
            current_mode: None,
            enable_blend: true,
            enable_describe: true,
            enable_shorten: true,
            enable_vertical_domain: false,
            domain_ids: Vec::new(),
            mj_remix_on: false,
            niji_remix_on: false,
            remix_auto_submit: false,
            mj_buttons: Vec::new(),
            niji_buttons: Vec::new(),
        }
    }

    pub fn supports_bot(&self, bot: BotFamily) -> bool {
        match bot {
            BotFamily::Mj => self.enable_mj,
            BotFamily::Niji => self.enable_niji,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Blend => self.enable_blend,
            Capability::Describe => self.enable_describe,
            Capability::Shorten => self.enable_shorten,
        }
    }

    pub fn allows_mode(&self, mode: SpeedMode) -> bool {
        self.allowed_modes.contains(&mode)
    }

    pub fn private_channel_for(&self, bot: BotFamily) -> Option<&str> {
        match bot {
            BotFamily::Mj => self.mj_private_channel_id.as_deref(),
            BotFamily::Niji => self.niji_private_channel_id.as_deref(),
        }
    }

    pub fn remix_on(&self, bot: BotFamily) -> bool {
        match bot {
            BotFamily::Mj => self.mj_remix_on,
            BotFamily::Niji => self.niji_remix_on,
        }
    }

    pub fn buttons_for(&self, bot: BotFamily) -> &[Button] {
        match bot {
            BotFamily::Mj => &self.mj_buttons,
            BotFamily::Niji => &self.niji_buttons,
        }
    }

    /// Whether the "High Variability Mode" settings button is lit.
    pub fn high_variability_active(&self, bot: BotFamily) -> bool {
        self.buttons_for(bot).iter().any(|b| {
            b.custom_id.starts_with("MJ::Settings::HighVariabilityMode")
                && b.style == BUTTON_STYLE_ACTIVE
        })
    }

    pub fn is_tagged_with_any(&self, domain_ids: &[String]) -> bool {
        domain_ids.iter().any(|id| self.domain_ids.contains(id))
    }

    /// Enabled, inside work hours and outside the sleep window.
    ///
    /// Transport connectivity is tracked by the owning instance, not here.
    pub fn is_on_duty(&self, now: Timestamp) -> bool {
        if !self.enabled {
            return false;
        }
        let time = now.time();
        let in_work = self
            .work_time
            .as_deref()
            .map_or(true, |spec| in_window(spec, time));
        let asleep = self
            .sleep_time
            .as_deref()
            .is_some_and(|spec| in_window(spec, time));
        in_work && !asleep
    }
}

/// Whether `time` falls inside any `"HH:mm-HH:mm"` range of `spec`.
///
/// Ranges may be comma-separated and may wrap past midnight
/// (`"22:00-06:00"`). Malformed ranges never match.
pub fn in_window(spec: &str, time: NaiveTime) -> bool {
    spec.split(',').map(str::trim).any(|range| {
        let Some((from, to)) = range.split_once('-') else {
            return false;
        };
        let (Ok(from), Ok(to)) = (
            NaiveTime::parse_from_str(from.trim(), "%H:%M"),
            NaiveTime::parse_from_str(to.trim(), "%H:%M"),
        ) else {
            return false;
        };
        let minute = time.hour() * 60 + time.minute();
        let from = from.hour() * 60 + from.minute();
        let to = to.hour() * 60 + to.minute();
        if from <= to {
            (from..=to).contains(&minute)
        } else {
            // Overnight wrap.
            minute >= from || minute <= to
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
