//! Load balancer over the account registry.
//!
//! `choose` is a pure filter chain over the alive instances followed by one
//! of the four selection rules. It never mutates anything except the
//! registry's polling counter.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;

use atelier_core::account::Capability;
use atelier_core::selection::{self, CandidateLoad, ChooseRule};
use atelier_core::task::{AccountFilter, BackendFamily, BotFamily, SpeedMode};

use crate::config::EngineConfig;
use crate::instance::UpstreamInstance;
use crate::registry::AccountRegistry;

/// What a submission demands from an account.
#[derive(Debug, Clone, Default)]
pub struct SelectRequirements {
    pub bot_family: Option<BotFamily>,
    pub capability: Option<Capability>,
    pub preferred_mode: Option<SpeedMode>,
    /// Route only to accounts tagged with one of `domain_ids`.
    pub is_domain: bool,
    pub domain_ids: Vec<String>,
    /// Explicit instance whitelist beyond the caller filter.
    pub instance_whitelist: Vec<String>,
    /// Restrict to these backend families (e.g. partner/official for edit);
    /// empty = any.
    pub backends: Vec<BackendFamily>,
}

/// Account selector (load balancer).
pub struct Selector {
    registry: Arc<AccountRegistry>,
    config: Arc<EngineConfig>,
}

impl Selector {
    pub fn new(registry: Arc<AccountRegistry>, config: Arc<EngineConfig>) -> Self {
        Self { registry, config }
    }

    /// Pick an eligible instance, or `None` when no account qualifies.
    pub async fn choose(
        &self,
        filter: &AccountFilter,
        requirements: &SelectRequirements,
    ) -> Option<Arc<UpstreamInstance>> {
        let now = Utc::now();
        let mut survivors: Vec<(Arc<UpstreamInstance>, CandidateLoad)> = Vec::new();

        for instance in self.registry.alive(now).await {
            if !instance.is_accept_new_task(now).await {
                continue;
            }
            let account = instance.account().await;

            if !filter.accepts_instance(&account.channel_id) {
                continue;
            }
            if !requirements.instance_whitelist.is_empty()
                && !requirements
                    .instance_whitelist
                    .iter()
                    .any(|id| id == &account.channel_id)
            {
                continue;
            }
            if let Some(bot) = requirements.bot_family {
                if !account.supports_bot(bot) {
                    continue;
                }
            }
            if let Some(capability) = requirements.capability {
                if !account.supports(capability) {
                    continue;
                }
            }
            if !requirements.backends.is_empty()
                && !requirements.backends.contains(&account.backend_family)
            {
                continue;
            }
            if let Some(mode) = requirements.preferred_mode {
                if !account.allows_mode(mode) {
                    continue;
                }
            }
            // The instance can still fall back across modes; all that is
            // required here is an overlap between filter and account.
            if !filter.modes.is_empty()
                && !account.allowed_modes.iter().any(|m| filter.accepts_mode(*m))
            {
                continue;
            }
            if requirements.is_domain && !requirements.domain_ids.is_empty() {
                if !account.enable_vertical_domain
                    || !account.is_tagged_with_any(&requirements.domain_ids)
                {
                    continue;
                }
            }

            let load = instance.load().await;
            survivors.push((instance, load));
        }

        if survivors.is_empty() {
            return None;
        }

        let index = match self.config.account_choose_rule {
            ChooseRule::BestWaitIdle => {
                let loads: Vec<CandidateLoad> = survivors.iter().map(|(_, l)| *l).collect();
                selection::pick_best_wait_idle(&loads)?
            }
            ChooseRule::Random => rand::rng().random_range(0..survivors.len()),
            ChooseRule::Weight => {
                let weights: Vec<u32> = survivors.iter().map(|(_, l)| l.weight).collect();
                let roll: f64 = rand::rng().random();
                selection::pick_weighted(&weights, roll)
                    .unwrap_or_else(|| rand::rng().random_range(0..weights.len()))
            }
            ChooseRule::Polling => {
                selection::pick_polling(self.registry.next_polling_index(), survivors.len())?
            }
        };

        Some(survivors.swap_remove(index).0)
    }
}
