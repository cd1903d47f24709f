//! Engine configuration.
//!
//! Loaded and validated by the embedding application; the engine only reads
//! it. The ip-rate-limit keys of the deployment config are consumed by the
//! HTTP edge and deliberately do not appear here.

use serde::Deserialize;

use atelier_core::selection::ChooseRule;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Which selection rule the load balancer applies.
    pub account_choose_rule: ChooseRule,
    /// Route imagine prompts through domain keyword sets.
    pub enable_vertical_domain: bool,
    /// Accept base64 data-URL uploads from callers.
    pub enable_user_upload_base64: bool,
    /// Re-host caller-provided `http(s)` links on chat accounts instead of
    /// passing them through.
    pub enable_save_user_upload_link: bool,
    /// Pass caller links straight to partner accounts instead of
    /// refetching and re-uploading.
    pub enable_partner_prompt_link: bool,
    /// Treat NIJI submissions as MJ (single-bot fleets).
    pub enable_convert_niji_to_mj: bool,
    /// Allow the video action.
    pub enable_video: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account_choose_rule: ChooseRule::BestWaitIdle,
            enable_vertical_domain: false,
            enable_user_upload_base64: true,
            enable_save_user_upload_link: false,
            enable_partner_prompt_link: false,
            enable_convert_niji_to_mj: false,
            enable_video: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = EngineConfig::default();
        assert_eq!(config.account_choose_rule, ChooseRule::BestWaitIdle);
        assert!(!config.enable_vertical_domain);
        assert!(config.enable_user_upload_base64);
        assert!(!config.enable_video);
    }

    #[test]
    fn deserializes_kebab_case_keys() {
        let json = r#"{
            "account-choose-rule": "Polling",
            "enable-vertical-domain": true,
            "enable-video": true
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.account_choose_rule, ChooseRule::Polling);
        assert!(config.enable_vertical_domain);
        assert!(config.enable_video);
        // Unmentioned keys keep their defaults.
        assert!(config.enable_user_upload_base64);
    }
}
