//! Engine configuration, read from a TOML file.
//!
//! Every field has a default, so a missing file or an empty one yields a
//! working local setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use referral_module::TierTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Hash-chained journal every committed change is written to.
    pub journal_path: PathBuf,

    /// JSON file the payment statuses are read from.
    pub payments_path: PathBuf,

    /// How long a ticket request waits on the payment lookup before the
    /// participant is treated as not paid.
    pub eligibility_timeout_ms: u64,

    /// Referral links are `<referral_base_url>/register?ref=<code>`.
    pub referral_base_url: String,

    /// Default `tracing` filter; `RUST_LOG` overrides it.
    pub log_level: String,

    /// Tier ladder, lowest rung first. Written as `[[tiers]]` tables.
    pub tiers: TierTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from("state/draw-journal.jsonl"),
            payments_path: PathBuf::from("state/payments.json"),
            eligibility_timeout_ms: 2_000,
            referral_base_url: "https://voyage.example".to_string(),
            log_level: "info".to_string(),
            tiers: TierTable::standard(),
        }
    }
}

impl EngineConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.eligibility_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "eligibility_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.referral_base_url.trim().is_empty() {
            return Err(ConfigError::Validation("referral_base_url is empty".into()));
        }
        Ok(())
    }

    pub fn eligibility_timeout(&self) -> Duration {
        Duration::from_millis(self.eligibility_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.tiers.rungs().len(), 3);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("voyage.toml")).unwrap();
        assert_eq!(config.eligibility_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn custom_tier_ladder() {
        let config = EngineConfig::from_toml(
            r#"
            eligibility_timeout_ms = 500

            [[tiers]]
            name = "Bronze"
            min_referrals = 0
            priority_bonus = 0

            [[tiers]]
            name = "Platinum"
            min_referrals = 3
            priority_bonus = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.tiers.weight_for(3), 5);
        assert_eq!(config.tiers.tier_for(2).name, "Bronze");
        assert_eq!(config.eligibility_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn broken_ladder_is_a_parse_error() {
        let err = EngineConfig::from_toml(
            r#"
            [[tiers]]
            name = "Silver"
            min_referrals = 5
            priority_bonus = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = EngineConfig::from_toml("eligibility_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = EngineConfig::default().to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), EngineConfig::default());
    }
}
