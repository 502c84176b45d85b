use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ConfigError, FishwatchError};

const DEFAULT_PREFIX: &str = "FISHWATCH_";

/// Runtime environment used by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

/// Configuration of the rules module.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    pub environment: Environment,
    pub node_name: String,
    pub log_level: Option<String>,
    /// Period of the scheduled rule-set refresh. `None` disables it.
    pub refresh_interval: Option<Duration>,
    /// Whether every custom rule firing creates a ticket regardless of the
    /// declared actions.
    pub always_ticket_on_fire: bool,
    /// User recorded as `updated_by` on tickets and alarms.
    pub system_user: String,
    /// Optional YAML file or directory used to seed the in-memory rule store.
    pub rules_path: Option<PathBuf>,
    /// How long a vessel may stay silent before an asset-not-sending ticket
    /// is opened for it.
    pub asset_silence_threshold: Duration,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            node_name: "fishwatch-rules".to_string(),
            log_level: None,
            refresh_interval: None,
            always_ticket_on_fire: true,
            system_user: "UVMS".to_string(),
            rules_path: None,
            asset_silence_threshold: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl RulesConfig {
    /// Loads configuration from the process environment using the
    /// `FISHWATCH_` prefix.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix(DEFAULT_PREFIX)
    }

    /// Loads configuration from env vars prefixed with the provided value (e.g. `RULES_`).
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}{}", prefix, suffix);
        let defaults = Self::default();

        let environment = env::var(key("ENV"))
            .map(|raw| Environment::from_str(&raw))
            .unwrap_or_default();

        let node_name = env::var(key("NODE_NAME")).unwrap_or(defaults.node_name);
        let log_level = env::var(key("LOG_LEVEL")).ok();

        let interval_key = key("REFRESH_INTERVAL_SECS");
        let refresh_interval = match env::var(&interval_key) {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
                    key: interval_key.clone(),
                    value: raw.clone(),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let ticket_key = key("ALWAYS_TICKET_ON_FIRE");
        let always_ticket_on_fire = match env::var(&ticket_key) {
            Ok(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidEnvVar {
                key: ticket_key,
                value: raw,
            })?,
            Err(_) => defaults.always_ticket_on_fire,
        };

        let silence_key = key("ASSET_SILENCE_THRESHOLD_SECS");
        let asset_silence_threshold = match env::var(&silence_key) {
            Ok(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidEnvVar {
                    key: silence_key,
                    value: raw,
                })?,
            Err(_) => defaults.asset_silence_threshold,
        };

        let system_user = env::var(key("SYSTEM_USER")).unwrap_or(defaults.system_user);
        let rules_path = env::var(key("RULES_PATH"))
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            node_name,
            log_level,
            refresh_interval,
            always_ticket_on_fire,
            system_user,
            rules_path,
            asset_silence_threshold,
        })
    }

    /// Whether the service is running in production.
    pub fn is_production(&self) -> bool {
        matches!(self.environment, Environment::Production)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Helper that loads config and converts to the canonical fishwatch error type.
pub fn load_rules_config() -> Result<RulesConfig, FishwatchError> {
    Ok(RulesConfig::from_env()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_for_unset_prefix() {
        let cfg = RulesConfig::from_env_with_prefix("FISHWATCH_TEST_UNSET_").expect("config");
        assert_eq!(cfg.environment, Environment::Development);
        assert!(cfg.refresh_interval.is_none());
        assert!(cfg.always_ticket_on_fire);
        assert_eq!(cfg.system_user, "UVMS");
        assert_eq!(cfg.asset_silence_threshold, Duration::from_secs(7200));
    }

    #[test]
    fn reads_prefixed_values() {
        std::env::set_var("FISHWATCH_CFG_A_ENV", "prod");
        std::env::set_var("FISHWATCH_CFG_A_REFRESH_INTERVAL_SECS", "30");
        std::env::set_var("FISHWATCH_CFG_A_ALWAYS_TICKET_ON_FIRE", "no");
        std::env::set_var("FISHWATCH_CFG_A_ASSET_SILENCE_THRESHOLD_SECS", "600");
        let cfg = RulesConfig::from_env_with_prefix("FISHWATCH_CFG_A_").expect("config");
        assert!(cfg.is_production());
        assert_eq!(cfg.refresh_interval, Some(Duration::from_secs(30)));
        assert!(!cfg.always_ticket_on_fire);
        assert_eq!(cfg.asset_silence_threshold, Duration::from_secs(600));
    }

    #[test]
    fn rejects_malformed_interval() {
        std::env::set_var("FISHWATCH_CFG_B_REFRESH_INTERVAL_SECS", "soon");
        let err = RulesConfig::from_env_with_prefix("FISHWATCH_CFG_B_").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));

        std::env::set_var("FISHWATCH_CFG_C_ASSET_SILENCE_THRESHOLD_SECS", "0");
        let err = RulesConfig::from_env_with_prefix("FISHWATCH_CFG_C_").unwrap_err();
        assert!(matches!(
            FishwatchError::from(err),
            FishwatchError::Config(message) if message.contains("ASSET_SILENCE_THRESHOLD_SECS")
        ));
    }
}
