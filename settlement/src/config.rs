//! Configuration for the settlement keeper

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Module parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Seconds of negative netflow the buffer balance must cover
    pub reserve_time: u64,

    /// Remaining runway (seconds) at which an account is force-settled
    pub forced_settle_time: u64,

    /// Maximum auto-settle entries processed per block
    pub max_auto_force_settle_num: u64,

    /// Native token denomination
    pub fee_denom: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            reserve_time: 180 * 24 * 60 * 60, // 180 days
            forced_settle_time: 24 * 60 * 60, // 1 day
            max_auto_force_settle_num: 100,
            fee_denom: "BNB".to_string(),
        }
    }
}

impl Params {
    /// Check parameter consistency
    pub fn validate(&self) -> crate::Result<()> {
        if self.forced_settle_time == 0 {
            return Err(crate::Error::Config(
                "forced_settle_time must be positive".to_string(),
            ));
        }
        if self.reserve_time < self.forced_settle_time {
            return Err(crate::Error::Config(format!(
                "reserve_time {} is shorter than forced_settle_time {}",
                self.reserve_time, self.forced_settle_time
            )));
        }
        if i64::try_from(self.reserve_time).is_err() {
            return Err(crate::Error::Config("reserve_time out of range".to_string()));
        }
        if self.fee_denom.is_empty() {
            return Err(crate::Error::Config("fee_denom must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Settlement keeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Module account name, also the governance address seed
    pub module_name: String,

    /// Salt mixed into the governance address
    pub governance_salt: String,

    /// Ledger store configuration
    pub ledger: stream_ledger::Config,

    /// Module parameters
    pub params: Params,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "stream-settlement".to_string(),
            module_name: "payment".to_string(),
            governance_salt: "governance".to_string(),
            ledger: stream_ledger::Config::default(),
            params: Params::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.params.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("SETTLEMENT_LEDGER_DIR") {
            config.ledger.data_dir = PathBuf::from(dir);
        }

        if let Ok(value) = std::env::var("SETTLEMENT_RESERVE_TIME") {
            config.params.reserve_time = parse_env("SETTLEMENT_RESERVE_TIME", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLEMENT_FORCED_SETTLE_TIME") {
            config.params.forced_settle_time = parse_env("SETTLEMENT_FORCED_SETTLE_TIME", &value)?;
        }

        if let Ok(value) = std::env::var("SETTLEMENT_MAX_AUTO_FORCE_SETTLE_NUM") {
            config.params.max_auto_force_settle_num =
                parse_env("SETTLEMENT_MAX_AUTO_FORCE_SETTLE_NUM", &value)?;
        }

        config.params.validate()?;
        Ok(config)
    }
}

fn parse_env(name: &str, value: &str) -> crate::Result<u64> {
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.params.reserve_time, 15_552_000);
        assert_eq!(config.params.forced_settle_time, 86_400);
        assert_eq!(config.params.max_auto_force_settle_num, 100);
        assert!(config.params.validate().is_ok());
    }

    #[test]
    fn test_params_validation() {
        let params = Params {
            forced_settle_time: 0,
            ..Params::default()
        };
        assert!(params.validate().is_err());

        let params = Params {
            reserve_time: 10,
            forced_settle_time: 20,
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_toml_overrides_params() {
        let config = Config::from_toml(
            r#"
            module_name = "stream"

            [params]
            reserve_time = 1000
            forced_settle_time = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.module_name, "stream");
        assert_eq!(config.params.reserve_time, 1000);
        assert_eq!(config.params.fee_denom, "BNB");
    }
}
