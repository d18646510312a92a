//! Engine configuration: defaults, then an optional TOML file, then
//! `LEDGER_`-prefixed environment variables.
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::store::DEFAULT_MAX_RETRIES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// How an adjustment blends the counted stock into the average buy price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageCostPolicy {
    /// The replaced warehouse count is removed from the old total before
    /// blending.
    #[default]
    ExcludeReplaced,
    /// Old total across every warehouse, replaced count included.
    Observed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    /// Use a throwaway in-memory store; `db_path` is ignored.
    pub temporary: bool,
    pub max_retries: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub allow_shipping_edits: bool,
    pub average_cost: AverageCostPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ledger.db"),
            temporary: false,
            max_retries: DEFAULT_MAX_RETRIES,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            allow_shipping_edits: true,
            average_cost: AverageCostPolicy::ExcludeReplaced,
        }
    }
}

impl LedgerConfig {
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(LedgerConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("LEDGER_").split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Ok(Self::figment(file).extract()?)
    }

    pub fn open_db(&self) -> sled::Result<sled::Db> {
        if self.temporary {
            return sled::Config::new().temporary(true).open();
        }
        sled::open(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_sources() {
        figment::Jail::expect_with(|_| {
            let config = LedgerConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, LedgerConfig::default());
            assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
            Ok(())
        });
    }

    #[test]
    fn file_then_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "ledger.toml",
                r#"
                db_path = "data/stock.db"
                max_retries = 3
                average_cost = "observed"
                allow_shipping_edits = false
                "#,
            )?;
            jail.set_env("LEDGER_MAX_RETRIES", "5");
            jail.set_env("LEDGER_LOG_FORMAT", "json");

            let config =
                LedgerConfig::load(Some(Path::new("ledger.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.db_path, PathBuf::from("data/stock.db"));
            assert_eq!(config.max_retries, 5);
            assert_eq!(config.log_format, LogFormat::Json);
            assert_eq!(config.average_cost, AverageCostPolicy::Observed);
            assert!(!config.allow_shipping_edits);
            Ok(())
        });
    }

    #[test]
    fn single_underscores_stay_in_the_key() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("LEDGER_LOG_LEVEL", "debug");
            jail.set_env("LEDGER_ALLOW_SHIPPING_EDITS", "false");
            jail.set_env("LEDGER_AVERAGE_COST", "observed");

            let config = LedgerConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.log_level, "debug");
            assert!(!config.allow_shipping_edits);
            assert_eq!(config.average_cost, AverageCostPolicy::Observed);
            Ok(())
        });
    }
}
