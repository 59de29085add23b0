//! Versioned detection rule configuration.
//!
//! Loaded once per detection run from the `anomaly_rules` table and passed
//! explicitly to every detector call. A missing or unparseable row aborts the
//! run -- silently defaulted thresholds would make alerts unauditable.

use crate::storage::Pool;
use anyhow::{Context, Result};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_RULE_NAME: &str = "anomaly_rules";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rule configuration '{0}' not found")]
    Missing(String),
    #[error("rule configuration '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },
    #[error("rule configuration '{name}' could not be loaded: {reason}")]
    Unavailable { name: String, reason: String },
}

/// Thresholds and windows for one detection run. Immutable once loaded;
/// alerts keep the `rule_version` they were created under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_rule_version")]
    pub rule_version: String,
    #[serde(default = "default_zscore_z")]
    pub zscore_z: f64,
    #[serde(default = "default_ewma_lambda")]
    pub ewma_lambda: f64,
    #[serde(default = "default_ewma_limit")]
    pub ewma_limit: f64,
    #[serde(default = "default_change_point_window")]
    pub change_point_window: usize,
    #[serde(default = "default_change_point_z")]
    pub change_point_z: f64,
    #[serde(default = "default_seasonal_min_points")]
    pub seasonal_min_points: usize,
    #[serde(default = "default_seasonal_z")]
    pub seasonal_z: f64,
    #[serde(default = "default_regime_recent_days")]
    pub regime_recent_days: usize,
    #[serde(default = "default_regime_baseline_days")]
    pub regime_baseline_days: usize,
    #[serde(default = "default_regime_z")]
    pub regime_z: f64,
    #[serde(default = "default_regime_var_ratio")]
    pub regime_var_ratio: f64,
    /// risk_score at or above which an alert is WARN
    #[serde(default = "default_warn_score")]
    pub warn_score: f64,
    /// risk_score at or above which an alert is CRITICAL
    #[serde(default = "default_critical_score")]
    pub critical_score: f64,
}

fn default_rule_version() -> String {
    "v1".to_string()
}
fn default_zscore_z() -> f64 {
    3.0
}
fn default_ewma_lambda() -> f64 {
    0.3
}
fn default_ewma_limit() -> f64 {
    3.0
}
fn default_change_point_window() -> usize {
    7
}
fn default_change_point_z() -> f64 {
    3.0
}
fn default_seasonal_min_points() -> usize {
    3
}
fn default_seasonal_z() -> f64 {
    3.0
}
fn default_regime_recent_days() -> usize {
    7
}
fn default_regime_baseline_days() -> usize {
    14
}
fn default_regime_z() -> f64 {
    3.0
}
fn default_regime_var_ratio() -> f64 {
    2.0
}
fn default_warn_score() -> f64 {
    5.0
}
fn default_critical_score() -> f64 {
    15.0
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            rule_version: default_rule_version(),
            zscore_z: default_zscore_z(),
            ewma_lambda: default_ewma_lambda(),
            ewma_limit: default_ewma_limit(),
            change_point_window: default_change_point_window(),
            change_point_z: default_change_point_z(),
            seasonal_min_points: default_seasonal_min_points(),
            seasonal_z: default_seasonal_z(),
            regime_recent_days: default_regime_recent_days(),
            regime_baseline_days: default_regime_baseline_days(),
            regime_z: default_regime_z(),
            regime_var_ratio: default_regime_var_ratio(),
            warn_score: default_warn_score(),
            critical_score: default_critical_score(),
        }
    }
}

/// Load the active rule configuration. Absent config is an error, never a
/// silently-applied default.
pub fn load_rule_config(pool: &Pool, rule_name: &str) -> Result<RuleConfig, ConfigError> {
    let conn = pool.get().map_err(|e| ConfigError::Unavailable {
        name: rule_name.to_string(),
        reason: e.to_string(),
    })?;

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT rule_version, config FROM anomaly_rules WHERE rule_name = ?1",
            [rule_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| ConfigError::Unavailable {
            name: rule_name.to_string(),
            reason: e.to_string(),
        })?;

    let (rule_version, config_json) = row.ok_or_else(|| ConfigError::Missing(rule_name.to_string()))?;

    let mut config: RuleConfig =
        serde_json::from_str(&config_json).map_err(|e| ConfigError::Malformed {
            name: rule_name.to_string(),
            reason: e.to_string(),
        })?;
    config.rule_version = rule_version;
    Ok(config)
}

/// Install (or replace) the active rule configuration under `rule_name`.
pub fn save_rule_config(pool: &Pool, rule_name: &str, config: &RuleConfig) -> Result<()> {
    let conn = pool.get().context("get connection for rule save")?;
    let config_json = serde_json::to_string(config)?;
    conn.execute(
        "INSERT INTO anomaly_rules (rule_name, rule_version, config, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT (rule_name)
         DO UPDATE SET rule_version = excluded.rule_version,
                       config = excluded.config,
                       updated_at = excluded.updated_at",
        rusqlite::params![rule_name, config.rule_version, config_json],
    )?;
    Ok(())
}

/// Parse a rule file written in TOML (the `rules init --file` input).
pub fn rule_config_from_toml(text: &str) -> Result<RuleConfig> {
    toml::from_str(text).context("parse rule configuration TOML")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_an_error() {
        let pool = crate::storage::open_memory_pool().unwrap();
        let err = load_rule_config(&pool, DEFAULT_RULE_NAME).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_round_trip_keeps_version_and_thresholds() {
        let pool = crate::storage::open_memory_pool().unwrap();
        let mut config = RuleConfig::default();
        config.rule_version = "v7".to_string();
        config.ewma_limit = 2.5;
        save_rule_config(&pool, DEFAULT_RULE_NAME, &config).unwrap();

        let loaded = load_rule_config(&pool, DEFAULT_RULE_NAME).unwrap();
        assert_eq!(loaded.rule_version, "v7");
        assert_eq!(loaded.ewma_limit, 2.5);
        assert_eq!(loaded.change_point_window, 7);
    }

    #[test]
    fn test_absent_keys_take_documented_defaults() {
        let pool = crate::storage::open_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO anomaly_rules (rule_name, rule_version, config)
             VALUES (?1, 'v2', '{\"seasonal_z\": 2.0}')",
            [DEFAULT_RULE_NAME],
        )
        .unwrap();
        drop(conn);

        let loaded = load_rule_config(&pool, DEFAULT_RULE_NAME).unwrap();
        assert_eq!(loaded.rule_version, "v2");
        assert_eq!(loaded.seasonal_z, 2.0);
        assert_eq!(loaded.regime_baseline_days, 14);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let pool = crate::storage::open_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO anomaly_rules (rule_name, rule_version, config)
             VALUES (?1, 'v2', 'not json')",
            [DEFAULT_RULE_NAME],
        )
        .unwrap();
        drop(conn);

        let err = load_rule_config(&pool, DEFAULT_RULE_NAME).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn test_rule_file_parses_from_toml() {
        let config = rule_config_from_toml("rule_version = \"v3\"\newma_lambda = 0.2\n").unwrap();
        assert_eq!(config.rule_version, "v3");
        assert_eq!(config.ewma_lambda, 0.2);
        assert_eq!(config.zscore_z, 3.0);
    }
}
