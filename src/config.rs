use std::path::PathBuf;
use std::time::Duration;

use crate::ledger::LedgerOptions;

const PREFIX: &str = "ROOMLEDGER_";

/// Settings for the ledger host, read from `ROOMLEDGER_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Appends since the last compaction that trigger a rewrite.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub store_timeout: Duration,
    /// Create the stock rooms when the catalog is empty.
    pub seed_defaults: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            store_timeout: LedgerOptions::default().store_timeout,
            seed_defaults: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup; unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str| -> Option<u64> {
            let raw = get(name)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring {PREFIX}{name}={raw:?}: not a number");
                    None
                }
            }
        };

        let defaults = Self::default();
        Self {
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: parsed("METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            compact_threshold: parsed("COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            compact_interval: parsed("COMPACT_INTERVAL_SECS")
                .filter(|&s| s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            store_timeout: parsed("STORE_TIMEOUT_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            seed_defaults: get("SEED_DEFAULTS")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.seed_defaults),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomledger.wal")
    }

    pub fn ledger_options(&self) -> LedgerOptions {
        LedgerOptions {
            store_timeout: self.store_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), Config::default());
    }

    #[test]
    fn reads_prefixed_variables() {
        let c = config(&[
            ("ROOMLEDGER_DATA_DIR", "/var/lib/roomledger"),
            ("ROOMLEDGER_METRICS_PORT", "9090"),
            ("ROOMLEDGER_COMPACT_THRESHOLD", "50"),
            ("ROOMLEDGER_COMPACT_INTERVAL_SECS", "5"),
            ("ROOMLEDGER_STORE_TIMEOUT_MS", "250"),
            ("ROOMLEDGER_SEED_DEFAULTS", "false"),
        ]);
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/roomledger"));
        assert_eq!(c.wal_path(), PathBuf::from("/var/lib/roomledger/roomledger.wal"));
        assert_eq!(c.metrics_port, Some(9090));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.compact_interval, Duration::from_secs(5));
        assert_eq!(c.ledger_options().store_timeout, Duration::from_millis(250));
        assert!(!c.seed_defaults);
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("ROOMLEDGER_METRICS_PORT", "70000"),
            ("ROOMLEDGER_COMPACT_THRESHOLD", "lots"),
            ("ROOMLEDGER_STORE_TIMEOUT_MS", "0"),
            ("ROOMLEDGER_SEED_DEFAULTS", "yes"),
        ]);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.store_timeout, Duration::from_secs(5));
        assert!(c.seed_defaults);
    }
}
