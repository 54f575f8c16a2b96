// ⚙️ Application configuration
// Environment variables with defaults; invalid values are errors, never
// silently replaced.

use crate::card_io::CardLatency;
use crate::chip::{ChipLayout, CRITICAL_BLOCK_BYTES, TOTAL_CAPACITY_BYTES};
use crate::history::DEFAULT_MAX_VISITS;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_DB_PATH: &str = "SMARTID_DB_PATH";
pub const ENV_BIND_ADDR: &str = "SMARTID_BIND_ADDR";
pub const ENV_READ_DELAY_MS: &str = "SMARTID_READ_DELAY_MS";
pub const ENV_WRITE_DELAY_MS: &str = "SMARTID_WRITE_DELAY_MS";
pub const ENV_MAX_VISITS: &str = "SMARTID_MAX_VISITS";
pub const ENV_CRITICAL_BYTES: &str = "SMARTID_CRITICAL_BYTES";
pub const ENV_TOTAL_BYTES: &str = "SMARTID_TOTAL_BYTES";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub latency: CardLatency,
    pub layout: ChipLayout,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: PathBuf::from("smartid.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            latency: CardLatency::default(),
            layout: ChipLayout::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let db_path = lookup(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);
        let bind_addr = lookup(ENV_BIND_ADDR).unwrap_or(defaults.bind_addr);

        let read_ms: u64 = parse_var(&lookup, ENV_READ_DELAY_MS, 1500)?;
        let write_ms: u64 = parse_var(&lookup, ENV_WRITE_DELAY_MS, 2000)?;

        let critical: usize = parse_var(&lookup, ENV_CRITICAL_BYTES, CRITICAL_BLOCK_BYTES)?;
        let total: usize = parse_var(&lookup, ENV_TOTAL_BYTES, TOTAL_CAPACITY_BYTES)?;
        let max_visits: usize = parse_var(&lookup, ENV_MAX_VISITS, DEFAULT_MAX_VISITS)?;
        let layout = ChipLayout::new(critical, total, max_visits).ok_or_else(|| {
            if max_visits == 0 {
                anyhow!("invalid chip layout: {} must be at least 1", ENV_MAX_VISITS)
            } else {
                anyhow!(
                    "invalid chip layout: {}={} does not fit in {}={}",
                    ENV_CRITICAL_BYTES,
                    critical,
                    ENV_TOTAL_BYTES,
                    total
                )
            }
        })?;

        Ok(AppConfig {
            db_path,
            bind_addr,
            latency: CardLatency::from_millis(read_ms, write_ms),
            layout,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.layout.total_capacity_bytes(), 30720);
        assert_eq!(config.latency.read, Duration::from_millis(1500));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_DB_PATH, "/tmp/cards.db"),
            (ENV_READ_DELAY_MS, "0"),
            (ENV_WRITE_DELAY_MS, " 10 "),
            (ENV_MAX_VISITS, "50"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/cards.db"));
        assert_eq!(config.latency, CardLatency::from_millis(0, 10));
        assert_eq!(config.layout.max_visit_count(), 50);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config_from(&[(ENV_MAX_VISITS, "lots")]).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_VISITS));

        let err = config_from(&[(ENV_CRITICAL_BYTES, "4096"), (ENV_TOTAL_BYTES, "1024")]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("invalid chip layout"));
        assert!(message.contains(ENV_CRITICAL_BYTES));
        assert!(message.contains(ENV_TOTAL_BYTES));

        let err = config_from(&[(ENV_TOTAL_BYTES, "0")]).unwrap_err();
        assert!(err.to_string().contains(ENV_TOTAL_BYTES));
    }

    #[test]
    fn test_zero_max_visits_rejected() {
        let err = config_from(&[(ENV_MAX_VISITS, "0")]).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_VISITS));

        let config = config_from(&[(ENV_MAX_VISITS, "1")]).unwrap();
        assert_eq!(config.layout.max_visit_count(), 1);
    }
}
