//! Runtime configuration, loaded from TOML with per-section defaults.
//!
//! Every section and every key is optional; a missing file resolves to
//! the same defaults as an empty one. CLI flags override after loading.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use tracing::warn;
use updown_common::{FillPolicy, SeriesAsset};
use updown_market::{ClobConfig, GammaConfig};

use crate::candles::CoinbaseConfig;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub log_level: String,
    pub data_dir: PathBuf,
    pub assets: Vec<SeriesAsset>,

    pub gamma: GammaConfig,
    pub gamma_call_delay: StdDuration,

    pub clob: ClobConfig,
    pub clob_call_delay: StdDuration,
    pub history_interval: String,
    pub history_fidelity: u32,
    pub trade_limit: u32,

    pub coinbase: CoinbaseConfig,
    pub coinbase_call_delay: StdDuration,
    pub granularity_secs: u32,
    pub max_candles_per_request: usize,
    pub max_concurrent_requests: usize,

    pub snapshot_interval: StdDuration,
    pub snapshot_iterations: u64,

    pub record_interval: StdDuration,
    pub record_iterations: u64,

    pub resample_step: Duration,
    pub fill: FillPolicy,
    pub feature_bar: Duration,
}

impl Default for CollectConfig {
    fn default() -> Self {
        TomlConfig::default().into()
    }
}

impl CollectConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: TomlConfig = toml::from_str(content).context("Failed to parse config")?;
        Ok(parsed.into())
    }

    /// Applies CLI overrides on top of the loaded file.
    pub fn apply_overrides(&mut self, log_level: Option<&str>, data_dir: Option<&Path>) {
        if let Some(level) = log_level {
            self.log_level = level.to_string();
        }
        if let Some(dir) = data_dir {
            self.data_dir = dir.to_path_buf();
        }
    }
}

// ============================================================================
// TOML sections
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TomlConfig {
    general: GeneralSection,
    gamma: GammaSection,
    clob: ClobSection,
    coinbase: CoinbaseSection,
    snapshot: SnapshotSection,
    record: RecordSection,
    resample: ResampleSection,
    features: FeaturesSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralSection {
    log_level: String,
    data_dir: String,
    assets: Vec<String>,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: "data".to_string(),
            assets: vec!["btc".to_string(), "eth".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GammaSection {
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    initial_backoff_secs: u64,
    call_delay_ms: u64,
}

impl Default for GammaSection {
    fn default() -> Self {
        let base = GammaConfig::default();
        Self {
            base_url: base.base_url,
            timeout_secs: base.timeout.as_secs(),
            max_retries: base.max_retries,
            initial_backoff_secs: base.initial_backoff.as_secs(),
            call_delay_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ClobSection {
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    initial_backoff_secs: u64,
    call_delay_ms: u64,
    history_interval: String,
    history_fidelity: u32,
    trade_limit: u32,
}

impl Default for ClobSection {
    fn default() -> Self {
        let base = ClobConfig::default();
        Self {
            base_url: base.base_url,
            timeout_secs: base.timeout.as_secs(),
            max_retries: base.max_retries,
            initial_backoff_secs: base.initial_backoff.as_secs(),
            call_delay_ms: 100,
            history_interval: "max".to_string(),
            history_fidelity: 1,
            trade_limit: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CoinbaseSection {
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
    initial_backoff_secs: u64,
    call_delay_ms: u64,
    granularity_secs: u32,
    max_candles_per_request: usize,
    max_concurrent_requests: usize,
}

impl Default for CoinbaseSection {
    fn default() -> Self {
        let base = CoinbaseConfig::default();
        Self {
            base_url: base.base_url,
            timeout_secs: base.timeout.as_secs(),
            max_retries: base.max_retries,
            initial_backoff_secs: base.initial_backoff.as_secs(),
            call_delay_ms: 200,
            granularity_secs: 300,
            max_candles_per_request: 300,
            max_concurrent_requests: 4,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SnapshotSection {
    interval_secs: u64,
    iterations: u64,
}

impl Default for SnapshotSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            iterations: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RecordSection {
    interval_secs: u64,
    iterations: u64,
}

impl Default for RecordSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            iterations: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ResampleSection {
    step_secs: i64,
    fill: String,
}

impl Default for ResampleSection {
    fn default() -> Self {
        Self {
            step_secs: 60,
            fill: FillPolicy::Forward.as_str().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FeaturesSection {
    bar_secs: i64,
}

impl Default for FeaturesSection {
    fn default() -> Self {
        Self { bar_secs: 300 }
    }
}

impl From<TomlConfig> for CollectConfig {
    fn from(t: TomlConfig) -> Self {
        let assets: Vec<SeriesAsset> = t
            .general
            .assets
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(asset) => Some(asset),
                Err(e) => {
                    warn!("Ignoring config asset: {}", e);
                    None
                }
            })
            .collect();

        let fill = match t.resample.fill.parse() {
            Ok(policy) => policy,
            Err(e) => {
                warn!("Ignoring config fill policy: {}", e);
                FillPolicy::default()
            }
        };

        Self {
            log_level: t.general.log_level,
            data_dir: PathBuf::from(t.general.data_dir),
            assets,

            gamma: GammaConfig {
                base_url: t.gamma.base_url,
                timeout: StdDuration::from_secs(t.gamma.timeout_secs),
                max_retries: t.gamma.max_retries,
                initial_backoff: StdDuration::from_secs(t.gamma.initial_backoff_secs),
            },
            gamma_call_delay: StdDuration::from_millis(t.gamma.call_delay_ms),

            clob: ClobConfig {
                base_url: t.clob.base_url,
                timeout: StdDuration::from_secs(t.clob.timeout_secs),
                max_retries: t.clob.max_retries,
                initial_backoff: StdDuration::from_secs(t.clob.initial_backoff_secs),
            },
            clob_call_delay: StdDuration::from_millis(t.clob.call_delay_ms),
            history_interval: t.clob.history_interval,
            history_fidelity: t.clob.history_fidelity,
            trade_limit: t.clob.trade_limit,

            coinbase: CoinbaseConfig {
                base_url: t.coinbase.base_url,
                timeout: StdDuration::from_secs(t.coinbase.timeout_secs),
                max_retries: t.coinbase.max_retries,
                initial_backoff: StdDuration::from_secs(t.coinbase.initial_backoff_secs),
            },
            coinbase_call_delay: StdDuration::from_millis(t.coinbase.call_delay_ms),
            granularity_secs: t.coinbase.granularity_secs,
            max_candles_per_request: t.coinbase.max_candles_per_request,
            max_concurrent_requests: t.coinbase.max_concurrent_requests,

            snapshot_interval: StdDuration::from_secs(t.snapshot.interval_secs),
            snapshot_iterations: t.snapshot.iterations,

            record_interval: StdDuration::from_secs(t.record.interval_secs),
            record_iterations: t.record.iterations,

            resample_step: Duration::seconds(t.resample.step_secs),
            fill,
            feature_bar: Duration::seconds(t.features.bar_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CollectConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.assets, vec![SeriesAsset::Btc, SeriesAsset::Eth]);
        assert_eq!(config.gamma.base_url, "https://gamma-api.polymarket.com");
        assert_eq!(config.granularity_secs, 300);
        assert_eq!(config.max_candles_per_request, 300);
        assert_eq!(config.snapshot_interval, StdDuration::from_secs(60));
        assert_eq!(config.fill, FillPolicy::Forward);
        assert_eq!(config.resample_step, Duration::seconds(60));
    }

    #[test]
    fn test_empty_toml_matches_defaults() {
        let config = CollectConfig::from_toml_str("").unwrap();
        assert_eq!(config.history_interval, "max");
        assert_eq!(config.trade_limit, 100);
        assert_eq!(config.coinbase_call_delay, StdDuration::from_millis(200));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml = r#"
            [general]
            log_level = "debug"
            assets = ["btc"]

            [coinbase]
            max_concurrent_requests = 2

            [resample]
            step_secs = 300
            fill = "linear"
        "#;
        let config = CollectConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.assets, vec![SeriesAsset::Btc]);
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.resample_step, Duration::seconds(300));
        assert_eq!(config.fill, FillPolicy::Linear);
        // Untouched sections keep defaults.
        assert_eq!(config.snapshot_iterations, 0);
        assert_eq!(config.clob.base_url, "https://clob.polymarket.com");
    }

    #[test]
    fn test_unknown_asset_is_skipped() {
        let toml = r#"
            [general]
            assets = ["btc", "doge"]
        "#;
        let config = CollectConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.assets, vec![SeriesAsset::Btc]);
    }

    #[test]
    fn test_unknown_fill_falls_back() {
        let toml = r#"
            [resample]
            fill = "cubic"
        "#;
        let config = CollectConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.fill, FillPolicy::Forward);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = CollectConfig::default();
        config.apply_overrides(Some("trace"), Some(Path::new("/tmp/updown")));
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/updown"));

        config.apply_overrides(None, None);
        assert_eq!(config.log_level, "trace");
    }
}
