//! Configuration management for the fraud risk pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which rows clip bounds are learned from when preparing a training window.
///
/// Learning from all rows lets rare fraud outliers widen the bounds meant to flag them;
/// learning from non-fraud rows only avoids that but shifts bounds between windows with
/// different fraud rates. Neither is settled, so both are selectable.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipPopulation {
    #[default]
    All,
    NonFraud,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming score requests
    pub request_subject: String,
    /// Subject for outgoing score responses
    pub response_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            request_subject: "transactions.score".to_string(),
            response_subject: "transactions.decisions".to_string(),
        }
    }
}

/// Model registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Root directory of the filesystem registry
    pub root: PathBuf,
    /// Registered model name
    pub model_name: String,
    /// Alias that designates the live version
    #[serde(default = "default_alias")]
    pub production_alias: String,
}

fn default_alias() -> String {
    "production".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("registry"),
            model_name: "fraud-rf".to_string(),
            production_alias: default_alias(),
        }
    }
}

/// Decisioning and calibration configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Maximum reasons per explained row
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Explain ALLOW rows when the request does not say otherwise
    #[serde(default)]
    pub include_allow_explanations: bool,
    /// False-positive-rate cap for the BLOCK threshold
    #[serde(default = "default_fpr_cap")]
    pub fpr_cap: f64,
    /// Recall target for the REVIEW threshold
    #[serde(default = "default_recall_target")]
    pub recall_target: f64,
}

fn default_top_k() -> usize {
    3
}

fn default_fpr_cap() -> f64 {
    0.01
}

fn default_recall_target() -> f64 {
    0.80
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            include_allow_explanations: false,
            fpr_cap: default_fpr_cap(),
            recall_target: default_recall_target(),
        }
    }
}

/// Fixed (not learned) part of the feature schema
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Categorical columns passed through the fitted encoder
    pub categorical_columns: Vec<String>,
    /// Secondary date columns expanded into calendar features
    pub date_columns: Vec<String>,
    /// Primary event timestamp, also expanded into hour and night flag
    pub event_time_column: String,
    /// Free-text identity columns, dropped before encoding
    pub pii_columns: Vec<String>,
    /// Transaction amount column
    pub amount_column: String,
    /// Substring marking amount-like columns whose clip bounds are learned
    pub amount_marker: String,
    /// Amounts below this are bucket 1
    pub amount_bucket_low: f64,
    /// Amounts above this are bucket 3
    pub amount_bucket_high: f64,
    /// Declared identity name column
    pub identity_name_column: String,
    /// Counterparty name column compared against the identity
    pub counterparty_name_column: String,
    /// Visa expiry column
    pub visa_expiry_column: String,
    /// Registration date column
    pub register_date_column: String,
    /// First activity date column
    pub first_activity_column: String,
    /// Birth date column
    pub birth_date_column: String,
    /// Rolling-window amount limits keyed by window suffix (`24hour`, `1week`, ...)
    pub rolling_limits: BTreeMap<String, f64>,
    /// Fraction of a rolling limit at which the near-limit flag fires
    pub near_limit_ratio: f64,
    /// Far-future placeholder dates treated as missing
    pub sentinel_dates: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let mut rolling_limits = BTreeMap::new();
        rolling_limits.insert("24hour".to_string(), 5_000_000.0);
        rolling_limits.insert("1week".to_string(), 20_000_000.0);
        rolling_limits.insert("1month".to_string(), 50_000_000.0);

        Self {
            categorical_columns: strings(&[
                "receiving_country",
                "country_code",
                "id_type",
                "stay_qualify",
                "payment_method",
            ]),
            date_columns: strings(&[
                "register_date",
                "visa_expire_date",
                "first_transaction_date",
                "birth_date",
                "recheck_date",
                "face_pin_date",
            ]),
            event_time_column: "create_dt".to_string(),
            pii_columns: strings(&[
                "user_name",
                "sender_name",
                "recipient_name",
                "autodebit_account",
                "invite_code",
                "user_seq",
            ]),
            amount_column: "deposit_amount".to_string(),
            amount_marker: "amount".to_string(),
            amount_bucket_low: 1_000_000.0,
            amount_bucket_high: 4_000_000.0,
            identity_name_column: "user_name".to_string(),
            counterparty_name_column: "sender_name".to_string(),
            visa_expiry_column: "visa_expire_date".to_string(),
            register_date_column: "register_date".to_string(),
            first_activity_column: "first_transaction_date".to_string(),
            birth_date_column: "birth_date".to_string(),
            rolling_limits,
            near_limit_ratio: 0.9,
            sentinel_dates: strings(&["9999-01-01", "9999-12-31"]),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently processed requests
    pub workers: usize,
    /// Per-request processing timeout in milliseconds
    pub timeout_ms: u64,
    /// Intra-op threads per ONNX session
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_ms: 1000,
            onnx_threads: default_onnx_threads(),
            metrics_interval_secs: default_metrics_interval(),
        }
    }
}

/// Offline governance (calibration, comparison, promotion) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Run the compare-and-promote job periodically
    pub enabled: bool,
    /// Seconds between job runs
    pub interval_secs: u64,
    /// Coarse timeout after which a run is treated as failed
    pub timeout_secs: u64,
    /// Explicit pair to compare instead of candidate vs. production
    #[serde(default)]
    pub versions: Option<[u64; 2]>,
    /// Out-of-time holdout fraction when preparing a training window
    pub test_ratio: f64,
    /// Population used to learn clip bounds
    #[serde(default)]
    pub clip_population: ClipPopulation,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            timeout_secs: 900,
            versions: None,
            test_ratio: 0.2,
            clip_population: ClipPopulation::All,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.detection.top_k, 3);
        assert_eq!(config.detection.fpr_cap, 0.01);
        assert_eq!(config.registry.production_alias, "production");
        assert_eq!(config.features.categorical_columns.len(), 5);
        assert_eq!(config.governance.clip_population, ClipPopulation::All);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[registry]
root = "/var/lib/fraud/registry"
model_name = "fraud-rf"

[detection]
top_k = 5
fpr_cap = 0.02

[governance]
enabled = false
interval_secs = 60
timeout_secs = 30
test_ratio = 0.25
clip_population = "non_fraud"
versions = [4, 7]
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.detection.top_k, 5);
        assert_eq!(config.detection.recall_target, 0.80);
        assert_eq!(config.registry.production_alias, "production");
        assert_eq!(config.governance.versions, Some([4, 7]));
        assert_eq!(config.governance.clip_population, ClipPopulation::NonFraud);
        assert_eq!(config.pipeline.workers, 4);
    }
}
