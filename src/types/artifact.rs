//! Per-version artifact contract: schema, encoder, thresholds and manifest blobs,
//! and the immutable profile assembled from them.

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Artifact paths inside a model version
pub mod paths {
    pub const SCHEMA: &str = "artifacts/schema.json";
    pub const ENCODERS: &str = "artifacts/encoders.json";
    pub const THRESHOLDS: &str = "artifacts/thresholds.json";
    pub const MANIFEST: &str = "artifacts/manifest.json";
    pub const HOLDOUT: &str = "artifacts/holdout_raw.json";
    pub const MODEL: &str = "model/model.onnx";
}

/// Ordinal code assigned to categories never seen at fit time
pub const UNKNOWN_CODE: f64 = -1.0;

/// Fitted ordinal encoder. Each column's categories are stored sorted; a value's
/// code is its index in that list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    /// Encoded columns, in fit order
    pub columns: Vec<String>,
    /// Sorted known categories per column
    pub categories: BTreeMap<String, Vec<String>>,
}

impl CategoricalEncoder {
    /// Fit from observed values per column. Categories are deduplicated and sorted.
    pub fn fit<'a, I>(columns: &[String], values: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut categories: BTreeMap<String, Vec<String>> = columns
            .iter()
            .map(|c| (c.clone(), Vec::new()))
            .collect();

        for (column, value) in values {
            if let Some(known) = categories.get_mut(column) {
                known.push(value.to_string());
            }
        }
        for known in categories.values_mut() {
            known.sort();
            known.dedup();
        }

        Self {
            columns: columns.to_vec(),
            categories,
        }
    }

    /// Ordinal code for a value; unseen values and unknown columns map to -1
    pub fn encode(&self, column: &str, value: &str) -> f64 {
        self.categories
            .get(column)
            .and_then(|known| known.binary_search_by(|k| k.as_str().cmp(value)).ok())
            .map(|idx| idx as f64)
            .unwrap_or(UNKNOWN_CODE)
    }
}

/// Persisted schema blob: `feature_columns`, `medians`, `clipping_bounds`.
///
/// Older artifacts named these `schema`/`feature_schema` and `feature_medians`; those keys
/// are still accepted as a deprecated compatibility shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaArtifact {
    #[serde(alias = "schema", alias = "feature_schema")]
    pub feature_columns: Vec<String>,
    #[serde(alias = "feature_medians")]
    pub medians: HashMap<String, f64>,
    #[serde(default)]
    pub clipping_bounds: BTreeMap<String, [f64; 2]>,
}

/// Immutable per-version bundle used to shape raw rows into feature vectors
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactProfile {
    pub feature_columns: Vec<String>,
    pub medians: HashMap<String, f64>,
    pub clip_bounds: BTreeMap<String, (f64, f64)>,
    pub categorical_encoder: CategoricalEncoder,
}

impl ArtifactProfile {
    /// Assemble a profile, rejecting duplicate feature columns
    pub fn new(
        feature_columns: Vec<String>,
        medians: HashMap<String, f64>,
        clip_bounds: BTreeMap<String, (f64, f64)>,
        categorical_encoder: CategoricalEncoder,
    ) -> PipelineResult<Self> {
        let mut seen = std::collections::HashSet::with_capacity(feature_columns.len());
        if let Some(dup) = feature_columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(PipelineError::InvalidInput(format!(
                "duplicate feature column '{dup}'"
            )));
        }
        Ok(Self {
            feature_columns,
            medians,
            clip_bounds,
            categorical_encoder,
        })
    }

    /// Build from decoded schema and encoder blobs
    pub fn from_artifacts(
        version: u64,
        schema: SchemaArtifact,
        encoder: CategoricalEncoder,
    ) -> PipelineResult<Self> {
        let clip_bounds = schema
            .clipping_bounds
            .into_iter()
            .map(|(col, [lower, upper])| (col, (lower, upper)))
            .collect();
        Self::new(schema.feature_columns, schema.medians, clip_bounds, encoder).map_err(|e| {
            PipelineError::MalformedArtifact {
                version,
                artifact: paths::SCHEMA.to_string(),
                detail: e.to_string(),
            }
        })
    }

    /// Schema blob for persistence
    pub fn to_schema_artifact(&self) -> SchemaArtifact {
        SchemaArtifact {
            feature_columns: self.feature_columns.clone(),
            medians: self.medians.clone(),
            clipping_bounds: self
                .clip_bounds
                .iter()
                .map(|(col, &(lower, upper))| (col.clone(), [lower, upper]))
                .collect(),
        }
    }

    /// Training median for a column, 0.0 if none was learned
    pub fn median(&self, column: &str) -> f64 {
        self.medians.get(column).copied().unwrap_or(0.0)
    }

    pub fn width(&self) -> usize {
        self.feature_columns.len()
    }
}

/// Persisted threshold blob. `threshold_high` is null when no cutoff met the FPR cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdArtifact {
    pub model_version: String,
    pub threshold_low: f64,
    pub threshold_high: Option<f64>,
    pub fpr_cap: f64,
}

/// Thresholds read at inference time for one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub th_low: f64,
    /// BLOCK boundary; `None` disables the BLOCK tier
    pub th_high: Option<f64>,
    /// Diagnostic only, never used for decisions
    pub th_f1: Option<f64>,
    pub fpr_cap: f64,
    pub model_version: String,
}

impl ThresholdSet {
    /// Validate `th_low <= th_high`; a violation is a configuration error
    pub fn validated(self) -> PipelineResult<Self> {
        if let Some(high) = self.th_high {
            if self.th_low > high {
                return Err(PipelineError::InvalidThresholds {
                    model_version: self.model_version,
                    low: self.th_low,
                    high,
                });
            }
        }
        Ok(self)
    }

    pub fn to_artifact(&self) -> ThresholdArtifact {
        ThresholdArtifact {
            model_version: self.model_version.clone(),
            threshold_low: self.th_low,
            threshold_high: self.th_high,
            fpr_cap: self.fpr_cap,
        }
    }
}

impl From<ThresholdArtifact> for ThresholdSet {
    fn from(artifact: ThresholdArtifact) -> Self {
        Self {
            th_low: artifact.threshold_low,
            th_high: artifact.threshold_high,
            th_f1: None,
            fpr_cap: artifact.fpr_cap,
            model_version: artifact.model_version,
        }
    }
}

/// Training manifest recorded alongside each version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    /// Out-of-time split cutoff; holdout rows are at or after it
    pub cutoff_time: DateTime<Utc>,
    pub train_size: usize,
    pub test_size: usize,
    pub feature_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_fit_and_encode() {
        let columns = vec!["country_code".to_string()];
        let encoder = CategoricalEncoder::fit(
            &columns,
            vec![
                ("country_code", "VN"),
                ("country_code", "KR"),
                ("country_code", "VN"),
                ("other", "x"),
            ],
        );

        assert_eq!(encoder.categories["country_code"], vec!["KR", "VN"]);
        assert_eq!(encoder.encode("country_code", "KR"), 0.0);
        assert_eq!(encoder.encode("country_code", "VN"), 1.0);
        assert_eq!(encoder.encode("country_code", "JP"), UNKNOWN_CODE);
        assert_eq!(encoder.encode("missing_col", "VN"), UNKNOWN_CODE);
    }

    #[test]
    fn test_schema_compat_keys() {
        let json = r#"{
            "schema": ["deposit_amount", "amount_type"],
            "feature_medians": {"deposit_amount": 1200000.0}
        }"#;
        let schema: SchemaArtifact = serde_json::from_str(json).unwrap();

        assert_eq!(schema.feature_columns.len(), 2);
        assert!(schema.clipping_bounds.is_empty());

        let profile =
            ArtifactProfile::from_artifacts(1, schema, CategoricalEncoder::default()).unwrap();
        assert_eq!(profile.median("deposit_amount"), 1_200_000.0);
        assert_eq!(profile.median("amount_type"), 0.0);
    }

    #[test]
    fn test_duplicate_feature_columns_rejected() {
        let result = ArtifactProfile::new(
            vec!["a".to_string(), "a".to_string()],
            HashMap::new(),
            BTreeMap::new(),
            CategoricalEncoder::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_threshold_validation() {
        let bad = ThresholdSet {
            th_low: 0.8,
            th_high: Some(0.4),
            th_f1: None,
            fpr_cap: 0.01,
            model_version: "v3".to_string(),
        };
        assert!(matches!(
            bad.validated(),
            Err(PipelineError::InvalidThresholds { .. })
        ));

        let no_block = ThresholdSet {
            th_low: 0.8,
            th_high: None,
            th_f1: None,
            fpr_cap: 0.0,
            model_version: "v3".to_string(),
        };
        assert!(no_block.validated().is_ok());
    }

    #[test]
    fn test_threshold_artifact_null_high() {
        let json = r#"{"model_version":"v9","threshold_low":0.3,"threshold_high":null,"fpr_cap":0.0}"#;
        let artifact: ThresholdArtifact = serde_json::from_str(json).unwrap();
        let set = ThresholdSet::from(artifact);
        assert_eq!(set.th_high, None);
        assert_eq!(set.th_low, 0.3);
    }
}
