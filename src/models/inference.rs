//! Inference engine: hydrated model snapshot, batch scoring and explanations

use crate::config::DetectionConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::explain::{AblationExplainer, Explainer};
use crate::feature_transformer::{FeatureRow, FeatureTransformer};
use crate::models::classifier::{fraud_probability, Classifier, ClassifierFactory};
use crate::registry::{fetch_json, load_profile, ModelRegistry};
use crate::types::artifact::{paths, ArtifactProfile, ThresholdArtifact, ThresholdSet};
use crate::types::decision::{Decision, Reason, RejectedRow, ScoreRequest, ScoreResponse, ScoredRow};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to score with one model version. Built completely before it is
/// published and never mutated afterwards.
pub struct ActiveModel {
    /// Registry version number
    pub registry_version: u64,
    /// Human-readable version tag recorded in the threshold artifact
    pub model_version: String,
    pub profile: ArtifactProfile,
    pub classifier: Arc<dyn Classifier>,
    pub thresholds: ThresholdSet,
    pub loaded_at: DateTime<Utc>,
}

/// Health snapshot of the engine
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelStatus {
    pub loaded: bool,
    pub registry_version: Option<u64>,
    pub model_version: Option<String>,
    pub feature_count: usize,
    pub threshold_low: Option<f64>,
    pub threshold_high: Option<f64>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Scores requests against the currently published [`ActiveModel`].
///
/// Scoring clones the snapshot `Arc` once per request, so a concurrent swap never
/// mixes two versions within a response.
pub struct InferenceEngine {
    active: RwLock<Option<Arc<ActiveModel>>>,
    transformer: FeatureTransformer,
    explainer: Box<dyn Explainer>,
    detection: DetectionConfig,
}

impl InferenceEngine {
    /// Create an engine with no model loaded and ablation explanations
    pub fn new(transformer: FeatureTransformer, detection: DetectionConfig) -> Self {
        Self {
            active: RwLock::new(None),
            transformer,
            explainer: Box::new(AblationExplainer::new()),
            detection,
        }
    }

    /// Swap the attribution method
    pub fn with_explainer(mut self, explainer: Box<dyn Explainer>) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn transformer(&self) -> &FeatureTransformer {
        &self.transformer
    }

    /// Publish a fully built model, returning the registry version it replaced
    pub fn publish(&self, model: ActiveModel) -> Option<u64> {
        let model = Arc::new(model);
        let previous = self.active.write().replace(Arc::clone(&model));
        let previous_version = previous.map(|m| m.registry_version);

        info!(
            previous = ?previous_version,
            registry_version = model.registry_version,
            model_version = %model.model_version,
            features = model.profile.width(),
            threshold_low = model.thresholds.th_low,
            threshold_high = ?model.thresholds.th_high,
            "Active model published"
        );
        previous_version
    }

    /// Current snapshot, if any
    pub fn active(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().clone()
    }

    pub fn status(&self) -> ModelStatus {
        match self.active() {
            Some(model) => ModelStatus {
                loaded: true,
                registry_version: Some(model.registry_version),
                model_version: Some(model.model_version.clone()),
                feature_count: model.profile.width(),
                threshold_low: Some(model.thresholds.th_low),
                threshold_high: model.thresholds.th_high,
                loaded_at: Some(model.loaded_at),
            },
            None => ModelStatus {
                loaded: false,
                registry_version: None,
                model_version: None,
                feature_count: 0,
                threshold_low: None,
                threshold_high: None,
                loaded_at: None,
            },
        }
    }

    /// Score a request.
    ///
    /// Rows that cannot be shaped into features are returned in `rejected` with their
    /// error class; the rest are scored, decided and explained per the request policy.
    /// A missing model or classifier failure fails the whole request.
    pub fn score(&self, request: &ScoreRequest) -> PipelineResult<ScoreResponse> {
        let model = self.active().ok_or(PipelineError::NoActiveModel)?;
        let top_k = request.top_k.unwrap_or(self.detection.top_k);
        let include_allow = request
            .include_allow_explanations
            .unwrap_or(self.detection.include_allow_explanations);

        let mut seqs = Vec::with_capacity(request.transactions.len());
        let mut rows: Vec<FeatureRow> = Vec::with_capacity(request.transactions.len());
        let mut rejected = Vec::new();

        for tx in &request.transactions {
            match self.transformer.transform_row(tx, &model.profile) {
                Ok(row) => {
                    seqs.push(tx.transaction_seq);
                    rows.push(row);
                }
                Err(e) => {
                    warn!(transaction_seq = tx.transaction_seq, error = %e, "Rejecting row");
                    rejected.push(RejectedRow {
                        transaction_seq: tx.transaction_seq,
                        error_class: e.class(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let scores = fraud_probability(model.classifier.as_ref(), &rows)?;
        let decisions: Vec<Decision> = scores.iter().map(|&s| model.thresholds.decide(s)).collect();

        let explain_idx: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| include_allow || **d != Decision::Allow)
            .map(|(i, _)| i)
            .collect();

        let mut reasons: Vec<Vec<Reason>> = vec![Vec::new(); rows.len()];
        if top_k > 0 && !explain_idx.is_empty() {
            let to_explain: Vec<FeatureRow> = explain_idx.iter().map(|&i| rows[i].clone()).collect();
            let explanations = self.explainer.explain(
                &to_explain,
                &model.profile,
                model.classifier.as_ref(),
                top_k,
            )?;
            for (idx, explanation) in explain_idx.into_iter().zip(explanations) {
                reasons[idx] = explanation.reasons;
            }
        }

        let results: Vec<ScoredRow> = seqs
            .into_iter()
            .zip(scores)
            .zip(decisions)
            .zip(reasons)
            .map(|(((transaction_seq, score), decision), reasons)| ScoredRow {
                transaction_seq,
                score,
                decision,
                threshold_low: model.thresholds.th_low,
                threshold_high: model.thresholds.th_high,
                model_version: model.model_version.clone(),
                reasons,
            })
            .collect();

        debug!(
            scored = results.len(),
            rejected = rejected.len(),
            registry_version = model.registry_version,
            "Request scored"
        );

        Ok(ScoreResponse {
            request_id: Uuid::new_v4().to_string(),
            model_version: model.model_version.clone(),
            registry_version: model.registry_version,
            results,
            rejected,
        })
    }
}

/// Loads the version behind an alias from the registry and publishes it.
pub struct Hydrator {
    registry: Arc<dyn ModelRegistry>,
    factory: Arc<dyn ClassifierFactory>,
    alias: String,
}

impl Hydrator {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        factory: Arc<dyn ClassifierFactory>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            factory,
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Build a complete model for a version without publishing it
    pub fn load_version(&self, version: u64) -> PipelineResult<ActiveModel> {
        let profile = load_profile(self.registry.as_ref(), version)?;
        let artifact: ThresholdArtifact =
            fetch_json(self.registry.as_ref(), version, paths::THRESHOLDS)?;
        let thresholds = ThresholdSet::from(artifact).validated()?;
        if thresholds.th_high.is_none() {
            warn!(
                registry_version = version,
                fpr_cap = thresholds.fpr_cap,
                "No BLOCK threshold met the FPR cap; BLOCK tier disabled for this version"
            );
        }

        let model_bytes = self.registry.download_artifact(version, paths::MODEL)?;
        let classifier = self.factory.build(version, &model_bytes)?;

        Ok(ActiveModel {
            registry_version: version,
            model_version: thresholds.model_version.clone(),
            profile,
            classifier,
            thresholds,
            loaded_at: Utc::now(),
        })
    }

    /// Resolve the alias, load its version and publish it. On any failure the engine keeps
    /// serving the previously published model.
    pub fn hydrate(&self, engine: &InferenceEngine) -> PipelineResult<u64> {
        let version = self
            .registry
            .get_version_by_alias(&self.alias)?
            .ok_or_else(|| PipelineError::Registry(format!("alias '{}' is not assigned", self.alias)))?;

        match self.load_version(version) {
            Ok(model) => {
                engine.publish(model);
                Ok(version)
            }
            Err(e) => {
                warn!(
                    alias = %self.alias,
                    registry_version = version,
                    error = %e,
                    "Hydration failed, keeping previous model"
                );
                Err(e)
            }
        }
    }
}
