//! Offline governance: training-window preparation, threshold calibration and
//! champion/challenger comparison with alias promotion.

pub mod calibrate;
pub mod compare;
pub mod curve;
pub mod job;
pub mod promote;
pub mod window;

pub use calibrate::{calibrate, calibrate_version, CalibratedThresholds};
pub use compare::{compare, select_pair, EvaluationMetrics, Comparison};
pub use job::{GovernanceJob, JobOutcome};
pub use promote::{PromotionOutcome, Promoter};
pub use window::{prepare_window, PreparedWindow, SkipReason, WindowOutcome};

use crate::error::PipelineResult;
use crate::feature_transformer::{FeatureRow, FeatureTransformer};
use crate::models::classifier::{fraud_probability, ClassifierFactory};
use crate::registry::{fetch_json, load_profile, ModelRegistry};
use crate::types::artifact::{paths, Manifest};
use crate::types::transaction::LabeledTransaction;
use std::sync::Arc;

/// Scores labeled rows with a given version's own profile and classifier
pub struct VersionEvaluator {
    registry: Arc<dyn ModelRegistry>,
    factory: Arc<dyn ClassifierFactory>,
    transformer: FeatureTransformer,
}

impl VersionEvaluator {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        factory: Arc<dyn ClassifierFactory>,
        transformer: FeatureTransformer,
    ) -> Self {
        Self {
            registry,
            factory,
            transformer,
        }
    }

    pub fn registry(&self) -> &dyn ModelRegistry {
        self.registry.as_ref()
    }

    pub fn transformer(&self) -> &FeatureTransformer {
        &self.transformer
    }

    pub fn manifest(&self, version: u64) -> PipelineResult<Manifest> {
        fetch_json(self.registry(), version, paths::MANIFEST)
    }

    /// Labeled out-of-time holdout recorded when the version was trained
    pub fn holdout(&self, version: u64) -> PipelineResult<Vec<LabeledTransaction>> {
        fetch_json(self.registry(), version, paths::HOLDOUT)
    }

    /// P(fraud) per row. Any row that cannot be shaped fails the whole evaluation.
    pub fn score(&self, version: u64, rows: &[LabeledTransaction]) -> PipelineResult<Vec<f64>> {
        let profile = load_profile(self.registry(), version)?;
        let model_bytes = self.registry.download_artifact(version, paths::MODEL)?;
        let classifier = self.factory.build(version, &model_bytes)?;

        let features: Vec<FeatureRow> = rows
            .iter()
            .map(|row| self.transformer.transform_row(&row.transaction, &profile))
            .collect::<PipelineResult<_>>()?;

        fraud_probability(classifier.as_ref(), &features)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn test_score_with_own_profile() {
        let registry = Arc::new(InMemoryRegistry::new());
        store_model(registry.as_ref(), 1, 1.0, 0.0);
        let rows = vec![row(1, 10, 0.0, false), row(2, 10, 2.0, true)];
        store_holdout(registry.as_ref(), 1, 5, &rows);

        let evaluator = evaluator(registry);
        let holdout = evaluator.holdout(1).unwrap();
        assert_eq!(holdout.len(), 2);
        assert_eq!(evaluator.manifest(1).unwrap().model_version, "v1");

        let scores = evaluator.score(1, &holdout).unwrap();
        assert!((scores[0] - 0.5).abs() < 1e-12);
        assert!(scores[1] > 0.85);
    }
}
