//! Per-transaction explanations.
//!
//! The default [`AblationExplainer`] substitutes one feature at a time with its training
//! median and re-scores; the drop in P(fraud) is that feature's contribution. Cost is
//! rows × features classifier evaluations, the dominant cost of the service. Each row's
//! perturbations go to the classifier as a single batch and rows are spread across the
//! rayon pool.

use crate::error::PipelineResult;
use crate::feature_transformer::FeatureRow;
use crate::models::classifier::{fraud_probability, Classifier};
use crate::types::artifact::ArtifactProfile;
use crate::types::decision::{Direction, Explanation, Reason};
use rayon::prelude::*;
use tracing::debug;

const STD_EPSILON: f64 = 1e-9;

/// Attribution method. Alternative methods (e.g. Shapley sampling) plug in here
/// without touching decisioning.
pub trait Explainer: Send + Sync {
    /// Explain each row; output order matches `rows`.
    fn explain(
        &self,
        rows: &[FeatureRow],
        profile: &ArtifactProfile,
        classifier: &dyn Classifier,
        top_k: usize,
    ) -> PipelineResult<Vec<Explanation>>;
}

/// Per-column (mean, std) used for z-score context
#[derive(Debug, Clone, PartialEq)]
pub struct NumericStats {
    stats: Vec<(f64, f64)>,
}

impl NumericStats {
    /// Estimate from a sample; with no sample every column falls back to (median, 1.0)
    pub fn fit(profile: &ArtifactProfile, sample: &[FeatureRow]) -> Self {
        let stats = profile
            .feature_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let values: Vec<f64> = sample
                    .iter()
                    .filter_map(|row| row.get(idx).copied())
                    .filter(|v| v.is_finite())
                    .collect();
                if values.is_empty() {
                    return (profile.median(column), 1.0);
                }
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (mean, variance.sqrt() + STD_EPSILON)
            })
            .collect();
        Self { stats }
    }

    pub fn z_score(&self, idx: usize, value: f64) -> f64 {
        let (mean, std) = self.stats.get(idx).copied().unwrap_or((0.0, 1.0));
        let std = if std > 0.0 { std } else { 1.0 };
        (value - mean) / std
    }
}

/// Leave-one-out ablation against training medians
#[derive(Debug, Clone, Default)]
pub struct AblationExplainer;

impl AblationExplainer {
    pub fn new() -> Self {
        Self
    }

    fn explain_row(
        &self,
        row: &FeatureRow,
        profile: &ArtifactProfile,
        classifier: &dyn Classifier,
        stats: &NumericStats,
        top_k: usize,
    ) -> PipelineResult<Explanation> {
        // batch[0] is the row itself, batch[i + 1] has column i replaced by its baseline
        let mut batch = Vec::with_capacity(profile.width() + 1);
        batch.push(row.clone());
        for (idx, column) in profile.feature_columns.iter().enumerate() {
            let mut perturbed = row.clone();
            perturbed[idx] = profile.median(column);
            batch.push(perturbed);
        }

        let scores = fraud_probability(classifier, &batch)?;
        let base_score = scores[0];

        let mut reasons: Vec<Reason> = profile
            .feature_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let delta = base_score - scores[idx + 1];
                Reason {
                    feature: column.clone(),
                    delta_score: delta,
                    direction: Direction::from_delta(delta),
                    z_score: stats.z_score(idx, row[idx]),
                }
            })
            .filter(|r| r.delta_score > 0.0)
            .collect();

        reasons.sort_by(|a, b| b.delta_score.total_cmp(&a.delta_score));
        reasons.truncate(top_k);

        Ok(Explanation {
            base_score,
            reasons,
        })
    }
}

impl Explainer for AblationExplainer {
    fn explain(
        &self,
        rows: &[FeatureRow],
        profile: &ArtifactProfile,
        classifier: &dyn Classifier,
        top_k: usize,
    ) -> PipelineResult<Vec<Explanation>> {
        let stats = NumericStats::fit(profile, rows);

        debug!(
            rows = rows.len(),
            features = profile.width(),
            evaluations = rows.len() * (profile.width() + 1),
            "Running ablation explanations"
        );

        rows.par_iter()
            .map(|row| self.explain_row(row, profile, classifier, &stats, top_k))
            .collect()
    }
}
