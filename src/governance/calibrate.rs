//! Threshold calibration from one precision-recall curve.
//!
//! Three independent searches: the F1-optimal cutoff (diagnostic), the smallest cutoff
//! whose false-positive rate stays under a cap (BLOCK boundary) and the most precise
//! cutoff reaching a recall target (REVIEW boundary).

use super::curve::{CurvePoint, PrCurve};
use super::VersionEvaluator;
use crate::error::PipelineResult;
use crate::registry::put_json;
use crate::types::artifact::{paths, ThresholdSet};
use tracing::{info, warn};

const F1_EPSILON: f64 = 1e-12;
const FPR_EPSILON: f64 = 1e-12;

/// Raw output of the three searches
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedThresholds {
    pub th_f1: f64,
    /// `None` when no cutoff satisfies the FPR cap
    pub th_fpr_cap: Option<f64>,
    pub th_recall: f64,
}

impl CalibratedThresholds {
    /// REVIEW at the recall-targeted cutoff, BLOCK at the FPR-capped one
    pub fn into_threshold_set(self, fpr_cap: f64, model_version: impl Into<String>) -> ThresholdSet {
        ThresholdSet {
            th_low: self.th_recall,
            th_high: self.th_fpr_cap,
            th_f1: Some(self.th_f1),
            fpr_cap,
            model_version: model_version.into(),
        }
    }
}

/// Calibrate thresholds. Both classes must be present in `labels`.
pub fn calibrate(
    labels: &[u8],
    scores: &[f64],
    fpr_cap: f64,
    recall_target: f64,
) -> PipelineResult<CalibratedThresholds> {
    let curve = PrCurve::compute(labels, scores)?;
    let points = curve.operating_points();

    // first maximum in ascending-threshold order
    let f1 = |p: &CurvePoint| {
        2.0 * p.precision * p.recall / (p.precision + p.recall + F1_EPSILON)
    };
    let mut best = 0;
    for (i, p) in points.iter().enumerate() {
        if f1(p) > f1(&points[best]) {
            best = i;
        }
    }
    let th_f1 = points[best].threshold;

    // points cover every distinct score ascending, with FP counted at `score >= t`
    let negatives = curve.negatives as f64;
    let th_fpr_cap = points
        .iter()
        .find(|p| p.false_positives as f64 / (negatives + FPR_EPSILON) <= fpr_cap)
        .map(|p| p.threshold);

    let mut th_recall = None;
    let mut best_precision = f64::NEG_INFINITY;
    for p in points.iter().filter(|p| p.recall >= recall_target) {
        if p.precision > best_precision {
            best_precision = p.precision;
            th_recall = Some(p.threshold);
        }
    }
    let th_recall = th_recall.unwrap_or(th_f1);

    Ok(CalibratedThresholds {
        th_f1,
        th_fpr_cap,
        th_recall,
    })
}

/// Score a version's own holdout with its own profile, calibrate, and persist the
/// thresholds alongside the version. Nothing is written if any step fails.
pub fn calibrate_version(
    evaluator: &VersionEvaluator,
    version: u64,
    fpr_cap: f64,
    recall_target: f64,
) -> PipelineResult<ThresholdSet> {
    let manifest = evaluator.manifest(version)?;
    let holdout = evaluator.holdout(version)?;
    let labels: Vec<u8> = holdout.iter().map(|r| r.label()).collect();
    let scores = evaluator.score(version, &holdout)?;

    let calibrated = calibrate(&labels, &scores, fpr_cap, recall_target)?;
    let thresholds = calibrated
        .into_threshold_set(fpr_cap, manifest.model_version)
        .validated()?;

    if thresholds.th_high.is_none() {
        warn!(
            registry_version = version,
            fpr_cap = fpr_cap,
            "No cutoff satisfies the FPR cap; threshold_high left undefined"
        );
    }

    put_json(
        evaluator.registry(),
        version,
        paths::THRESHOLDS,
        &thresholds.to_artifact(),
    )?;

    info!(
        registry_version = version,
        rows = labels.len(),
        th_low = thresholds.th_low,
        th_high = ?thresholds.th_high,
        th_f1 = calibrated.th_f1,
        "Thresholds calibrated"
    );
    Ok(thresholds)
}
