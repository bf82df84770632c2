//! Champion/challenger comparison on a shared, leakage-free evaluation slice.

use super::curve::{check_label_diversity, pr_auc, roc_auc};
use super::VersionEvaluator;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_transformer::FeatureTransformer;
use crate::registry::ModelRegistry;
use crate::types::transaction::LabeledTransaction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

const RTOL: f64 = 1e-5;
const ATOL: f64 = 1e-8;

/// Ranking metrics of one version on the shared slice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub version: u64,
    pub pr_auc: f64,
    pub roc_auc: f64,
    pub n_eval: usize,
    pub cutoff_used: DateTime<Utc>,
}

/// Result of comparing two versions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub metrics: [EvaluationMetrics; 2],
    pub winner: u64,
}

/// `|a - b| <= atol + rtol·|b|`
fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Pick the pair to compare as `(candidate, champion)`.
///
/// Without an explicit pair the candidate is the newest version and the champion is the
/// alias holder; when the alias is unset or already on the candidate, the two newest
/// versions are compared.
pub fn select_pair(
    registry: &dyn ModelRegistry,
    alias: &str,
    explicit: Option<[u64; 2]>,
) -> PipelineResult<(u64, u64)> {
    let versions = registry.list_versions()?;

    if let Some([a, b]) = explicit {
        if a == b {
            return Err(PipelineError::InvalidInput(format!(
                "cannot compare version {a} with itself"
            )));
        }
        if let Some(missing) = [a, b].into_iter().find(|v| !versions.contains(v)) {
            return Err(PipelineError::Registry(format!(
                "version {missing} is not registered"
            )));
        }
        return Ok((a, b));
    }

    let mut newest_first = versions;
    newest_first.sort_unstable_by(|a, b| b.cmp(a));
    if newest_first.len() < 2 {
        return Err(PipelineError::NotEnoughVersions {
            found: newest_first.len(),
        });
    }

    let candidate = newest_first[0];
    match registry.get_version_by_alias(alias)? {
        Some(champion) if champion != candidate => {
            info!(candidate = candidate, champion = champion, alias = %alias, "Comparing candidate against alias holder");
            Ok((candidate, champion))
        }
        _ => {
            warn!(alias = %alias, "Alias unset or already on the newest version; comparing the two newest versions");
            Ok((candidate, newest_first[1]))
        }
    }
}

/// Union of both holdouts, restricted to rows at or after `cutoff` and deduplicated by
/// transaction id (first occurrence wins). Rows without a parseable event time are
/// dropped. Fails when the result is empty or single-class.
pub fn build_evaluation_slice(
    transformer: &FeatureTransformer,
    holdouts: [Vec<LabeledTransaction>; 2],
    cutoff: DateTime<Utc>,
) -> PipelineResult<Vec<LabeledTransaction>> {
    let cutoff_naive = cutoff.naive_utc();
    let mut seen = HashSet::new();

    let slice: Vec<LabeledTransaction> = holdouts
        .into_iter()
        .flatten()
        .filter(|row| {
            transformer
                .event_time(&row.transaction)
                .is_some_and(|t| t >= cutoff_naive)
        })
        .filter(|row| seen.insert(row.transaction.transaction_seq))
        .collect();

    if slice.is_empty() {
        return Err(PipelineError::EmptyEvaluationSlice {
            cutoff: cutoff.to_rfc3339(),
        });
    }
    let labels: Vec<u8> = slice.iter().map(LabeledTransaction::label).collect();
    check_label_diversity(&labels)?;
    Ok(slice)
}

/// Higher PR AUC, then higher ROC AUC, then the larger version number
pub fn pick_winner(a: &EvaluationMetrics, b: &EvaluationMetrics) -> u64 {
    if !is_close(a.pr_auc, b.pr_auc) {
        return if a.pr_auc >= b.pr_auc { a.version } else { b.version };
    }
    if !is_close(a.roc_auc, b.roc_auc) {
        return if a.roc_auc >= b.roc_auc { a.version } else { b.version };
    }
    a.version.max(b.version)
}

/// Score both versions on their shared slice, each with its own profile, and pick a
/// winner. Nothing is written.
pub fn compare(evaluator: &VersionEvaluator, a: u64, b: u64) -> PipelineResult<Comparison> {
    let manifest_a = evaluator.manifest(a)?;
    let manifest_b = evaluator.manifest(b)?;
    let cutoff = manifest_a.cutoff_time.max(manifest_b.cutoff_time);

    let holdout_a = evaluator.holdout(a)?;
    let holdout_b = evaluator.holdout(b)?;
    info!(
        version_a = a,
        version_b = b,
        holdout_a = holdout_a.len(),
        holdout_b = holdout_b.len(),
        cutoff_a = %manifest_a.cutoff_time,
        cutoff_b = %manifest_b.cutoff_time,
        "Preparing shared evaluation slice"
    );

    let slice = build_evaluation_slice(evaluator.transformer(), [holdout_a, holdout_b], cutoff)?;
    let labels: Vec<u8> = slice.iter().map(LabeledTransaction::label).collect();

    let evaluate = |version: u64| -> PipelineResult<EvaluationMetrics> {
        let scores = evaluator.score(version, &slice)?;
        Ok(EvaluationMetrics {
            version,
            pr_auc: pr_auc(&labels, &scores)?,
            roc_auc: roc_auc(&labels, &scores)?,
            n_eval: slice.len(),
            cutoff_used: cutoff,
        })
    };
    let metrics_a = evaluate(a)?;
    let metrics_b = evaluate(b)?;
    let winner = pick_winner(&metrics_a, &metrics_b);

    for m in [&metrics_a, &metrics_b] {
        info!(
            version = m.version,
            pr_auc = m.pr_auc,
            roc_auc = m.roc_auc,
            n_eval = m.n_eval,
            cutoff_used = %m.cutoff_used,
            "Evaluation metrics"
        );
    }
    info!(winner = winner, "Comparison complete");

    Ok(Comparison {
        metrics: [metrics_a, metrics_b],
        winner,
    })
}
