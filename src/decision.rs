//! Tri-state decisioning from a fraud probability and two thresholds.
//!
//! `th_low <= th_high` is a configuration invariant checked when thresholds are loaded
//! ([`ThresholdSet::validated`]), not a runtime branch here.

use crate::types::artifact::ThresholdSet;
use crate::types::decision::Decision;

/// `score < th_low` → ALLOW, `th_low <= score < th_high` → REVIEW, `score >= th_high` → BLOCK
pub fn decide(score: f64, th_low: f64, th_high: f64) -> Decision {
    if score >= th_high {
        Decision::Block
    } else if score >= th_low {
        Decision::Review
    } else {
        Decision::Allow
    }
}

/// Decide a batch of scores
pub fn decide_batch(scores: &[f64], th_low: f64, th_high: f64) -> Vec<Decision> {
    scores.iter().map(|&s| decide(s, th_low, th_high)).collect()
}

impl ThresholdSet {
    /// Decide with this version's thresholds. An undefined BLOCK threshold disables BLOCK.
    pub fn decide(&self, score: f64) -> Decision {
        decide(score, self.th_low, self.th_high.unwrap_or(f64::INFINITY))
    }
}
