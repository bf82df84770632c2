//! Decision, explanation and scoring request/response structures

use crate::error::ErrorClass;
use crate::types::transaction::RawTransaction;
use serde::{Deserialize, Serialize};

/// Three-way decision tier. Ordering is ALLOW < REVIEW < BLOCK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Review,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Review => "REVIEW",
            Decision::Block => "BLOCK",
        }
    }
}

/// Sign of a feature's contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    IncreasesRisk,
    DecreasesRisk,
}

impl Direction {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::IncreasesRisk
        } else {
            Direction::DecreasesRisk
        }
    }
}

/// One ranked contributing feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub feature: String,
    pub delta_score: f64,
    pub direction: Direction,
    pub z_score: f64,
}

/// Explanation for a single row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub base_score: f64,
    pub reasons: Vec<Reason>,
}

/// Scoring request: one or many raw rows plus explanation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub transactions: Vec<RawTransaction>,
    /// Explain ALLOW rows too (non-ALLOW rows are always explained)
    #[serde(default)]
    pub include_allow_explanations: Option<bool>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl ScoreRequest {
    pub fn single(transaction: RawTransaction) -> Self {
        Self {
            transactions: vec![transaction],
            include_allow_explanations: None,
            top_k: None,
        }
    }
}

/// Per-row scoring result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub transaction_seq: i64,
    pub score: f64,
    pub decision: Decision,
    pub threshold_low: f64,
    pub threshold_high: Option<f64>,
    pub model_version: String,
    pub reasons: Vec<Reason>,
}

/// A row that could not be scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub transaction_seq: i64,
    pub error_class: ErrorClass,
    pub message: String,
}

/// Scoring response for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub request_id: String,
    pub model_version: String,
    pub registry_version: u64,
    pub results: Vec<ScoredRow>,
    pub rejected: Vec<RejectedRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ordering() {
        assert!(Decision::Allow < Decision::Review);
        assert!(Decision::Review < Decision::Block);
        assert_eq!(
            serde_json::to_string(&Decision::Review).unwrap(),
            "\"REVIEW\""
        );
    }

    #[test]
    fn test_score_request_defaults() {
        let json = r#"{"transactions": [{"transaction_seq": 1, "deposit_amount": 10.0}]}"#;
        let req: ScoreRequest = serde_json::from_str(json).unwrap();

        assert_eq!(req.transactions.len(), 1);
        assert_eq!(req.include_allow_explanations, None);
        assert_eq!(req.top_k, None);
    }

    #[test]
    fn test_reason_serialization() {
        let reason = Reason {
            feature: "deposit_amount".to_string(),
            delta_score: 0.12,
            direction: Direction::from_delta(0.12),
            z_score: 2.5,
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["direction"], "increases_risk");
        assert_eq!(json["feature"], "deposit_amount");
    }
}
