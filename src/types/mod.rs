//! Type definitions for the fraud risk pipeline

pub mod artifact;
pub mod decision;
pub mod transaction;

pub use artifact::{ArtifactProfile, CategoricalEncoder, Manifest, ThresholdArtifact, ThresholdSet};
pub use decision::{Decision, Explanation, Reason, ScoreRequest, ScoreResponse, ScoredRow};
pub use transaction::{LabeledTransaction, RawTransaction};
