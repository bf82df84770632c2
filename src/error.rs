//! Error types shared by the inference and governance paths.

use std::fmt;
use std::time::Duration;

/// Result alias used across the library.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// How an error should be presented to an inference caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request itself is malformed or cannot be shaped into features.
    BadInput,
    /// Artifacts, thresholds or the classifier are not in a usable state.
    Misconfiguration,
    /// No model is currently loaded, or an external collaborator failed.
    Unavailable,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::BadInput => "bad_input",
            ErrorClass::Misconfiguration => "misconfiguration",
            ErrorClass::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Failure modes of scoring, calibration, comparison and promotion.
///
/// Offline failures abort only the run that raised them. Inference failures are scoped to
/// a single request or row and never touch the published model.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A required artifact (schema, encoder, thresholds, model) is absent for a version.
    #[error("artifact '{artifact}' missing for model version {version}")]
    ArtifactMissing { version: u64, artifact: String },

    /// An artifact exists but cannot be decoded into the expected contract.
    #[error("artifact '{artifact}' for model version {version} is malformed: {detail}")]
    MalformedArtifact {
        version: u64,
        artifact: String,
        detail: String,
    },

    /// Transformed row width disagrees with the profile's feature columns.
    #[error("feature mismatch: expected {expected} columns, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    /// A request row could not be interpreted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persisted thresholds violate `threshold_low <= threshold_high`.
    #[error("invalid thresholds for {model_version}: low={low} > high={high}")]
    InvalidThresholds {
        model_version: String,
        low: f64,
        high: f64,
    },

    /// Labels contain a single class, so ROC/PR curves are undefined.
    #[error("insufficient label diversity: {positives} positive / {negatives} negative rows")]
    InsufficientLabelDiversity { positives: usize, negatives: usize },

    /// The shared evaluation slice has no rows after cutoff filtering.
    #[error("empty evaluation slice after cutoff {cutoff}")]
    EmptyEvaluationSlice { cutoff: String },

    /// Fewer than two model versions are registered.
    #[error("need at least two model versions to compare, found {found}")]
    NotEnoughVersions { found: usize },

    /// Scoring was requested before any model was hydrated.
    #[error("no active model has been hydrated")]
    NoActiveModel,

    /// The classifier capability failed.
    #[error("classifier failure: {0}")]
    Classifier(String),

    /// The registry capability failed.
    #[error("registry failure: {0}")]
    Registry(String),

    /// An offline job exceeded its coarse timeout.
    #[error("{job} timed out after {timeout:?}")]
    JobTimedOut { job: String, timeout: Duration },

    /// An offline job's worker task died before reporting a result.
    #[error("{job} failed: {detail}")]
    JobFailed { job: String, detail: String },
}

impl PipelineError {
    /// Classification surfaced to inference callers.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::FeatureMismatch { .. } | PipelineError::InvalidInput(_) => {
                ErrorClass::BadInput
            }
            PipelineError::ArtifactMissing { .. }
            | PipelineError::MalformedArtifact { .. }
            | PipelineError::InvalidThresholds { .. }
            | PipelineError::InsufficientLabelDiversity { .. }
            | PipelineError::EmptyEvaluationSlice { .. }
            | PipelineError::NotEnoughVersions { .. } => ErrorClass::Misconfiguration,
            PipelineError::NoActiveModel
            | PipelineError::Classifier(_)
            | PipelineError::Registry(_)
            | PipelineError::JobTimedOut { .. }
            | PipelineError::JobFailed { .. } => ErrorClass::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let mismatch = PipelineError::FeatureMismatch {
            expected: 10,
            found: 9,
        };
        assert_eq!(mismatch.class(), ErrorClass::BadInput);

        let missing = PipelineError::ArtifactMissing {
            version: 3,
            artifact: "artifacts/schema.json".to_string(),
        };
        assert_eq!(missing.class(), ErrorClass::Misconfiguration);
        assert_eq!(PipelineError::NoActiveModel.class(), ErrorClass::Unavailable);
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::InsufficientLabelDiversity {
            positives: 0,
            negatives: 12,
        };
        assert_eq!(
            err.to_string(),
            "insufficient label diversity: 0 positive / 12 negative rows"
        );
        assert_eq!(ErrorClass::BadInput.to_string(), "bad_input");

        let timed_out = PipelineError::JobTimedOut {
            job: "governance job".to_string(),
            timeout: Duration::from_millis(150),
        };
        assert_eq!(timed_out.to_string(), "governance job timed out after 150ms");
    }
}
