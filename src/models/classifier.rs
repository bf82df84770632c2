//! Classifier capability consumed by scoring, explanation and governance

use crate::error::{PipelineError, PipelineResult};
use crate::feature_transformer::FeatureRow;
use std::sync::Arc;

/// Opaque probability-producing classifier.
///
/// `predict` takes rows shaped exactly like the active profile's `feature_columns` and
/// returns P(negative class) per row.
pub trait Classifier: Send + Sync {
    fn predict(&self, rows: &[FeatureRow]) -> PipelineResult<Vec<f64>>;

    /// Row width the model was built for, when it declares one
    fn input_width(&self) -> Option<usize> {
        None
    }
}

/// Builds a classifier from a version's serialized model blob
pub trait ClassifierFactory: Send + Sync {
    fn build(&self, version: u64, model_bytes: &[u8]) -> PipelineResult<Arc<dyn Classifier>>;
}

/// P(fraud) = 1 - P(negative) for each row
pub fn fraud_probability(classifier: &dyn Classifier, rows: &[FeatureRow]) -> PipelineResult<Vec<f64>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(expected) = classifier.input_width() {
        if let Some(row) = rows.iter().find(|r| r.len() != expected) {
            return Err(PipelineError::FeatureMismatch {
                expected,
                found: row.len(),
            });
        }
    }
    let negative = classifier.predict(rows)?;
    if negative.len() != rows.len() {
        return Err(PipelineError::Classifier(format!(
            "classifier returned {} probabilities for {} rows",
            negative.len(),
            rows.len()
        )));
    }
    Ok(negative.into_iter().map(|p| (1.0 - p).clamp(0.0, 1.0)).collect())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic classifiers for tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Logistic model: P(fraud) = sigmoid(bias + Σ w·x)
    pub struct LogisticClassifier {
        pub weights: Vec<f64>,
        pub bias: f64,
        pub calls: AtomicUsize,
    }

    impl LogisticClassifier {
        pub fn new(weights: Vec<f64>, bias: f64) -> Self {
            Self {
                weights,
                bias,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl Classifier for LogisticClassifier {
        fn predict(&self, rows: &[FeatureRow]) -> PipelineResult<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            rows.iter()
                .map(|row| {
                    if row.len() != self.weights.len() {
                        return Err(PipelineError::FeatureMismatch {
                            expected: self.weights.len(),
                            found: row.len(),
                        });
                    }
                    let z: f64 = self.bias + row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>();
                    let fraud = 1.0 / (1.0 + (-z).exp());
                    Ok(1.0 - fraud)
                })
                .collect()
        }

        fn input_width(&self) -> Option<usize> {
            Some(self.weights.len())
        }
    }

    /// Reads `{"weights": [...], "bias": ...}` model blobs into [`LogisticClassifier`]s
    pub struct LogisticFactory;

    impl LogisticFactory {
        pub fn blob(weights: &[f64], bias: f64) -> Vec<u8> {
            serde_json::to_vec(&serde_json::json!({ "weights": weights, "bias": bias }))
                .unwrap()
        }
    }

    impl ClassifierFactory for LogisticFactory {
        fn build(&self, version: u64, model_bytes: &[u8]) -> PipelineResult<Arc<dyn Classifier>> {
            #[derive(serde::Deserialize)]
            struct Blob {
                weights: Vec<f64>,
                bias: f64,
            }
            let blob: Blob =
                serde_json::from_slice(model_bytes).map_err(|e| PipelineError::MalformedArtifact {
                    version,
                    artifact: crate::types::artifact::paths::MODEL.to_string(),
                    detail: e.to_string(),
                })?;
            Ok(Arc::new(LogisticClassifier::new(blob.weights, blob.bias)))
        }
    }

    /// Uses the first feature directly as P(fraud)
    pub struct FirstFeatureClassifier;

    impl Classifier for FirstFeatureClassifier {
        fn predict(&self, rows: &[FeatureRow]) -> PipelineResult<Vec<f64>> {
            Ok(rows
                .iter()
                .map(|row| 1.0 - row.first().copied().unwrap_or(0.0).clamp(0.0, 1.0))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    struct ShortClassifier;

    impl Classifier for ShortClassifier {
        fn predict(&self, _rows: &[FeatureRow]) -> PipelineResult<Vec<f64>> {
            Ok(vec![0.5])
        }
    }

    #[test]
    fn test_fraud_probability_inverts_negative_class() {
        let rows = vec![vec![0.2], vec![0.9]];
        let scores = fraud_probability(&FirstFeatureClassifier, &rows).unwrap();
        assert!((scores[0] - 0.2).abs() < 1e-12);
        assert!((scores[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_classifier_error() {
        let rows = vec![vec![0.2], vec![0.9]];
        let err = fraud_probability(&ShortClassifier, &rows).unwrap_err();
        assert!(matches!(err, PipelineError::Classifier(_)));
    }

    #[test]
    fn test_factory_builds_from_blob() {
        let model = LogisticFactory
            .build(1, &LogisticFactory::blob(&[1.0, -1.0], 0.0))
            .unwrap();
        let scores = fraud_probability(model.as_ref(), &[vec![0.0, 0.0]]).unwrap();
        assert!((scores[0] - 0.5).abs() < 1e-12);

        assert!(matches!(
            LogisticFactory.build(1, b"garbage"),
            Err(PipelineError::MalformedArtifact { version: 1, .. })
        ));
    }

    #[test]
    fn test_width_mismatch_rejected_before_predict() {
        let model = LogisticClassifier::new(vec![1.0, -1.0], 0.0);
        let err = fraud_probability(&model, &[vec![0.1, 0.2], vec![0.1, 0.2, 0.3]]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FeatureMismatch {
                expected: 2,
                found: 3
            }
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_empty_batch_skips_classifier() {
        let model = LogisticClassifier::new(vec![1.0], 0.0);
        assert!(fraud_probability(&model, &[]).unwrap().is_empty());
        assert_eq!(model.calls(), 0);
    }
}
