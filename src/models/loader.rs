//! ONNX model loader

use crate::error::{PipelineError, PipelineResult};
use crate::feature_transformer::FeatureRow;
use crate::models::classifier::{Classifier, ClassifierFactory};
use crate::types::artifact::paths;
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

fn onnx_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Classifier(e.to_string())
}

/// Classifier backed by an ONNX Runtime session.
///
/// The session is exclusive while running, so concurrent callers serialize on it.
pub struct OnnxClassifier {
    version: u64,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// P(negative) per row from a probability output. Handles `[batch, classes]` and
    /// `[batch, 1]` tensors as well as seq(map(int64, float)) outputs.
    fn extract_negative(&self, outputs: &SessionOutputs, batch: usize) -> PipelineResult<Vec<f64>> {
        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Some(probs) = self.extract_from_value(output, batch)? {
                return Ok(probs);
            }
        }

        // Fallback: first non-label output that yields probabilities
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(probs) = self.extract_from_value(&output, batch)? {
                debug!(version = self.version, output = %name, "Extracted probabilities (fallback)");
                return Ok(probs);
            }
        }

        Err(PipelineError::Classifier(format!(
            "model version {} produced no probability output",
            self.version
        )))
    }

    fn extract_from_value(&self, output: &DynValue, batch: usize) -> PipelineResult<Option<Vec<f64>>> {
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return negative_from_tensor(&dims, data, batch).map(Some);
        }

        if DynSequenceValueType::can_downcast(&output.dtype()) {
            return negative_from_sequence_map(output, batch).map(Some);
        }

        Ok(None)
    }
}

/// Column 0 of `[batch, classes]`; a single column is read as P(fraud)
fn negative_from_tensor(dims: &[i64], data: &[f32], batch: usize) -> PipelineResult<Vec<f64>> {
    let classes = match dims {
        [rows, classes] if *rows as usize == batch && *classes >= 1 => *classes as usize,
        [rows] if *rows as usize == batch => 1,
        _ => {
            return Err(PipelineError::Classifier(format!(
                "unexpected probability shape {dims:?} for batch of {batch}"
            )))
        }
    };

    Ok((0..batch)
        .map(|i| {
            if classes >= 2 {
                data[i * classes] as f64
            } else {
                1.0 - data[i] as f64
            }
        })
        .collect())
}

fn negative_from_sequence_map(output: &DynValue, batch: usize) -> PipelineResult<Vec<f64>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(onnx_error)?;
    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(onnx_error)?;

    if maps.len() != batch {
        return Err(PipelineError::Classifier(format!(
            "probability sequence has {} entries for batch of {batch}",
            maps.len()
        )));
    }

    maps.iter()
        .map(|map_value| {
            let kv_pairs = map_value
                .try_extract_key_values::<i64, f32>()
                .map_err(onnx_error)?;
            if let Some((_, p)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 0) {
                return Ok(*p as f64);
            }
            if let Some((_, p)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
                return Ok(1.0 - *p as f64);
            }
            Err(PipelineError::Classifier(
                "no class probability found in map".to_string(),
            ))
        })
        .collect()
}

impl Classifier for OnnxClassifier {
    fn predict(&self, rows: &[FeatureRow]) -> PipelineResult<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let width = rows[0].len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(PipelineError::FeatureMismatch {
                expected: width,
                found: bad.len(),
            });
        }

        let flat: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
        let shape = vec![rows.len() as i64, width as i64];
        let input_tensor = Tensor::from_array((shape, flat)).map_err(onnx_error)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(onnx_error)?;

        self.extract_negative(&outputs, rows.len())
    }
}

/// Loader for ONNX models
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> PipelineResult<Self> {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> PipelineResult<Self> {
        ort::init().commit().map_err(onnx_error)?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Build a session from a serialized model
    pub fn load_model(&self, version: u64, model_bytes: &[u8]) -> PipelineResult<OnnxClassifier> {
        info!(version = version, bytes = model_bytes.len(), threads = self.onnx_threads, "Loading ONNX model");

        let malformed = |e: String| PipelineError::MalformedArtifact {
            version,
            artifact: paths::MODEL.to_string(),
            detail: e,
        };

        let session = Session::builder()
            .map_err(|e| malformed(format!("session builder error: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| malformed(format!("optimization error: {e}")))?
            .with_intra_threads(self.onnx_threads)
            .map_err(|e| malformed(format!("thread config error: {e}")))?
            .commit_from_memory(model_bytes)
            .map_err(|e| malformed(format!("load from memory error: {e}")))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            version = version,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(OnnxClassifier {
            version,
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl ClassifierFactory for ModelLoader {
    fn build(&self, version: u64, model_bytes: &[u8]) -> PipelineResult<Arc<dyn Classifier>> {
        Ok(Arc::new(self.load_model(version, model_bytes)?))
    }
}
