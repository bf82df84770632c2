//! Classifier capability, ONNX loading and the inference engine

pub mod classifier;
pub mod inference;
pub mod loader;

pub use classifier::{Classifier, ClassifierFactory};
pub use inference::{ActiveModel, Hydrator, InferenceEngine, ModelStatus};
pub use loader::{ModelLoader, OnnxClassifier};
