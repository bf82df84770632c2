//! Fraud Risk Pipeline Library
//!
//! Online scoring of remittance transactions into ALLOW / REVIEW / BLOCK decisions with
//! per-row explanations, plus the offline governance that keeps the production model
//! honest: training-window preparation, threshold calibration and champion/challenger
//! comparison with alias promotion.

pub mod config;
pub mod consumer;
pub mod decision;
pub mod error;
pub mod explain;
pub mod feature_transformer;
pub mod governance;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod registry;
pub mod types;

pub use config::AppConfig;
pub use consumer::ScoreRequestConsumer;
pub use error::{ErrorClass, PipelineError, PipelineResult};
pub use feature_transformer::FeatureTransformer;
pub use governance::{GovernanceJob, VersionEvaluator};
pub use models::inference::{Hydrator, InferenceEngine};
pub use producer::ScoreResponsePublisher;
pub use registry::{FsRegistry, ModelRegistry};
pub use types::{decision::ScoreRequest, decision::ScoreResponse, transaction::RawTransaction};
