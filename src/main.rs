//! Fraud Risk Pipeline - Main Entry Point
//!
//! Hydrates the production model from the registry, consumes score requests from NATS,
//! scores, decides and explains them, and publishes responses. The governance job
//! periodically compares the newest version with production and promotes the winner.

use anyhow::{Context, Result};
use fraud_risk_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{decode_request, ScoreRequestConsumer},
    feature_transformer::FeatureTransformer,
    governance::{GovernanceJob, Promoter, VersionEvaluator},
    metrics::{MetricsReporter, PipelineMetrics},
    models::{Hydrator, InferenceEngine, ModelLoader},
    producer::ScoreResponsePublisher,
    registry::{FsRegistry, ModelRegistry},
    PipelineError,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("fraud_risk_pipeline={}", logging.level))
    })?;

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging)?;

    info!("Starting Fraud Risk Pipeline");
    info!(
        registry = %config.registry.root.display(),
        model = %config.registry.model_name,
        alias = %config.registry.production_alias,
        top_k = config.detection.top_k,
        fpr_cap = config.detection.fpr_cap,
        recall_target = config.detection.recall_target,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    let registry: Arc<dyn ModelRegistry> = Arc::new(FsRegistry::new(
        &config.registry.root,
        &config.registry.model_name,
    ));
    let loader = Arc::new(ModelLoader::with_threads(config.pipeline.onnx_threads)?);
    let transformer = FeatureTransformer::new(config.features.clone());

    let engine = Arc::new(InferenceEngine::new(
        transformer.clone(),
        config.detection.clone(),
    ));
    let hydrator = Arc::new(Hydrator::new(
        registry.clone(),
        loader.clone(),
        config.registry.production_alias.as_str(),
    ));

    // Startup hydration; without a model every request is answered as unavailable
    {
        let hydrator = hydrator.clone();
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || hydrator.hydrate(&engine)).await? {
            Ok(version) => info!(registry_version = version, "Startup hydration complete"),
            Err(e) => warn!(error = %e, "Startup hydration failed, serving without a model"),
        }
    }

    if config.governance.enabled {
        let evaluator = VersionEvaluator::new(registry.clone(), loader.clone(), transformer);
        let job = GovernanceJob::new(
            evaluator,
            Promoter::new(registry.clone()),
            config.registry.production_alias.as_str(),
            &config.detection,
            &config.governance,
        )
        .with_rehydration(hydrator.clone(), engine.clone());
        let period = Duration::from_secs(config.governance.interval_secs);

        info!(
            interval_secs = config.governance.interval_secs,
            timeout_secs = config.governance.timeout_secs,
            "Governance job scheduled"
        );
        tokio::spawn(async move { job.run_periodically(period).await });
    }

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = ScoreRequestConsumer::new(client.clone(), &config.nats.request_subject);
    let publisher = Arc::new(ScoreResponsePublisher::new(
        client.clone(),
        &config.nats.response_subject,
    ));

    let num_workers = config.pipeline.workers;
    let timeout = Duration::from_millis(config.pipeline.timeout_ms);
    info!(
        workers = num_workers,
        timeout_ms = config.pipeline.timeout_ms,
        request_subject = %consumer.subject(),
        response_subject = %publisher.subject(),
        "Starting score request loop"
    );

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    tokio::spawn(MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs).start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let engine = engine.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();
            let reply = message.reply.clone();

            let outcome = match decode_request(&message.payload) {
                Ok(request) => {
                    let scoring = tokio::task::spawn_blocking(move || engine.score(&request));
                    match tokio::time::timeout(timeout, scoring).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => Err(PipelineError::Classifier(format!("scoring task failed: {e}"))),
                        Err(_) => Err(PipelineError::Classifier(format!(
                            "scoring exceeded {}ms",
                            timeout.as_millis()
                        ))),
                    }
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(response) => {
                    let processing_time = start_time.elapsed();
                    metrics.record_response(processing_time, &response);

                    if let Err(e) = publisher.publish(reply.as_ref(), &response).await {
                        error!(request_id = %response.request_id, error = %e, "Failed to publish score response");
                    } else {
                        debug!(
                            request_id = %response.request_id,
                            rows = response.results.len(),
                            rejected = response.rejected.len(),
                            processing_time_us = processing_time.as_micros(),
                            "Score response published"
                        );
                    }

                    let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 100 == 0 {
                        let processing_stats = metrics.get_processing_stats();
                        info!(
                            processed = count,
                            throughput = format!("{:.1} rows/s", metrics.get_throughput()),
                            avg_latency_us = processing_stats.mean_us,
                            "Processing milestone"
                        );
                    }
                }
                Err(e) => {
                    metrics.record_failure(e.class());
                    warn!(error = %e, class = %e.class(), "Score request failed");
                    if let Err(publish_error) = publisher.publish_failure(reply.as_ref(), &e).await {
                        error!(error = %publish_error, "Failed to publish failure reply");
                    }
                }
            }

            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
