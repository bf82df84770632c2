//! Scheduled compare-and-promote job.
//!
//! A run selects the pair to compare, calibrates any side that has no thresholds yet,
//! compares both on their shared slice and moves the production alias to the winner.
//! When the alias moves, the attached inference engine is rehydrated. Runs never
//! overlap. Promotion and timeout are mutually exclusive: a run that times out before
//! promoting never promotes, and a timeout that lands while the alias is being moved
//! waits for that move and reports its real result.

use super::calibrate::calibrate_version;
use super::compare::{compare, select_pair, Comparison};
use super::promote::{PromotionOutcome, Promoter};
use super::VersionEvaluator;
use crate::config::{DetectionConfig, GovernanceConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::models::inference::{Hydrator, InferenceEngine};
use crate::types::artifact::paths;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const JOB_NAME: &str = "governance job";

/// Where a run stands with respect to committing its promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Running,
    Committing,
    Cancelled,
}

/// Shared between a run and its worker; transitions out of `Running` happen once
struct PhaseCell(Mutex<RunPhase>);

impl PhaseCell {
    fn new() -> Self {
        Self(Mutex::new(RunPhase::Running))
    }

    /// Move `Running` to `to`; false if the other side got there first
    fn leave_running(&self, to: RunPhase) -> bool {
        let mut phase = self.0.lock();
        if *phase != RunPhase::Running {
            return false;
        }
        *phase = to;
        true
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Another run was still in progress; nothing was done
    AlreadyRunning,
    Completed {
        comparison: Comparison,
        promotion: PromotionOutcome,
        /// Whether the attached engine now serves the promoted version
        rehydrated: bool,
    },
}

struct JobContext {
    evaluator: VersionEvaluator,
    promoter: Promoter,
    alias: String,
    versions: Option<[u64; 2]>,
    fpr_cap: f64,
    recall_target: f64,
}

impl JobContext {
    fn ensure_thresholds(&self, version: u64) -> PipelineResult<()> {
        match self
            .evaluator
            .registry()
            .download_artifact(version, paths::THRESHOLDS)
        {
            Ok(_) => Ok(()),
            Err(PipelineError::ArtifactMissing { .. }) => {
                info!(registry_version = version, "No thresholds yet, calibrating");
                calibrate_version(&self.evaluator, version, self.fpr_cap, self.recall_target)
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    fn compare_and_promote(&self, phase: &PhaseCell) -> PipelineResult<(Comparison, PromotionOutcome)> {
        let (candidate, champion) = select_pair(self.evaluator.registry(), &self.alias, self.versions)?;
        self.ensure_thresholds(candidate)?;
        self.ensure_thresholds(champion)?;

        let comparison = compare(&self.evaluator, candidate, champion)?;

        if !phase.leave_running(RunPhase::Committing) {
            return Err(PipelineError::JobFailed {
                job: JOB_NAME.to_string(),
                detail: "cancelled after timeout before promotion".to_string(),
            });
        }
        let promotion = self.promoter.promote(&self.alias, comparison.winner)?;
        Ok((comparison, promotion))
    }
}

fn worker_result<T>(joined: Result<PipelineResult<T>, tokio::task::JoinError>) -> PipelineResult<T> {
    match joined {
        Ok(result) => result,
        Err(join_error) => {
            if join_error.is_panic() {
                std::panic::resume_unwind(join_error.into_panic());
            }
            Err(PipelineError::JobFailed {
                job: JOB_NAME.to_string(),
                detail: join_error.to_string(),
            })
        }
    }
}

/// Clears the running flag when the blocking work ends, even if it panics
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct GovernanceJob {
    context: Arc<JobContext>,
    rehydrate: Option<(Arc<Hydrator>, Arc<InferenceEngine>)>,
    running: Arc<AtomicBool>,
    timeout: Duration,
}

impl GovernanceJob {
    pub fn new(
        evaluator: VersionEvaluator,
        promoter: Promoter,
        alias: impl Into<String>,
        detection: &DetectionConfig,
        governance: &GovernanceConfig,
    ) -> Self {
        Self {
            context: Arc::new(JobContext {
                evaluator,
                promoter,
                alias: alias.into(),
                versions: governance.versions,
                fpr_cap: detection.fpr_cap,
                recall_target: detection.recall_target,
            }),
            rehydrate: None,
            running: Arc::new(AtomicBool::new(false)),
            timeout: Duration::from_secs(governance.timeout_secs),
        }
    }

    /// Rehydrate `engine` whenever a run moves the alias
    pub fn with_rehydration(mut self, hydrator: Arc<Hydrator>, engine: Arc<InferenceEngine>) -> Self {
        self.rehydrate = Some((hydrator, engine));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a run (possibly one that already timed out) is still working
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run once. Failures leave the alias untouched.
    pub async fn run(&self) -> PipelineResult<JobOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous governance run still in progress, skipping");
            return Ok(JobOutcome::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let phase = Arc::new(PhaseCell::new());
        let context = Arc::clone(&self.context);
        let worker_phase = Arc::clone(&phase);
        let mut handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            context.compare_and_promote(&worker_phase)
        });

        let result = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => worker_result(joined),
            Err(_) if phase.leave_running(RunPhase::Cancelled) => Err(PipelineError::JobTimedOut {
                job: JOB_NAME.to_string(),
                timeout: self.timeout,
            }),
            Err(_) => {
                warn!(
                    timeout = ?self.timeout,
                    "Timeout reached while promotion is in progress, waiting for it"
                );
                worker_result(handle.await)
            }
        };

        let (comparison, promotion) = match result {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Governance run failed, alias unchanged");
                return Err(e);
            }
        };

        let rehydrated = if promotion.is_moved() {
            self.rehydrate_engine().await
        } else {
            false
        };

        info!(
            winner = comparison.winner,
            promotion = ?promotion,
            rehydrated = rehydrated,
            "Governance run complete"
        );
        Ok(JobOutcome::Completed {
            comparison,
            promotion,
            rehydrated,
        })
    }

    async fn rehydrate_engine(&self) -> bool {
        let Some((hydrator, engine)) = self.rehydrate.clone() else {
            return false;
        };
        match tokio::task::spawn_blocking(move || hydrator.hydrate(&engine)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Rehydration after promotion failed, engine keeps previous model");
                false
            }
            Err(e) => {
                warn!(error = %e, "Rehydration task failed");
                false
            }
        }
    }

    /// Run every `period` until the task is dropped. Ticks that fall inside a long run
    /// are skipped.
    pub async fn run_periodically(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.run().await {
                Ok(JobOutcome::Completed { promotion, .. }) => {
                    info!(promotion = ?promotion, "Scheduled governance run finished");
                }
                Ok(JobOutcome::AlreadyRunning) => {}
                Err(e) => {
                    error!(error = %e, "Scheduled governance run failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::config::FeatureConfig;
    use crate::feature_transformer::FeatureTransformer;
    use crate::models::classifier::testing::LogisticFactory;
    use crate::models::classifier::{Classifier, ClassifierFactory};
    use crate::registry::{InMemoryRegistry, ModelRegistry};
    use crate::types::transaction::LabeledTransaction;

    /// Builds logistic classifiers after a delay
    struct SlowFactory(Duration);

    impl ClassifierFactory for SlowFactory {
        fn build(&self, version: u64, model_bytes: &[u8]) -> PipelineResult<Arc<dyn Classifier>> {
            std::thread::sleep(self.0);
            LogisticFactory.build(version, model_bytes)
        }
    }

    fn holdout() -> Vec<LabeledTransaction> {
        vec![
            row(1, 12, 0.1, false),
            row(2, 12, 0.2, false),
            row(3, 13, 0.7, true),
            row(4, 14, 0.3, false),
            row(5, 14, 0.9, true),
        ]
    }

    /// v1 ranks fraud last, v2 ranks it first; production starts on v1
    fn registry() -> Arc<InMemoryRegistry> {
        let registry = Arc::new(InMemoryRegistry::new());
        store_model(registry.as_ref(), 1, -5.0, 2.0);
        store_model(registry.as_ref(), 2, 5.0, -2.0);
        store_holdout(registry.as_ref(), 1, 10, &holdout());
        store_holdout(registry.as_ref(), 2, 10, &holdout());
        registry.set_alias("production", 1).unwrap();
        registry
    }

    fn job(registry: Arc<InMemoryRegistry>, factory: Arc<dyn ClassifierFactory>) -> GovernanceJob {
        let evaluator = VersionEvaluator::new(
            registry.clone(),
            factory,
            FeatureTransformer::new(FeatureConfig::default()),
        );
        GovernanceJob::new(
            evaluator,
            Promoter::new(registry),
            "production",
            &DetectionConfig::default(),
            &GovernanceConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_promotes_and_rehydrates() {
        let registry = registry();
        let engine = Arc::new(InferenceEngine::new(
            FeatureTransformer::new(FeatureConfig::default()),
            DetectionConfig::default(),
        ));
        let hydrator = Arc::new(Hydrator::new(
            registry.clone(),
            Arc::new(LogisticFactory),
            "production",
        ));
        let job = job(registry.clone(), Arc::new(LogisticFactory))
            .with_rehydration(hydrator, engine.clone());

        let outcome = job.run().await.unwrap();
        let JobOutcome::Completed {
            comparison,
            promotion,
            rehydrated,
        } = outcome
        else {
            panic!("expected a completed run");
        };
        assert_eq!(comparison.winner, 2);
        assert_eq!(promotion, PromotionOutcome::Moved { from: Some(1), to: 2 });
        assert!(rehydrated);
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(2));
        assert_eq!(engine.status().registry_version, Some(2));

        // both sides were calibrated on the way
        assert!(registry.download_artifact(1, paths::THRESHOLDS).is_ok());
        assert!(registry.download_artifact(2, paths::THRESHOLDS).is_ok());
        assert!(!job.is_running());

        // second run finds the alias already on the winner
        let again = job.run().await.unwrap();
        assert!(matches!(
            again,
            JobOutcome::Completed {
                promotion: PromotionOutcome::Unchanged { version: 2 },
                rehydrated: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_run_leaves_alias() {
        let registry = Arc::new(InMemoryRegistry::new());
        store_model(registry.as_ref(), 1, -5.0, 2.0);
        store_model(registry.as_ref(), 2, 5.0, -2.0);
        store_holdout(registry.as_ref(), 1, 10, &holdout());
        registry.set_alias("production", 1).unwrap();

        let job = job(registry.clone(), Arc::new(LogisticFactory));
        let err = job.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { version: 2, .. }));
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(1));
        assert!(!job.is_running());
    }

    async fn wait_until_idle(job: &GovernanceJob) {
        for _ in 0..500 {
            if !job.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let registry = registry();
        let job = Arc::new(job(registry, Arc::new(SlowFactory(Duration::from_millis(50)))));

        let background = {
            let job = Arc::clone(&job);
            tokio::spawn(async move { job.run().await })
        };
        while !job.is_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(job.run().await.unwrap(), JobOutcome::AlreadyRunning);
        let first = background.await.unwrap().unwrap();
        assert!(matches!(first, JobOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_timed_out_run_never_promotes() {
        let registry = registry();
        let job = job(registry.clone(), Arc::new(SlowFactory(Duration::from_millis(100))))
            .with_timeout(Duration::from_millis(20));

        let err = job.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::JobTimedOut { .. }));

        // the abandoned work keeps the job busy until it ends
        assert!(job.is_running());
        wait_until_idle(&job).await;
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(1));
    }

    /// Delegates to an in-memory registry; alias moves take `delay`
    struct SlowAliasRegistry {
        inner: InMemoryRegistry,
        delay: Duration,
    }

    impl ModelRegistry for SlowAliasRegistry {
        fn list_versions(&self) -> PipelineResult<Vec<u64>> {
            self.inner.list_versions()
        }

        fn get_version_by_alias(&self, alias: &str) -> PipelineResult<Option<u64>> {
            self.inner.get_version_by_alias(alias)
        }

        fn set_alias(&self, alias: &str, version: u64) -> PipelineResult<()> {
            std::thread::sleep(self.delay);
            self.inner.set_alias(alias, version)
        }

        fn download_artifact(&self, version: u64, path: &str) -> PipelineResult<Vec<u8>> {
            self.inner.download_artifact(version, path)
        }

        fn upload_artifact(&self, version: u64, path: &str, bytes: &[u8]) -> PipelineResult<()> {
            self.inner.upload_artifact(version, path, bytes)
        }
    }

    #[tokio::test]
    async fn test_timeout_during_alias_move_reports_the_move() {
        let inner = InMemoryRegistry::new();
        store_model(&inner, 1, -5.0, 2.0);
        store_model(&inner, 2, 5.0, -2.0);
        store_holdout(&inner, 1, 10, &holdout());
        store_holdout(&inner, 2, 10, &holdout());
        inner.set_alias("production", 1).unwrap();
        let registry = Arc::new(SlowAliasRegistry {
            inner,
            delay: Duration::from_millis(500),
        });

        let engine = Arc::new(InferenceEngine::new(
            FeatureTransformer::new(FeatureConfig::default()),
            DetectionConfig::default(),
        ));
        let hydrator = Arc::new(Hydrator::new(
            registry.clone(),
            Arc::new(LogisticFactory),
            "production",
        ));
        let evaluator = VersionEvaluator::new(
            registry.clone(),
            Arc::new(LogisticFactory),
            FeatureTransformer::new(FeatureConfig::default()),
        );
        let job = GovernanceJob::new(
            evaluator,
            Promoter::new(registry.clone()),
            "production",
            &DetectionConfig::default(),
            &GovernanceConfig::default(),
        )
        .with_rehydration(hydrator, engine.clone())
        .with_timeout(Duration::from_millis(150));

        // the timeout fires while the alias is moving; the run waits for the move
        let outcome = job.run().await.unwrap();
        assert!(matches!(
            outcome,
            JobOutcome::Completed {
                promotion: PromotionOutcome::Moved { from: Some(1), to: 2 },
                rehydrated: true,
                ..
            }
        ));
        assert!(!job.is_running());

        // alias and served model agree
        assert_eq!(registry.get_version_by_alias("production").unwrap(), Some(2));
        assert_eq!(engine.status().registry_version, Some(2));
    }
}
