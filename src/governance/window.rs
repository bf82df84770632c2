//! Training-window preparation: everything a trainer needs before fitting a classifier.
//!
//! Clip bounds are learned by IQR over amount-like columns, rows are split out of time
//! by event timestamp, the categorical encoder, schema and medians are learned from the
//! training side only, and both sides are shaped with the resulting profile.

use crate::config::ClipPopulation;
use crate::error::{PipelineError, PipelineResult};
use crate::feature_transformer::{Cell, FeatureRow, FeatureTransformer, Frame, UNKNOWN};
use crate::registry::{put_json, ModelRegistry};
use crate::types::artifact::{paths, ArtifactProfile, CategoricalEncoder, Manifest};
use crate::types::transaction::LabeledTransaction;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{info, warn};

const IQR_FENCE: f64 = 1.5;

/// Why a window produced no trainable data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Training side has no fraud rows
    NoPositiveClass { negatives: usize },
    /// Holdout has a single class, so thresholds and metrics are undefined
    SingleClassHoldout { positives: usize, negatives: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPositiveClass { negatives } => {
                write!(f, "no positive class in training set ({negatives} negatives)")
            }
            SkipReason::SingleClassHoldout {
                positives,
                negatives,
            } => write!(
                f,
                "single class in holdout ({positives} positive / {negatives} negative)"
            ),
        }
    }
}

/// A window ready for fitting
#[derive(Debug, Clone)]
pub struct PreparedWindow {
    pub profile: ArtifactProfile,
    pub train_features: Vec<FeatureRow>,
    pub train_labels: Vec<u8>,
    /// Raw holdout rows, persisted so later comparisons can rebuild a shared slice
    pub holdout: Vec<LabeledTransaction>,
    pub holdout_features: Vec<FeatureRow>,
    pub holdout_labels: Vec<u8>,
    /// Holdout rows are at or after this instant, training rows strictly before
    pub cutoff: DateTime<Utc>,
}

impl PreparedWindow {
    pub fn manifest(&self, model_version: &str, trained_at: DateTime<Utc>) -> Manifest {
        Manifest {
            model_version: model_version.to_string(),
            trained_at,
            cutoff_time: self.cutoff,
            train_size: self.train_labels.len(),
            test_size: self.holdout_labels.len(),
            feature_count: self.profile.width(),
        }
    }

    /// Persist schema, encoder, manifest and holdout for `version`. The trainer uploads
    /// the model blob; thresholds come from calibration.
    pub fn persist(
        &self,
        registry: &dyn ModelRegistry,
        version: u64,
        model_version: &str,
    ) -> PipelineResult<Manifest> {
        let manifest = self.manifest(model_version, Utc::now());
        put_json(registry, version, paths::SCHEMA, &self.profile.to_schema_artifact())?;
        put_json(registry, version, paths::ENCODERS, &self.profile.categorical_encoder)?;
        put_json(registry, version, paths::HOLDOUT, &self.holdout)?;
        put_json(registry, version, paths::MANIFEST, &manifest)?;

        info!(
            registry_version = version,
            model_version = %model_version,
            features = manifest.feature_count,
            train = manifest.train_size,
            holdout = manifest.test_size,
            "Window artifacts persisted"
        );
        Ok(manifest)
    }
}

#[derive(Debug, Clone)]
pub enum WindowOutcome {
    Ready(Box<PreparedWindow>),
    Skipped(SkipReason),
}

/// Quantile with linear interpolation between closest ranks. `sorted` must be non-empty.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(quantile(values, 0.5))
}

/// IQR bounds `[max(Q1 - 1.5·IQR, 0), Q3 + 1.5·IQR]` for every column whose name
/// contains `marker`. Columns with no numeric values get no bounds.
pub fn learn_clip_bounds<'a, I>(rows: I, marker: &str) -> BTreeMap<String, (f64, f64)>
where
    I: IntoIterator<Item = &'a LabeledTransaction>,
{
    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        for (name, value) in &row.transaction.fields {
            if !name.contains(marker) {
                continue;
            }
            let column = values.entry(name.as_str()).or_default();
            if let Some(v) = Cell::from_json(value).as_number() {
                column.push(v);
            }
        }
    }

    values
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(name, mut v)| {
            v.sort_by(f64::total_cmp);
            let q1 = quantile(&v, 0.25);
            let q3 = quantile(&v, 0.75);
            let iqr = q3 - q1;
            let lower = (q1 - IQR_FENCE * iqr).max(0.0);
            (name.to_string(), (lower, q3 + IQR_FENCE * iqr))
        })
        .collect()
}

/// Out-of-time split. Rows without a parseable event time are dropped; the rest are
/// ordered by `(event time, transaction_seq)` and the cutoff is the event time of the
/// row at index `floor(n · (1 - test_ratio))`.
pub fn split_out_of_time(
    transformer: &FeatureTransformer,
    rows: Vec<LabeledTransaction>,
    test_ratio: f64,
) -> PipelineResult<(Vec<LabeledTransaction>, Vec<LabeledTransaction>, NaiveDateTime)> {
    if !(0.0..1.0).contains(&test_ratio) {
        return Err(PipelineError::InvalidInput(format!(
            "test_ratio must be in [0, 1), got {test_ratio}"
        )));
    }

    let total = rows.len();
    let mut timed: Vec<(NaiveDateTime, LabeledTransaction)> = rows
        .into_iter()
        .filter_map(|row| transformer.event_time(&row.transaction).map(|t| (t, row)))
        .collect();
    if timed.len() < total {
        warn!(
            dropped = total - timed.len(),
            "Rows without a parseable event time left out of the window"
        );
    }
    if timed.is_empty() {
        return Err(PipelineError::InvalidInput(
            "no rows with a parseable event time".to_string(),
        ));
    }

    timed.sort_by(|(ta, a), (tb, b)| {
        ta.cmp(tb)
            .then(a.transaction.transaction_seq.cmp(&b.transaction.transaction_seq))
    });
    let split_idx = ((timed.len() as f64 * (1.0 - test_ratio)) as usize).min(timed.len() - 1);
    let cutoff = timed[split_idx].0;

    let (train, test): (Vec<_>, Vec<_>) = timed.into_iter().partition(|(t, _)| *t < cutoff);
    Ok((
        train.into_iter().map(|(_, r)| r).collect(),
        test.into_iter().map(|(_, r)| r).collect(),
        cutoff,
    ))
}

fn fit_encoder(transformer: &FeatureTransformer, frames: &[Frame]) -> CategoricalEncoder {
    let columns: Vec<String> = transformer
        .config()
        .categorical_columns
        .iter()
        .filter(|c| frames.iter().any(|f| f.contains_key(*c)))
        .cloned()
        .collect();

    let values: Vec<(&str, String)> = frames
        .iter()
        .flat_map(|frame| {
            columns.iter().map(move |c| {
                let category = frame
                    .get(c)
                    .map(Cell::as_category)
                    .unwrap_or_else(|| UNKNOWN.to_string());
                (c.as_str(), category)
            })
        })
        .collect();

    CategoricalEncoder::fit(&columns, values.iter().map(|(c, v)| (*c, v.as_str())))
}

fn learn_profile(
    transformer: &FeatureTransformer,
    train: &[LabeledTransaction],
    clip_bounds: BTreeMap<String, (f64, f64)>,
) -> PipelineResult<ArtifactProfile> {
    let frames: Vec<Frame> = train
        .iter()
        .map(|r| transformer.engineer(&r.transaction, &clip_bounds))
        .collect();
    let encoder = fit_encoder(transformer, &frames);

    let encoded: Vec<Frame> = train
        .iter()
        .map(|r| transformer.encoded_frame(&r.transaction, &clip_bounds, &encoder))
        .collect();

    let feature_columns: Vec<String> = encoded
        .iter()
        .flat_map(|f| f.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let medians: HashMap<String, f64> = feature_columns
        .iter()
        .map(|column| {
            let mut values: Vec<f64> = encoded
                .iter()
                .filter_map(|f| f.get(column).and_then(Cell::as_number))
                .collect();
            (column.clone(), median(&mut values).unwrap_or(0.0))
        })
        .collect();

    ArtifactProfile::new(feature_columns, medians, clip_bounds, encoder)
}

fn label_counts(rows: &[LabeledTransaction]) -> (usize, usize) {
    let positives = rows.iter().filter(|r| r.is_fraud).count();
    (positives, rows.len() - positives)
}

/// Prepare one training window from labeled fraud and non-fraud rows
pub fn prepare_window(
    transformer: &FeatureTransformer,
    rows: Vec<LabeledTransaction>,
    test_ratio: f64,
    clip_population: ClipPopulation,
) -> PipelineResult<WindowOutcome> {
    let marker = &transformer.config().amount_marker;
    let clip_bounds = match clip_population {
        ClipPopulation::All => learn_clip_bounds(&rows, marker),
        ClipPopulation::NonFraud => learn_clip_bounds(rows.iter().filter(|r| !r.is_fraud), marker),
    };

    let (train, holdout, cutoff) = split_out_of_time(transformer, rows, test_ratio)?;
    let (train_pos, train_neg) = label_counts(&train);
    let (test_pos, test_neg) = label_counts(&holdout);
    info!(
        cutoff = %cutoff,
        train = train.len(),
        holdout = holdout.len(),
        train_positives = train_pos,
        holdout_positives = test_pos,
        clip_columns = clip_bounds.len(),
        "Window split out of time"
    );

    if train_pos == 0 {
        warn!("Training set has no fraud rows; skipping window");
        return Ok(WindowOutcome::Skipped(SkipReason::NoPositiveClass {
            negatives: train_neg,
        }));
    }
    if test_pos == 0 || test_neg == 0 {
        warn!("Holdout has a single class; skipping window");
        return Ok(WindowOutcome::Skipped(SkipReason::SingleClassHoldout {
            positives: test_pos,
            negatives: test_neg,
        }));
    }

    let profile = learn_profile(transformer, &train, clip_bounds)?;
    let shape = |rows: &[LabeledTransaction]| -> PipelineResult<Vec<FeatureRow>> {
        rows.iter()
            .map(|r| transformer.transform_row(&r.transaction, &profile))
            .collect()
    };
    let train_features = shape(&train)?;
    let holdout_features = shape(&holdout)?;

    Ok(WindowOutcome::Ready(Box::new(PreparedWindow {
        train_labels: train.iter().map(LabeledTransaction::label).collect(),
        holdout_labels: holdout.iter().map(LabeledTransaction::label).collect(),
        train_features,
        holdout_features,
        holdout,
        cutoff: cutoff.and_utc(),
        profile,
    })))
}
