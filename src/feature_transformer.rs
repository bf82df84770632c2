//! Feature transformation from raw transactions into classifier input rows.
//!
//! The pipeline runs in a fixed order: string imputation, clipping to learned bounds,
//! derived date and risk features, PII removal, categorical encoding with the fitted
//! encoder, schema alignment and median imputation. Output width and column order always
//! equal the profile's `feature_columns`, whichever optional raw fields were supplied.

use crate::config::FeatureConfig;
use crate::error::PipelineResult;
use crate::types::artifact::{ArtifactProfile, CategoricalEncoder};
use crate::types::transaction::RawTransaction;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Placeholder for missing text values
pub const UNKNOWN: &str = "Unknown";

/// One feature row, ordered like the profile's `feature_columns`
pub type FeatureRow = Vec<f64>;

/// A cell in an intermediate (pre-alignment) row
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Num(f64),
    Text(String),
    Missing,
}

impl Cell {
    pub(crate) fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Missing,
            Value::Bool(b) => Cell::Num(if *b { 1.0 } else { 0.0 }),
            Value::Number(n) => n.as_f64().map(Cell::Num).unwrap_or(Cell::Missing),
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    /// Numeric coercion: text that does not parse becomes missing
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Num(n) if n.is_finite() => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Category string as the encoder sees it
    pub(crate) fn as_category(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Num(n) => n.to_string(),
            Cell::Missing => UNKNOWN.to_string(),
        }
    }

    fn flag(value: bool) -> Self {
        Cell::Num(if value { 1.0 } else { 0.0 })
    }
}

/// Intermediate row keyed by column name
pub(crate) type Frame = BTreeMap<String, Cell>;

/// Transforms raw rows into feature rows using a fitted [`ArtifactProfile`].
///
/// Holds only the fixed column layout; everything learned comes from the profile.
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    config: FeatureConfig,
}

impl FeatureTransformer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Transform a batch. Fails on the first row that cannot be shaped.
    pub fn transform(
        &self,
        rows: &[RawTransaction],
        profile: &ArtifactProfile,
    ) -> PipelineResult<Vec<FeatureRow>> {
        rows.iter().map(|row| self.transform_row(row, profile)).collect()
    }

    /// Transform a single row
    pub fn transform_row(
        &self,
        row: &RawTransaction,
        profile: &ArtifactProfile,
    ) -> PipelineResult<FeatureRow> {
        let frame = self.encoded_frame(row, &profile.clip_bounds, &profile.categorical_encoder);
        let aligned = align(frame, profile);
        Ok(impute(aligned, profile))
    }

    /// Steps 1-5: everything up to (and including) encoding
    pub(crate) fn encoded_frame(
        &self,
        row: &RawTransaction,
        clip_bounds: &BTreeMap<String, (f64, f64)>,
        encoder: &CategoricalEncoder,
    ) -> Frame {
        let mut frame = self.engineer(row, clip_bounds);
        encode(&mut frame, encoder);
        frame
    }

    /// Steps 1-4: imputation, clipping, derived features and PII removal
    pub(crate) fn engineer(
        &self,
        row: &RawTransaction,
        clip_bounds: &BTreeMap<String, (f64, f64)>,
    ) -> Frame {
        let mut frame = self.impute_strings(row);
        clip(&mut frame, clip_bounds);
        self.derive_features(&mut frame);
        for pii in &self.config.pii_columns {
            frame.remove(pii);
        }
        frame
    }

    /// Parse the primary event timestamp of a raw row
    pub fn event_time(&self, row: &RawTransaction) -> Option<NaiveDateTime> {
        row.get(&self.config.event_time_column)
            .and_then(Value::as_str)
            .and_then(|s| parse_datetime(s, &self.config.sentinel_dates))
    }

    fn is_text_column(&self, name: &str) -> bool {
        let c = &self.config;
        name == c.event_time_column
            || c.categorical_columns.iter().any(|x| x == name)
            || c.date_columns.iter().any(|x| x == name)
            || c.pii_columns.iter().any(|x| x == name)
    }

    fn impute_strings(&self, row: &RawTransaction) -> Frame {
        row.fields
            .iter()
            .map(|(name, value)| {
                let cell = if self.is_text_column(name) {
                    match value {
                        Value::Null => Cell::Text(UNKNOWN.to_string()),
                        Value::String(s) => Cell::Text(s.clone()),
                        other => Cell::Text(Cell::from_json(other).as_category()),
                    }
                } else {
                    Cell::from_json(value)
                };
                (name.clone(), cell)
            })
            .collect()
    }

    fn parse_date_cell(&self, frame: &Frame, column: &str) -> Option<NaiveDateTime> {
        match frame.get(column) {
            Some(Cell::Text(s)) => parse_datetime(s, &self.config.sentinel_dates),
            _ => None,
        }
    }

    fn derive_features(&self, frame: &mut Frame) {
        let c = &self.config;

        let amount = frame.get(&c.amount_column).and_then(Cell::as_number);
        let bucket = match amount.unwrap_or(-1.0) {
            a if a < c.amount_bucket_low => 1.0,
            a if a > c.amount_bucket_high => 3.0,
            _ => 2.0,
        };
        frame.insert("amount_type".to_string(), Cell::Num(bucket));

        // Risk heuristics read identity and date fields before they are dropped.
        let event = self.parse_date_cell(frame, &c.event_time_column);
        let register = self.parse_date_cell(frame, &c.register_date_column);
        let first_activity = self.parse_date_cell(frame, &c.first_activity_column);
        let birth = self.parse_date_cell(frame, &c.birth_date_column);
        let visa = self.parse_date_cell(frame, &c.visa_expiry_column);

        let days_between = |from: Option<NaiveDateTime>, to: Option<NaiveDateTime>| match (from, to)
        {
            (Some(from), Some(to)) => Cell::Num((to.date() - from.date()).num_days() as f64),
            _ => Cell::Missing,
        };
        frame.insert("account_age_days".to_string(), days_between(register, event));
        frame.insert(
            "days_to_first_transaction".to_string(),
            days_between(register, first_activity),
        );

        let age = match (birth, event) {
            (Some(birth), Some(event)) => Cell::Num(years_between(birth.date(), event.date())),
            _ => Cell::Missing,
        };
        frame.insert("customer_age_years".to_string(), age);

        let visa_expired = match (visa, event) {
            (Some(visa), Some(event)) => Cell::flag(visa.date() < event.date()),
            _ => Cell::Missing,
        };
        frame.insert("visa_expired_before_txn".to_string(), visa_expired);

        let mismatch = match (
            known_text(frame.get(&c.identity_name_column)),
            known_text(frame.get(&c.counterparty_name_column)),
        ) {
            (Some(identity), Some(counterparty)) => {
                Cell::flag(normalize_name(identity) != normalize_name(counterparty))
            }
            _ => Cell::Missing,
        };
        frame.insert("sender_name_mismatch".to_string(), mismatch);

        for (window, limit) in &c.rolling_limits {
            let prior = frame
                .get(&format!("transaction_amount_{window}"))
                .and_then(Cell::as_number);
            let cell = match prior {
                Some(prior) => {
                    Cell::flag(prior + amount.unwrap_or(0.0) >= c.near_limit_ratio * limit)
                }
                None => Cell::Missing,
            };
            frame.insert(format!("near_limit_{window}"), cell);
        }

        if frame.contains_key(&c.event_time_column) {
            expand_date(frame, &c.event_time_column, event, true);
        }
        for column in &c.date_columns {
            if frame.contains_key(column) {
                let parsed = self.parse_date_cell(frame, column);
                expand_date(frame, column, parsed, false);
            }
        }
    }
}

fn known_text(cell: Option<&Cell>) -> Option<&str> {
    match cell {
        Some(Cell::Text(s)) if !s.trim().is_empty() && s != UNKNOWN => Some(s.as_str()),
        _ => None,
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn years_between(from: NaiveDate, to: NaiveDate) -> f64 {
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years as f64
}

fn clip(frame: &mut Frame, clip_bounds: &BTreeMap<String, (f64, f64)>) {
    for (column, &(lower, upper)) in clip_bounds {
        if let Some(cell) = frame.get_mut(column) {
            *cell = match cell.as_number() {
                Some(v) => Cell::Num(v.clamp(lower, upper)),
                None => Cell::Missing,
            };
        }
    }
}

/// Replace a date column with calendar features; unparseable dates yield missing features
fn expand_date(frame: &mut Frame, column: &str, parsed: Option<NaiveDateTime>, with_time: bool) {
    frame.remove(column);

    let num = |f: &dyn Fn(&NaiveDateTime) -> f64| parsed.as_ref().map(f).map(Cell::Num);
    let month_angle = |dt: &NaiveDateTime| 2.0 * PI * dt.month() as f64 / 12.0;

    let mut features: Vec<(&str, Option<Cell>)> = vec![
        ("year", num(&|dt| dt.year() as f64)),
        ("month", num(&|dt| dt.month() as f64)),
        ("day", num(&|dt| dt.day() as f64)),
        ("dayofweek", num(&|dt| dt.weekday().num_days_from_monday() as f64)),
        ("month_sin", num(&|dt| month_angle(dt).sin())),
        ("month_cos", num(&|dt| month_angle(dt).cos())),
    ];
    if with_time {
        features.push(("hour", num(&|dt| dt.hour() as f64)));
        features.push((
            "is_night",
            parsed.map(|dt| Cell::flag(dt.hour() < 6 || dt.hour() > 22)),
        ));
    }

    for (suffix, cell) in features {
        frame.insert(format!("{column}_{suffix}"), cell.unwrap_or(Cell::Missing));
    }
}

/// Encode every fitted categorical column; absent columns are synthesized as "Unknown"
fn encode(frame: &mut Frame, encoder: &CategoricalEncoder) {
    for column in &encoder.columns {
        let category = frame
            .get(column)
            .map(Cell::as_category)
            .unwrap_or_else(|| UNKNOWN.to_string());
        frame.insert(column.clone(), Cell::Num(encoder.encode(column, &category)));
    }
}

/// One cell per profile column, in profile order
fn align(mut frame: Frame, profile: &ArtifactProfile) -> Vec<Cell> {
    profile
        .feature_columns
        .iter()
        .map(|column| frame.remove(column).unwrap_or(Cell::Missing))
        .collect()
}

fn impute(aligned: Vec<Cell>, profile: &ArtifactProfile) -> FeatureRow {
    aligned
        .iter()
        .zip(&profile.feature_columns)
        .map(|(cell, column)| cell.as_number().unwrap_or_else(|| profile.median(column)))
        .collect()
}

/// Parse a date or timestamp string. Sentinel and far-future placeholders are missing.
pub fn parse_datetime(raw: &str, sentinels: &[String]) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() || s == UNKNOWN || sentinels.iter().any(|x| x == s) {
        return None;
    }

    // offsets are dropped; calendar features use the local clock time
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        })
        .or_else(|| {
            ["%Y-%m-%d", "%Y/%m/%d"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    (parsed.year() < 9999).then_some(parsed)
}
