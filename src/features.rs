//! First-difference feature derivation.
//!
//! For a base counter `b` the deriver produces:
//! - `b_diff`: `b[i] - b[i-1]`, with the first row fixed at `0.0`
//! - `b_diff_threshold_ratio`: `diff / threshold`
//! - `b_diff_mean_ratio`: `diff / mean(diff)`
//!
//! The threshold is `mean(diff) + 2 * std(diff)` using the sample standard
//! deviation (n - 1 denominator). Statistics are taken over exactly the rows
//! handed to [`derive`]; callers choose the scope.

use crate::error::{PipelineError, Result};
use crate::telemetry::TelemetryRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Standard deviations above the mean at which a difference becomes suspect
pub const SIGMA_MULTIPLIER: f64 = 2.0;

/// Minimum rows for a defined sample standard deviation
pub const MIN_ROWS: usize = 2;

/// Summary statistics of a difference column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub mean: f64,
    pub std_dev: f64,
    pub threshold: f64,
    /// Number of differences the statistics were computed over
    pub count: usize,
}

impl DiffStats {
    /// Compute mean, sample std and threshold. Independent of element order.
    pub fn from_diffs(diffs: &[f64]) -> Result<Self> {
        let n = diffs.len();
        if n < MIN_ROWS {
            return Err(PipelineError::InsufficientData {
                required: MIN_ROWS,
                found: n,
            });
        }

        let mean = diffs.iter().sum::<f64>() / n as f64;
        let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let std_dev = var.sqrt();

        Ok(Self {
            mean,
            std_dev,
            threshold: mean + SIGMA_MULTIPLIER * std_dev,
            count: n,
        })
    }

    fn check_divisors(&self) -> Result<()> {
        if self.threshold == 0.0 {
            return Err(PipelineError::DivisionByZero(
                "difference threshold is zero".into(),
            ));
        }
        if self.mean == 0.0 {
            return Err(PipelineError::DivisionByZero(
                "mean of differences is zero".into(),
            ));
        }
        Ok(())
    }
}

/// Derived features for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub base: f64,
    pub diff: f64,
    pub threshold_ratio: f64,
    pub mean_ratio: f64,
}

/// Column names of the derived features for a given base counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureNames {
    pub base: String,
    pub diff: String,
    pub threshold_ratio: String,
    pub mean_ratio: String,
}

impl FeatureNames {
    pub fn for_base(base: &str) -> Self {
        Self {
            base: base.to_string(),
            diff: format!("{}_diff", base),
            threshold_ratio: format!("{}_diff_threshold_ratio", base),
            mean_ratio: format!("{}_diff_mean_ratio", base),
        }
    }
}

/// Telemetry rows paired with their derived features.
#[derive(Debug, Clone)]
pub struct FeatureFrame<'a> {
    rows: &'a [TelemetryRow],
    names: FeatureNames,
    features: Vec<FeatureVector>,
    stats: DiffStats,
}

impl<'a> FeatureFrame<'a> {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn stats(&self) -> &DiffStats {
        &self.stats
    }

    pub fn names(&self) -> &FeatureNames {
        &self.names
    }

    pub fn rows(&self) -> &'a [TelemetryRow] {
        self.rows
    }

    pub fn features(&self) -> &[FeatureVector] {
        &self.features
    }

    /// Resolve a named value for one row: derived names first, then raw counters.
    pub fn value(&self, row: usize, name: &str) -> Result<f64> {
        let fv = self.features.get(row).ok_or_else(|| {
            PipelineError::Schema(format!("row {} out of range ({} rows)", row, self.len()))
        })?;
        if name == self.names.diff {
            Ok(fv.diff)
        } else if name == self.names.threshold_ratio {
            Ok(fv.threshold_ratio)
        } else if name == self.names.mean_ratio {
            Ok(fv.mean_ratio)
        } else if name == self.names.base {
            Ok(fv.base)
        } else {
            self.rows[row].counter(name, row)
        }
    }

    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        (0..self.len()).map(|i| self.value(i, name)).collect()
    }

    /// Row-major feature matrix in the order of `names`.
    pub fn matrix(&self, names: &[String]) -> Result<Vec<Vec<f64>>> {
        (0..self.len())
            .map(|i| names.iter().map(|n| self.value(i, n)).collect())
            .collect()
    }

    /// Raw counters merged with the derived features of one row.
    pub fn record(&self, row: usize) -> BTreeMap<String, f64> {
        let mut out = self.rows[row].counters.clone();
        let fv = &self.features[row];
        out.insert(self.names.diff.clone(), fv.diff);
        out.insert(self.names.threshold_ratio.clone(), fv.threshold_ratio);
        out.insert(self.names.mean_ratio.clone(), fv.mean_ratio);
        out
    }
}

/// Pull the base counter out of every row.
fn base_values(rows: &[TelemetryRow], base_column: &str) -> Result<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(i, r)| r.counter(base_column, i))
        .collect()
}

/// First differences with `diff[0] = 0.0`.
pub fn differences(values: &[f64]) -> Vec<f64> {
    let mut diffs = Vec::with_capacity(values.len());
    if let Some(&first) = values.first() {
        diffs.push(0.0);
        let mut prev = first;
        for &v in &values[1..] {
            diffs.push(v - prev);
            prev = v;
        }
    }
    diffs
}

/// Derive features using statistics computed over `rows` themselves.
pub fn derive<'a>(rows: &'a [TelemetryRow], base_column: &str) -> Result<FeatureFrame<'a>> {
    let base = base_values(rows, base_column)?;
    let diffs = differences(&base);
    let stats = DiffStats::from_diffs(&diffs)?;
    debug!(
        rows = rows.len(),
        mean = stats.mean,
        std_dev = stats.std_dev,
        threshold = stats.threshold,
        "Difference statistics computed."
    );
    build(rows, base_column, base, diffs, stats)
}

/// Derive features against externally supplied statistics (e.g. those a model
/// was trained with). Diffs are still computed from `rows`.
pub fn derive_with_stats<'a>(
    rows: &'a [TelemetryRow],
    base_column: &str,
    stats: DiffStats,
) -> Result<FeatureFrame<'a>> {
    let base = base_values(rows, base_column)?;
    let diffs = differences(&base);
    build(rows, base_column, base, diffs, stats)
}

fn build<'a>(
    rows: &'a [TelemetryRow],
    base_column: &str,
    base: Vec<f64>,
    diffs: Vec<f64>,
    stats: DiffStats,
) -> Result<FeatureFrame<'a>> {
    stats.check_divisors()?;

    let features = base
        .into_iter()
        .zip(diffs)
        .map(|(b, d)| FeatureVector {
            base: b,
            diff: d,
            threshold_ratio: d / stats.threshold,
            mean_ratio: d / stats.mean,
        })
        .collect();

    Ok(FeatureFrame {
        rows,
        names: FeatureNames::for_base(base_column),
        features,
        stats,
    })
}
