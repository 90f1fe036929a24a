//! Telemetry rows and the thin ingest helpers that feed the pipeline.
//!
//! A row is one timestamped sample of host counters. The pipeline expects
//! rows already ordered by timestamp: difference features depend on sequence.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::debug;

/// One cleaned sample of host counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRow {
    #[serde(alias = "record_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub counters: BTreeMap<String, f64>,
}

impl TelemetryRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            counters: BTreeMap::new(),
        }
    }

    /// Builder-style counter insertion
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    /// Look up a counter, rejecting absent or non-finite values.
    pub fn counter(&self, name: &str, row: usize) -> Result<f64> {
        match self.counters.get(name) {
            Some(v) if v.is_finite() => Ok(*v),
            Some(v) => Err(PipelineError::Schema(format!(
                "column '{}' holds non-numeric value {} at row {}",
                name, v, row
            ))),
            None => Err(PipelineError::missing_column(name, row)),
        }
    }
}

/// Read newline-delimited JSON telemetry. Blank lines are skipped.
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<TelemetryRow>> {
    let mut rows = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row: TelemetryRow = serde_json::from_str(trimmed).map_err(|e| {
            PipelineError::Schema(format!("line {}: {}", line_no + 1, e))
        })?;
        rows.push(row);
    }
    debug!(rows = rows.len(), "Telemetry loaded.");
    Ok(rows)
}

/// Stable sort by timestamp; rows sharing a timestamp keep their input order.
pub fn sort_chronologically(rows: &mut [TelemetryRow]) {
    rows.sort_by_key(|r| r.timestamp);
}

/// Drop rows whose `column` is negative. Rows lacking the column are kept.
pub fn drop_negative(rows: Vec<TelemetryRow>, column: &str) -> Vec<TelemetryRow> {
    let before = rows.len();
    let kept: Vec<TelemetryRow> = rows
        .into_iter()
        .filter(|r| r.counters.get(column).is_none_or(|v| *v >= 0.0))
        .collect();
    debug!(column, dropped = before - kept.len(), "Negative rows dropped.");
    kept
}

/// Remove the named columns from every row.
pub fn drop_columns(mut rows: Vec<TelemetryRow>, columns: &[String]) -> Vec<TelemetryRow> {
    for row in &mut rows {
        for c in columns {
            row.counters.remove(c);
        }
    }
    rows
}
