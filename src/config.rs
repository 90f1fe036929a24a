//! Pipeline configuration.
//!
//! Loaded once from JSON, validated, then handed to [`crate::Pipeline::new`].
//! Missing fields fall back to the defaults below.

use crate::algo::MaxSamples;
use crate::error::{PipelineError, Result};
use crate::split::{DEFAULT_TRAIN_FRACTION, validate_fraction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Which rows the difference statistics are computed over when scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdScope {
    /// Recompute mean and threshold over every scored batch
    #[default]
    Batch,
    /// Reuse the statistics stored with the trained model
    Training,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub random_seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: MaxSamples::Auto,
            random_seed: 42,
        }
    }
}

/// Optional pre-pipeline cleanup applied by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Rows with a negative value in this column are discarded
    pub drop_negative: Option<String>,
    /// Constant columns removed before feature derivation
    pub drop_columns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            drop_negative: Some("idle".to_string()),
            drop_columns: ["devtmpfs", "irq", "steal", "guest", "mem_total", "swap_total"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Counter the difference features are derived from
    pub base_column: String,
    /// Ordered model inputs; derived or raw counter names
    pub features: Vec<String>,
    pub train_fraction: f64,
    pub model: ModelConfig,
    pub threshold_scope: ThresholdScope,
    /// Cap on anomalies handed to the notifier per run
    pub max_notifications: usize,
    pub cleanup: CleanupConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_column: "sys".to_string(),
            features: [
                "sys",
                "sys_diff",
                "sys_diff_mean_ratio",
                "sys_diff_threshold_ratio",
                "usr",
                "sda1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            train_fraction: DEFAULT_TRAIN_FRACTION,
            model: ModelConfig::default(),
            threshold_scope: ThresholdScope::default(),
            max_notifications: 1000,
            cleanup: CleanupConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::Config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_column.trim().is_empty() {
            return Err(PipelineError::Config("base_column is empty".into()));
        }
        if self.features.is_empty() {
            return Err(PipelineError::Config("features list is empty".into()));
        }
        let mut seen = HashSet::new();
        for f in &self.features {
            if !seen.insert(f.as_str()) {
                return Err(PipelineError::Config(format!("duplicate feature '{}'", f)));
            }
        }
        if let Some(column) = &self.cleanup.drop_negative {
            if self.cleanup.drop_columns.contains(column) {
                return Err(PipelineError::Config(format!(
                    "column '{}' is both filtered and dropped",
                    column
                )));
            }
        }
        if self.cleanup.drop_columns.contains(&self.base_column) {
            return Err(PipelineError::Config(format!(
                "base column '{}' is listed for removal",
                self.base_column
            )));
        }
        validate_fraction(self.train_fraction)?;
        if self.model.n_estimators == 0 {
            return Err(PipelineError::Config("n_estimators must be positive".into()));
        }
        self.model.max_samples.validate()?;
        if self.max_notifications == 0 {
            return Err(PipelineError::Config("max_notifications must be positive".into()));
        }
        Ok(())
    }
}
