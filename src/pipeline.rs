//! Training and scoring workflows.
//!
//! Both are straight-line: each stage consumes its whole input before the
//! next starts, and the first error aborts the run. Nothing is persisted or
//! notified until every stage before it has succeeded.

use crate::config::{PipelineConfig, ThresholdScope};
use crate::error::{PipelineError, Result};
use crate::features::{self, DiffStats, FeatureFrame};
use crate::label::{self, Label, Labels};
use crate::model::{self, ModelSchema, ModelStore, TrainedModel};
use crate::notify::{self, AnomalyRecord, Notifier};
use crate::split;
use crate::telemetry::TelemetryRow;
use std::path::Path;
use tracing::{debug, info};

/// Result of a training run.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    /// Statistics over the full training batch
    pub stats: DiffStats,
    /// Threshold labels for every input row
    pub labels: Labels,
    pub training_rows: usize,
    pub remaining_rows: usize,
}

/// Ordered anomalies from one scoring run, already capped.
#[derive(Debug, Clone, Default)]
pub struct AnomalyStream {
    pub records: Vec<AnomalyRecord>,
    pub scored_rows: usize,
    /// Anomalies predicted before the cap was applied
    pub total_anomalies: usize,
    /// Statistics the ratio features were computed against
    pub stats: Option<DiffStats>,
}

impl AnomalyStream {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn truncated(&self) -> bool {
        self.total_anomalies > self.records.len()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Derive, label over the full batch, split, and fit on the leading slice.
    pub fn train(&self, rows: &[TelemetryRow]) -> Result<TrainingOutcome> {
        let cfg = &self.config;
        info!(rows = rows.len(), base = %cfg.base_column, "Training run started.");

        let frame = features::derive(rows, &cfg.base_column)?;
        let stats = *frame.stats();
        let labels = label::assign(&frame, &frame.names().diff, stats.threshold)?;
        info!(
            threshold = stats.threshold,
            mean = stats.mean,
            anomalies = labels.anomaly_count(),
            "Threshold labels assigned."
        );

        let matrix = frame.matrix(&cfg.features)?;
        let (train_x, rest_x) = split::split(&matrix, cfg.train_fraction)?;
        if train_x.is_empty() {
            return Err(PipelineError::InsufficientData {
                required: 1,
                found: 0,
            });
        }
        let train_labels = Labels::from(&labels.as_slice()[..train_x.len()]);
        debug!(
            training = train_x.len(),
            remaining = rest_x.len(),
            contamination = train_labels.contamination(),
            "Training slice selected."
        );

        let schema = ModelSchema {
            base_column: cfg.base_column.clone(),
            feature_names: cfg.features.clone(),
            training_stats: stats,
        };
        let model = model::fit(train_x, &train_labels, &cfg.model, schema)?;

        Ok(TrainingOutcome {
            model,
            stats,
            labels,
            training_rows: train_x.len(),
            remaining_rows: rest_x.len(),
        })
    }

    /// Train, then hand the model to `store`. The store sees nothing on failure.
    pub fn train_and_persist(
        &self,
        rows: &[TelemetryRow],
        store: &dyn ModelStore,
    ) -> Result<TrainingOutcome> {
        let outcome = self.train(rows)?;
        store.save(&outcome.model)?;
        Ok(outcome)
    }

    fn frame_for_scoring<'a>(
        &self,
        model: &TrainedModel,
        rows: &'a [TelemetryRow],
    ) -> Result<FeatureFrame<'a>> {
        match self.config.threshold_scope {
            ThresholdScope::Batch => features::derive(rows, &self.config.base_column),
            ThresholdScope::Training => features::derive_with_stats(
                rows,
                &self.config.base_column,
                model.schema().training_stats,
            ),
        }
    }

    /// Score every row and return the anomalous ones in input order, capped
    /// at `max_notifications`.
    pub fn score(&self, model: &TrainedModel, rows: &[TelemetryRow]) -> Result<AnomalyStream> {
        let cfg = &self.config;
        model.ensure_compatible(&cfg.base_column, &cfg.features)?;

        if rows.is_empty() {
            debug!("Empty batch, nothing to score.");
            return Ok(AnomalyStream::default());
        }

        let frame = self.frame_for_scoring(model, rows)?;
        let matrix = frame.matrix(&cfg.features)?;
        let predicted = model.score(&matrix)?;

        let total_anomalies = predicted.iter().filter(|l| l.is_anomalous()).count();
        let records: Vec<AnomalyRecord> = predicted
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_anomalous())
            .take(cfg.max_notifications)
            .map(|(i, _)| AnomalyRecord {
                index: i,
                timestamp: rows[i].timestamp,
                label: Label::Anomalous,
                values: frame.record(i),
            })
            .collect();

        info!(
            rows = rows.len(),
            anomalies = total_anomalies,
            emitted = records.len(),
            scope = ?cfg.threshold_scope,
            "Scoring run finished."
        );

        Ok(AnomalyStream {
            records,
            scored_rows: rows.len(),
            total_anomalies,
            stats: Some(*frame.stats()),
        })
    }

    /// Score, then pass the capped stream to `notifier` in one call.
    pub fn score_and_notify(
        &self,
        model: &TrainedModel,
        rows: &[TelemetryRow],
        notifier: &mut dyn Notifier,
    ) -> Result<AnomalyStream> {
        let stream = self.score(model, rows)?;
        if !stream.is_empty() {
            notifier.notify(&stream.records)?;
        }
        Ok(stream)
    }

    /// Score, notify, then replace `path` with the capped stream as JSON
    /// lines. A failed run leaves an existing file as it was.
    pub fn score_to_file(
        &self,
        model: &TrainedModel,
        rows: &[TelemetryRow],
        notifier: &mut dyn Notifier,
        path: &Path,
    ) -> Result<AnomalyStream> {
        let stream = self.score_and_notify(model, rows, notifier)?;
        notify::write_json_lines_atomic(path, &stream.records)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModelStore;
    use chrono::{TimeZone, Utc};

    fn rows(values: &[f64]) -> Vec<TelemetryRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TelemetryRow::new(Utc.timestamp_opt(1_700_000_000 + i as i64 * 30, 0).unwrap())
                    .with("sys", *v)
                    .with("usr", 2.0 + (i % 3) as f64)
            })
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            features: vec![
                "sys".into(),
                "sys_diff".into(),
                "sys_diff_mean_ratio".into(),
                "sys_diff_threshold_ratio".into(),
                "usr".into(),
            ],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let bad = PipelineConfig {
            train_fraction: 2.0,
            ..config()
        };
        assert!(matches!(Pipeline::new(bad), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_training_uses_leading_slice() {
        let values: Vec<f64> = (0..30).map(|i| 10.0 + i as f64 * 0.5).collect();
        let data = rows(&values);
        let pipeline = Pipeline::new(config()).unwrap();
        let outcome = pipeline.train(&data).unwrap();

        assert_eq!(outcome.training_rows, 20);
        assert_eq!(outcome.remaining_rows, 10);
        assert_eq!(outcome.labels.len(), 30);
        assert_eq!(outcome.model.training_rows(), 20);
        assert_eq!(outcome.model.schema().training_stats, outcome.stats);
    }

    #[test]
    fn test_failed_training_persists_nothing() {
        let data = rows(&[4.0]);
        let store = MemoryModelStore::new();
        let pipeline = Pipeline::new(config()).unwrap();
        assert!(matches!(
            pipeline.train_and_persist(&data, &store),
            Err(PipelineError::InsufficientData { .. })
        ));
        assert!(store.bytes().is_none());
    }

    #[test]
    fn test_falling_series_overshoots_contamination() {
        // Negative threshold: the zero-filled first diff is the only outlier
        let values: Vec<f64> = (0..10).map(|i| 100.0 - 10.0 * i as f64).collect();
        let pipeline = Pipeline::new(PipelineConfig {
            train_fraction: 0.1,
            ..config()
        })
        .unwrap();
        match pipeline.train(&rows(&values)) {
            Err(PipelineError::Config(msg)) => {
                assert!(msg.contains("training labels"), "{}", msg);
                assert!(msg.contains("1 of 1"), "{}", msg);
            }
            other => panic!("expected contamination error, got {:?}", other.map(|o| o.stats)),
        }
    }

    #[test]
    fn test_failed_score_keeps_previous_output() {
        let values: Vec<f64> = (0..40).map(|i| 5.0 + i as f64 * 0.5).collect();
        let pipeline = Pipeline::new(config()).unwrap();
        let model = pipeline.train(&rows(&values)).unwrap().model;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "previous run\n").unwrap();

        let single = rows(&[7.0]);
        let mut sink = crate::notify::TracingNotifier::new();
        assert!(matches!(
            pipeline.score_to_file(&model, &single, &mut sink, &path),
            Err(PipelineError::InsufficientData { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\n");
        assert!(!dir.path().join("out.jsonl.tmp").exists());

        let stream = pipeline
            .score_to_file(&model, &rows(&values), &mut sink, &path)
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), stream.records.len());
    }

    #[test]
    fn test_empty_batch_scores_empty() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let pipeline = Pipeline::new(config()).unwrap();
        let model = pipeline.train(&rows(&values)).unwrap().model;
        let stream = pipeline.score(&model, &[]).unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.scored_rows, 0);
    }

    #[test]
    fn test_incompatible_model_rejected() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let pipeline = Pipeline::new(config()).unwrap();
        let model = pipeline.train(&rows(&values)).unwrap().model;

        let other = Pipeline::new(PipelineConfig {
            features: vec!["sys".into(), "sys_diff".into()],
            ..config()
        })
        .unwrap();
        assert!(matches!(
            other.score(&model, &rows(&values)),
            Err(PipelineError::ModelState(_))
        ));
    }
}
