//! Trained model wrapper and persistence.
//!
//! A [`TrainedModel`] bundles the fitted detector with what scoring needs to
//! rebuild compatible inputs: the ordered feature names, the base column and
//! the training-scope difference statistics. Bytes on disk are a versioned
//! envelope with an xxh3 checksum over the bincode payload.

use crate::algo::isolation_forest::MAX_CONTAMINATION;
use crate::algo::{ForestParams, IsolationForest, OutlierDetector};
use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::features::DiffStats;
use crate::label::{Label, Labels};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Version for model format migrations
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Input layout the model was trained against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub base_column: String,
    pub feature_names: Vec<String>,
    pub training_stats: DiffStats,
}

/// Immutable fitted state. Holds no training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    detector: IsolationForest,
    schema: ModelSchema,
    params: ForestParams,
    training_rows: usize,
    trained_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ModelEnvelope {
    version: u32,
    checksum: u64,
    payload: Vec<u8>,
}

/// Fit the detector on the training slice.
///
/// Contamination is the anomalous share of `labels`, which must line up with
/// `features` row for row.
pub fn fit(
    features: &[Vec<f64>],
    labels: &Labels,
    config: &ModelConfig,
    schema: ModelSchema,
) -> Result<TrainedModel> {
    if features.len() != labels.len() {
        return Err(PipelineError::Schema(format!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        )));
    }
    if let Some(row) = features.first() {
        if row.len() != schema.feature_names.len() {
            return Err(PipelineError::Schema(format!(
                "feature rows have {} columns, schema names {}",
                row.len(),
                schema.feature_names.len()
            )));
        }
    }

    let contamination = labels.contamination();
    if contamination > MAX_CONTAMINATION {
        return Err(PipelineError::Config(format!(
            "training labels are {} of {} anomalous; contamination {} exceeds {}, \
             widen train_fraction or check the threshold",
            labels.anomaly_count(),
            labels.len(),
            contamination,
            MAX_CONTAMINATION
        )));
    }

    let params = ForestParams {
        n_estimators: config.n_estimators,
        max_samples: config.max_samples,
        contamination,
        seed: config.random_seed,
    };

    let detector = IsolationForest::fit(features, &params)?;
    info!(
        rows = features.len(),
        trees = detector.num_trees(),
        sample_size = detector.sample_size(),
        contamination = params.contamination,
        "Model fitted."
    );

    Ok(TrainedModel {
        detector,
        schema,
        params,
        training_rows: features.len(),
        trained_at: Utc::now(),
    })
}

impl TrainedModel {
    /// Predict a label per feature row. Empty input yields an empty result.
    pub fn score(&self, features: &[Vec<f64>]) -> Result<Vec<Label>> {
        let width = self.detector.n_features();
        for (i, row) in features.iter().enumerate() {
            if row.len() != width {
                return Err(PipelineError::Schema(format!(
                    "row {} has {} features, model expects {}",
                    i,
                    row.len(),
                    width
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Schema(format!("row {} holds a non-finite feature", i)));
            }
        }
        Ok(self.detector.predict(features))
    }

    /// Fail unless `features` matches the trained feature order exactly.
    pub fn ensure_compatible(&self, base_column: &str, features: &[String]) -> Result<()> {
        if self.schema.base_column != base_column || self.schema.feature_names != features {
            return Err(PipelineError::ModelState(format!(
                "model trained on base '{}' with features {:?}, configured base '{}' with {:?}",
                self.schema.base_column, self.schema.feature_names, base_column, features
            )));
        }
        Ok(())
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn contamination(&self) -> f64 {
        self.params.contamination
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| PipelineError::ModelState(format!("serialization failed: {}", e)))?;
        let envelope = ModelEnvelope {
            version: MODEL_FORMAT_VERSION,
            checksum: xxhash_rust::xxh3::xxh3_64(&payload),
            payload,
        };
        bincode::serialize(&envelope)
            .map_err(|e| PipelineError::ModelState(format!("serialization failed: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: ModelEnvelope = bincode::deserialize(bytes)
            .map_err(|e| PipelineError::ModelState(format!("corrupt model envelope: {}", e)))?;

        if envelope.version > MODEL_FORMAT_VERSION {
            return Err(PipelineError::ModelState(format!(
                "unsupported model version {} (max supported: {})",
                envelope.version, MODEL_FORMAT_VERSION
            )));
        }

        let checksum = xxhash_rust::xxh3::xxh3_64(&envelope.payload);
        if checksum != envelope.checksum {
            return Err(PipelineError::ModelState(format!(
                "checksum mismatch: stored {:016x}, computed {:016x}",
                envelope.checksum, checksum
            )));
        }

        bincode::deserialize(&envelope.payload)
            .map_err(|e| PipelineError::ModelState(format!("corrupt model payload: {}", e)))
    }
}

/// Persistence slot holding one serialized model.
pub trait ModelStore {
    fn save(&self, model: &TrainedModel) -> Result<()>;
    fn load(&self) -> Result<TrainedModel>;
}

/// File-backed store. Writes go to a sibling temp file and are renamed into
/// place, so readers see either the old model or the new one.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "model".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, model: &TrainedModel) -> Result<()> {
        let bytes = model.to_bytes()?;
        let tmp = self.temp_path();

        let written = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(path = %self.path.display(), bytes = bytes.len(), "Model persisted.");
        Ok(())
    }

    fn load(&self) -> Result<TrainedModel> {
        let bytes = std::fs::read(&self.path)?;
        let model = TrainedModel::from_bytes(&bytes)?;
        debug!(path = %self.path.display(), trained_at = %model.trained_at, "Model loaded.");
        Ok(model)
    }
}

/// In-process store, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    slot: Mutex<Option<Vec<u8>>>,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&self, model: &TrainedModel) -> Result<()> {
        let bytes = model.to_bytes()?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| PipelineError::ModelState("model slot poisoned".into()))?;
        *slot = Some(bytes);
        Ok(())
    }

    fn load(&self) -> Result<TrainedModel> {
        let bytes = self
            .bytes()
            .ok_or_else(|| PipelineError::ModelState("no model stored".into()))?;
        TrainedModel::from_bytes(&bytes)
    }
}
