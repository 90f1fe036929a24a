//! hostwatch: first-difference anomaly scoring for host telemetry.
//!
//! Raw counter rows become difference and ratio features, a mean + 2σ
//! threshold labels the training batch, and an isolation forest fitted on the
//! leading slice scores later batches. Rows it predicts anomalous form an
//! ordered, capped stream handed to a [`notify::Notifier`].

pub mod algo;
pub mod config;
pub mod error;
pub mod features;
pub mod label;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod split;
pub mod telemetry;

pub use config::{PipelineConfig, ThresholdScope};
pub use error::{PipelineError, Result};
pub use label::Label;
pub use model::{FileModelStore, ModelStore, TrainedModel};
pub use pipeline::{AnomalyStream, Pipeline, TrainingOutcome};
pub use telemetry::TelemetryRow;
