pub mod isolation_forest;

pub use isolation_forest::{ForestParams, IsolationForest, MaxSamples};

use crate::label::Label;

/// Interface for batch outlier detectors fitted offline and scored later.
pub trait OutlierDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Width of the feature rows the detector was fitted on
    fn n_features(&self) -> usize;

    /// Signed score per row; negative means outlier.
    fn decision_function(&self, data: &[Vec<f64>]) -> Vec<f64>;

    fn predict(&self, data: &[Vec<f64>]) -> Vec<Label> {
        self.decision_function(data)
            .into_iter()
            .map(|d| if d < 0.0 { Label::Anomalous } else { Label::Normal })
            .collect()
    }
}
