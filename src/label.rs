//! Binary anomaly labels.

use crate::error::Result;
use crate::features::FeatureFrame;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outlier label using the {1, -1} convention shared by the statistical
/// labeler and the model. Serializes as the bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Label {
    Normal = 1,
    Anomalous = -1,
}

impl Label {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            1 => Some(Label::Normal),
            -1 => Some(Label::Anomalous),
            _ => None,
        }
    }

    pub fn is_anomalous(self) -> bool {
        self == Label::Anomalous
    }

    /// Strictly greater than the threshold is anomalous; ties are normal.
    pub fn from_threshold(value: f64, threshold: f64) -> Self {
        if value > threshold {
            Label::Anomalous
        } else {
            Label::Normal
        }
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = i8::deserialize(deserializer)?;
        Label::from_i8(value).ok_or_else(|| {
            serde::de::Error::custom(format!("label must be 1 or -1, got {}", value))
        })
    }
}

/// Ordered labels for a batch of rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.0
    }

    pub fn anomaly_count(&self) -> usize {
        self.0.iter().filter(|l| l.is_anomalous()).count()
    }

    /// Fraction of anomalous labels; `0.0` for an empty set.
    pub fn contamination(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.anomaly_count() as f64 / self.0.len() as f64
    }
}

impl From<Vec<Label>> for Labels {
    fn from(labels: Vec<Label>) -> Self {
        Self(labels)
    }
}

impl From<&[Label]> for Labels {
    fn from(labels: &[Label]) -> Self {
        Self(labels.to_vec())
    }
}

/// Label each row by comparing `column` against `threshold`.
pub fn assign(frame: &FeatureFrame<'_>, column: &str, threshold: f64) -> Result<Labels> {
    let values = frame.column(column)?;
    Ok(values
        .into_iter()
        .map(|v| Label::from_threshold(v, threshold))
        .collect::<Vec<_>>()
        .into())
}
