//! Isolation Forest for Multivariate Outlier Detection
//!
//! Points that are few and different get isolated by fewer random axis-aligned
//! cuts, so their average path length across an ensemble of random trees is
//! short. Path lengths are normalized by `c(n)`, the expected unsuccessful
//! search length in a binary search tree of `n` points.
//!
//! Scores follow the usual convention: `score_samples` returns `-s(x)` where
//! `s(x) = 2^(-E[h(x)] / c(psi))`, so lower means more abnormal. The decision
//! offset is the `contamination` percentile of the training scores.
//!
//! Reference: "Isolation Forest" (Liu, Ting, Zhou, ICDM 2008)

use super::OutlierDetector;
use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Default subsample cap for `MaxSamples::Auto`
pub const AUTO_MAX_SAMPLES: usize = 256;

/// Largest contamination accepted by the forest
pub const MAX_CONTAMINATION: f64 = 0.5;

/// Subsample size policy per tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaxSamples {
    /// `min(256, n)`
    #[default]
    Auto,
    /// Fixed count, clipped to the number of training rows
    Count(usize),
    /// Fraction of the training rows, in `(0, 1]`
    Fraction(f64),
}

impl MaxSamples {
    pub fn validate(&self) -> Result<()> {
        match *self {
            MaxSamples::Auto => Ok(()),
            MaxSamples::Count(0) => Err(PipelineError::Config(
                "max_samples count must be positive".into(),
            )),
            MaxSamples::Count(_) => Ok(()),
            MaxSamples::Fraction(f) if f > 0.0 && f <= 1.0 => Ok(()),
            MaxSamples::Fraction(f) => Err(PipelineError::Config(format!(
                "max_samples fraction must be in (0, 1], got {}",
                f
            ))),
        }
    }

    fn resolve(&self, n: usize) -> usize {
        let size = match *self {
            MaxSamples::Auto => AUTO_MAX_SAMPLES.min(n),
            MaxSamples::Count(c) => c.min(n),
            MaxSamples::Fraction(f) => (f * n as f64) as usize,
        };
        size.max(1)
    }
}

/// Fitting parameters for [`IsolationForest::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_samples: MaxSamples,
    pub contamination: f64,
    pub seed: u64,
}

/// A node in an isolation tree
#[derive(Serialize, Deserialize, Clone, Debug)]
enum IsoNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
    /// External node; `size` is the number of training points that reached it
    Leaf { size: usize },
}

/// A single isolation tree
#[derive(Serialize, Deserialize, Clone, Debug)]
struct IsoTree {
    root: IsoNode,
}

impl IsoTree {
    fn build(rng: &mut StdRng, data: &[Vec<f64>], indices: Vec<usize>, max_depth: usize) -> Self {
        Self {
            root: build_recursive(rng, data, indices, 0, max_depth),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                IsoNode::Leaf { size } => return depth + average_path_length(*size),
                IsoNode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *split { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Recursive construction over the subsample `indices`
fn build_recursive(
    rng: &mut StdRng,
    data: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
) -> IsoNode {
    if depth >= max_depth || indices.len() <= 1 {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    // Only features with spread can be cut
    let dims = data[indices[0]].len();
    let mut candidates = Vec::with_capacity(dims);
    for f in 0..dims {
        let (lo, hi) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            (lo.min(data[i][f]), hi.max(data[i][f]))
        });
        if hi > lo {
            candidates.push((f, lo, hi));
        }
    }

    if candidates.is_empty() {
        return IsoNode::Leaf {
            size: indices.len(),
        };
    }

    let (feature, lo, hi) = candidates[rng.random_range(0..candidates.len())];
    let split = lo + rng.random::<f64>() * (hi - lo);

    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| data[i][feature] < split);

    IsoNode::Internal {
        feature,
        split,
        left: Box::new(build_recursive(rng, data, left, depth + 1, max_depth)),
        right: Box::new(build_recursive(rng, data, right, depth + 1, max_depth)),
    }
}

/// `c(n)`: average path length of an unsuccessful BST search over `n` points
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile of an ascending slice, `q` in `[0, 100]`
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Fitted isolation forest
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IsolationForest {
    trees: Vec<IsoTree>,
    /// Subsample size each tree was grown on
    sample_size: usize,
    n_features: usize,
    contamination: f64,
    /// Decision offset; scores below it are outliers
    offset: f64,
}

impl IsolationForest {
    /// Grow the forest on row-major `data` and calibrate the decision offset.
    ///
    /// A contamination of `0.0` is valid: the offset becomes the lowest
    /// training score and no training row is flagged.
    pub fn fit(data: &[Vec<f64>], params: &ForestParams) -> Result<Self> {
        if data.is_empty() {
            return Err(PipelineError::InsufficientData {
                required: 1,
                found: 0,
            });
        }
        if params.n_estimators == 0 {
            return Err(PipelineError::Config("n_estimators must be positive".into()));
        }
        if !(0.0..=MAX_CONTAMINATION).contains(&params.contamination) {
            return Err(PipelineError::Config(format!(
                "contamination must be in [0, {}], got {}",
                MAX_CONTAMINATION, params.contamination
            )));
        }
        params.max_samples.validate()?;

        let n_features = data[0].len();
        for (i, row) in data.iter().enumerate() {
            if row.len() != n_features {
                return Err(PipelineError::Schema(format!(
                    "row {} has {} features, expected {}",
                    i,
                    row.len(),
                    n_features
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(PipelineError::Schema(format!("row {} holds a non-finite feature", i)));
            }
        }

        let sample_size = params.max_samples.resolve(data.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsoTree::build(&mut rng, data, indices, max_depth)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            n_features,
            contamination: params.contamination,
            offset: 0.0,
        };

        let mut scores = forest.score_samples(data);
        scores.sort_by(|a, b| a.total_cmp(b));
        forest.offset = percentile(&scores, 100.0 * params.contamination);

        Ok(forest)
    }

    /// Opposite of the anomaly score: lower is more abnormal, range `[-1, 0]`.
    pub fn score_samples(&self, data: &[Vec<f64>]) -> Vec<f64> {
        let norm = average_path_length(self.sample_size);
        data.iter()
            .map(|point| {
                let mean_depth = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
                    / self.trees.len() as f64;
                // A single-point subsample cannot separate anything
                let s = if norm > 0.0 {
                    2f64.powf(-mean_depth / norm)
                } else {
                    0.5
                };
                -s
            })
            .collect()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }
}

impl OutlierDetector for IsolationForest {
    fn name(&self) -> &str {
        "IsolationForest"
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn decision_function(&self, data: &[Vec<f64>]) -> Vec<f64> {
        self.score_samples(data)
            .into_iter()
            .map(|s| s - self.offset)
            .collect()
    }
}
