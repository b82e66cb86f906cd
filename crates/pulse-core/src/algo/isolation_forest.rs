//! Isolation Forest over the four service-health metrics
//!
//! Anomalies are few and different, so random axis-aligned cuts separate them
//! from the rest of the data in fewer steps than normal points. The forest is
//! trained once on a baseline window and then scores every later snapshot by
//! the average depth at which it gets isolated across all trees.
//!
//! Key properties:
//! - No distance or density metric, O(log n) per tree per query
//! - Trees are immutable after training; the forest never retrains
//! - Randomness is a type parameter so tests can use a seeded `StdRng`
//!
//! Reference: "Isolation Forest" (Liu, Ting, Zhou, ICDM 2008)

use crate::snapshot::{MetricKind, MetricSnapshot, NUM_METRICS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Minimum complete baseline snapshots required to train.
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// Score reported before training.
pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees in the forest
    pub trees: usize,
    /// Points drawn (without replacement) per tree
    pub subsample_size: usize,
    /// Fixed seed for reproducible forests; OS entropy when unset
    pub seed: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 80,
            subsample_size: 128,
            seed: None,
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
///
/// Used both as the leaf correction for truncated subtrees and as the
/// normalization constant of the final score.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A node in an isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature: MetricKind,
        split: f64,
        /// Range of `feature` over the partition this node was cut from
        min: f64,
        max: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        /// Points of the training subsample that ended here
        size: usize,
    },
}

/// A single immutable isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    /// Build a tree over `points`, cutting at most `max_depth` levels deep.
    pub fn build<R: Rng + ?Sized>(
        points: &[[f64; NUM_METRICS]],
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let mut working: Vec<[f64; NUM_METRICS]> = points.to_vec();
        Self {
            root: build_recursive(&mut working, 0, max_depth, rng),
        }
    }

    /// Path length of `point` through this tree, including the leaf correction.
    pub fn path_length(&self, point: &[f64; NUM_METRICS]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;

        loop {
            match node {
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
                IsolationNode::Internal {
                    feature,
                    split,
                    min,
                    max,
                    left,
                    right,
                } => {
                    let value = point[feature.index()];
                    // Range escape: farther outside the node's range than the
                    // range is wide. Isolated before this cut.
                    let width = *max - *min;
                    if value < *min - width || value > *max + width {
                        return depth;
                    }

                    depth += 1.0;
                    node = if value < *split {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }

    /// Depth of the deepest leaf.
    pub fn depth(&self) -> usize {
        fn walk(node: &IsolationNode) -> usize {
            match node {
                IsolationNode::Leaf { .. } => 0,
                IsolationNode::Internal { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

/// Recursive partitioning of `points` in place.
fn build_recursive<R: Rng + ?Sized>(
    points: &mut [[f64; NUM_METRICS]],
    depth: usize,
    max_depth: usize,
    rng: &mut R,
) -> IsolationNode {
    if depth >= max_depth || points.len() <= 1 {
        return IsolationNode::Leaf { size: points.len() };
    }

    let feature = MetricKind::ALL[rng.random_range(0..NUM_METRICS)];
    let idx = feature.index();

    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[idx]), hi.max(p[idx]))
        });

    // No separation possible along this feature
    if min >= max {
        return IsolationNode::Leaf { size: points.len() };
    }

    let mut split = min + rng.random::<f64>() * (max - min);
    if split <= min {
        split = min + (max - min) * 0.5;
    }

    // Partition: values below the split to the front
    let mut boundary = 0;
    for i in 0..points.len() {
        if points[i][idx] < split {
            points.swap(i, boundary);
            boundary += 1;
        }
    }

    let (lower, upper) = points.split_at_mut(boundary);
    let left = build_recursive(lower, depth + 1, max_depth, rng);
    let right = build_recursive(upper, depth + 1, max_depth, rng);

    IsolationNode::Internal {
        feature,
        split,
        min,
        max,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Ensemble of isolation trees trained once on a baseline window
pub struct AnomalyForest<R: Rng = StdRng> {
    trees: Vec<IsolationTree>,
    /// c(effective subsample size)
    normalizer: f64,
    num_trees: usize,
    subsample_size: usize,
    rng: R,
}

impl AnomalyForest<StdRng> {
    /// Untrained forest with default parameters, seeded from OS entropy
    pub fn new() -> Self {
        Self::from_config(&ForestConfig::default())
    }

    /// Untrained forest whose trees are fully determined by `seed`
    pub fn seeded(seed: u64) -> Self {
        Self::from_config(&ForestConfig {
            seed: Some(seed),
            ..ForestConfig::default()
        })
    }

    pub fn from_config(config: &ForestConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_rng(rng, config.trees, config.subsample_size)
    }
}

impl Default for AnomalyForest<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> AnomalyForest<R> {
    /// Untrained forest drawing splits from `rng`
    pub fn with_rng(rng: R, num_trees: usize, subsample_size: usize) -> Self {
        Self {
            trees: Vec::new(),
            normalizer: 0.0,
            num_trees: num_trees.max(1),
            subsample_size: subsample_size.max(2),
            rng,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    /// Train on the baseline window. Returns false (and stays untrained) when
    /// fewer than `MIN_TRAINING_SAMPLES` complete snapshots are available or
    /// the forest was already trained.
    pub fn train(&mut self, baseline: &[MetricSnapshot]) -> bool {
        if self.is_trained() {
            return false;
        }

        let points: Vec<[f64; NUM_METRICS]> = baseline
            .iter()
            .filter(|s| s.is_complete())
            .map(MetricSnapshot::values)
            .collect();

        if points.len() < MIN_TRAINING_SAMPLES {
            return false;
        }

        let sample_size = self.subsample_size.min(points.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut trees = Vec::with_capacity(self.num_trees);
        let mut sample = Vec::with_capacity(sample_size);
        for _ in 0..self.num_trees {
            sample.clear();
            sample.extend(
                rand::seq::index::sample(&mut self.rng, points.len(), sample_size)
                    .into_iter()
                    .map(|i| points[i]),
            );
            trees.push(IsolationTree::build(&sample, max_depth, &mut self.rng));
        }

        self.trees = trees;
        self.normalizer = average_path_length(sample_size);
        true
    }

    /// Anomaly score in [0, 1]. ~0.5 is ordinary, near 1.0 is easily isolated.
    ///
    /// Callers must pass a complete snapshot; non-finite values route as if
    /// they were on the right of every cut.
    pub fn score(&self, point: &MetricSnapshot) -> f64 {
        self.score_values(&point.values())
    }

    pub fn score_values(&self, values: &[f64; NUM_METRICS]) -> f64 {
        if !self.is_trained() || self.normalizer <= 0.0 {
            return NEUTRAL_SCORE;
        }

        let total: f64 = self.trees.iter().map(|t| t.path_length(values)).sum();
        let avg_path = total / self.trees.len() as f64;

        2f64.powf(-avg_path / self.normalizer).clamp(0.0, 1.0)
    }
}
