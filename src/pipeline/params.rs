//! Clustering parameters and their normalization against the actual batch.
//!
//! Callers ask for parameters without knowing how many points a batch will hold,
//! so requests are clamped to what the batch can support before any stage runs.
//! The clamped values are echoed back in every result as `params_used`.

use serde::{Deserialize, Serialize};

use crate::cluster::{DistanceMetric, Hdbscan, SelectionMethod};
use crate::error::{Error, Result};

/// Requested dimensionality reduction settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionParams {
    /// Whether to reduce before clustering.
    pub enabled: bool,
    /// Output dimensionality (>= 2).
    pub target_dims: usize,
    /// Neighbour count of the neighbour graph (>= 2).
    pub neighbors: usize,
    /// Minimum spacing of points in the projection, in `[0, 1]`.
    pub min_dist: f32,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            enabled: false,
            target_dims: 50,
            neighbors: 15,
            min_dist: 0.1,
        }
    }
}

/// Requested density clustering settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    /// Smallest group reported as a cluster.
    pub min_cluster_size: usize,
    /// Core-distance neighbour count; `None` means "same as `min_cluster_size`".
    pub min_samples: Option<usize>,
    /// Distance below which selected clusters merge into their parent.
    pub selection_epsilon: f32,
    /// Flat cluster selection policy.
    pub selection_method: SelectionMethod,
    /// Metric over the (possibly reduced) vectors.
    pub distance_metric: DistanceMetric,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            selection_epsilon: 0.0,
            selection_method: SelectionMethod::Eom,
            distance_metric: DistanceMetric::Cosine,
        }
    }
}

/// Full request configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Reduction stage settings.
    pub reduction: ReductionParams,
    /// Clustering stage settings.
    pub clustering: ClusteringParams,
}

/// Reduction settings that will actually be applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveReduction {
    pub target_dims: usize,
    pub neighbors: usize,
    pub min_dist: f32,
}

/// Clustering settings that will actually be applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveClustering {
    pub min_cluster_size: usize,
    pub min_samples: Option<usize>,
    pub selection_epsilon: f32,
    pub selection_method: SelectionMethod,
    pub metric: DistanceMetric,
}

impl EffectiveClustering {
    /// Build the clusterer these settings describe.
    pub fn clusterer(&self) -> Hdbscan {
        let hdbscan = Hdbscan::new()
            .with_min_cluster_size(self.min_cluster_size)
            .with_selection_epsilon(self.selection_epsilon)
            .with_selection_method(self.selection_method)
            .with_metric(self.metric);
        match self.min_samples {
            Some(k) => hdbscan.with_min_samples(k),
            None => hdbscan,
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedParams {
    /// `Some` iff reduction will run.
    pub reduction: Option<EffectiveReduction>,
    pub clustering: EffectiveClustering,
    requested_metric: DistanceMetric,
}

impl NormalizedParams {
    /// Drop the reduction stage, restoring the caller's metric.
    pub fn without_reduction(self) -> Self {
        Self {
            reduction: None,
            clustering: EffectiveClustering {
                metric: self.requested_metric,
                ..self.clustering
            },
            requested_metric: self.requested_metric,
        }
    }
}

/// Clamp requested parameters to a batch of `n_points` vectors of `vector_dim` dimensions.
///
/// - `min_cluster_size` is clamped to `[2, n_points / 2]` (2 wins when `n_points < 4`).
/// - `min_samples`, when set, is capped at `n_points - 1`.
/// - Reduction runs only when enabled and `n_points > target_dims`; it then uses
///   `min(target_dims, vector_dim)` dimensions, `min(neighbors, n_points - 1)`
///   neighbours, and forces the Euclidean metric on the reduced vectors.
///
/// # Errors
///
/// [`Error::InvalidInput`] for fewer than two points, [`Error::InvalidParameter`] for
/// out-of-range requests.
pub fn normalize(
    n_points: usize,
    vector_dim: usize,
    reduction: &ReductionParams,
    clustering: &ClusteringParams,
) -> Result<NormalizedParams> {
    if n_points < 2 {
        return Err(Error::InvalidInput(format!(
            "at least 2 points are required, got {n_points}"
        )));
    }
    if vector_dim == 0 {
        return Err(Error::invalid_parameter("dimension", "must be at least 1"));
    }
    validate(reduction, clustering)?;

    let min_cluster_size = clustering.min_cluster_size.min(n_points / 2).max(2);
    let min_samples = clustering.min_samples.map(|k| k.min(n_points - 1));

    let reduction = (reduction.enabled && n_points > reduction.target_dims).then(|| EffectiveReduction {
        target_dims: reduction.target_dims.min(vector_dim),
        neighbors: reduction.neighbors.min(n_points - 1),
        min_dist: reduction.min_dist,
    });

    // The projection does not preserve angles, so cosine no longer means anything there.
    let metric = if reduction.is_some() {
        DistanceMetric::Euclidean
    } else {
        clustering.distance_metric
    };

    Ok(NormalizedParams {
        reduction,
        clustering: EffectiveClustering {
            min_cluster_size,
            min_samples,
            selection_epsilon: clustering.selection_epsilon,
            selection_method: clustering.selection_method,
            metric,
        },
        requested_metric: clustering.distance_metric,
    })
}

fn validate(reduction: &ReductionParams, clustering: &ClusteringParams) -> Result<()> {
    if clustering.min_samples == Some(0) {
        return Err(Error::invalid_parameter("min_samples", "must be at least 1"));
    }
    if !clustering.selection_epsilon.is_finite() || clustering.selection_epsilon < 0.0 {
        return Err(Error::invalid_parameter(
            "selection_epsilon",
            format!("must be a finite value >= 0, got {}", clustering.selection_epsilon),
        ));
    }
    if reduction.target_dims < 2 {
        return Err(Error::invalid_parameter(
            "target_dims",
            format!("must be at least 2, got {}", reduction.target_dims),
        ));
    }
    if reduction.neighbors < 2 {
        return Err(Error::invalid_parameter(
            "neighbors",
            format!("must be at least 2, got {}", reduction.neighbors),
        ));
    }
    if !(0.0..=1.0).contains(&reduction.min_dist) {
        return Err(Error::invalid_parameter(
            "min_dist",
            format!("must be in [0, 1], got {}", reduction.min_dist),
        ));
    }
    Ok(())
}
