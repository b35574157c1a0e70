//! Turning per-point labels into the ordered, caller-facing result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::batch::PointId;
use super::params::{EffectiveClustering, EffectiveReduction};
use crate::cluster::{HdbscanFit, NOISE};

/// One point's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub point_id: PointId,
    /// `None` for noise.
    pub cluster_id: Option<usize>,
    /// Membership strength in `[0, 1]`; `0.0` for noise.
    pub probability: f32,
}

/// A group of points sharing a cluster label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Label assigned by the clusterer (not renumbered).
    pub id: usize,
    /// Member ids in input order.
    pub member_ids: Vec<PointId>,
    /// Mean membership probability, rounded to 4 decimal places.
    pub avg_probability: f64,
}

/// Parameters that were actually applied, after clamping and fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamsUsed {
    pub clustering: EffectiveClustering,
    /// `None` when reduction was disabled, skipped, or unavailable.
    pub reduction: Option<EffectiveReduction>,
}

/// Outcome of one clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    /// Clusters by descending size, ties by ascending id.
    pub clusters: Vec<Cluster>,
    /// Ids of points assigned to no cluster, in input order.
    pub noise_ids: Vec<PointId>,
    pub cluster_count: usize,
    pub params_used: ParamsUsed,
}

impl ClusteringResult {
    /// Total number of points the result accounts for.
    pub fn n_points(&self) -> usize {
        self.clusters.iter().map(|c| c.member_ids.len()).sum::<usize>() + self.noise_ids.len()
    }
}

/// Per-point assignments of `fit`, paired with `ids`.
pub fn assignments(ids: &[PointId], fit: &HdbscanFit) -> Vec<ClusterAssignment> {
    ids.iter()
        .zip(fit.labels.iter().zip(&fit.probabilities))
        .map(|(&point_id, (&label, &probability))| ClusterAssignment {
            point_id,
            cluster_id: (label != NOISE).then_some(label),
            probability: if label == NOISE { 0.0 } else { probability },
        })
        .collect()
}

/// Group `fit` by label and order the clusters.
pub fn assemble(
    ids: &[PointId],
    fit: &HdbscanFit,
    reduction: Option<EffectiveReduction>,
    clustering: EffectiveClustering,
) -> ClusteringResult {
    debug_assert_eq!(ids.len(), fit.labels.len());

    let mut groups: BTreeMap<usize, (Vec<PointId>, f64)> = BTreeMap::new();
    let mut noise_ids = Vec::new();
    for assignment in assignments(ids, fit) {
        match assignment.cluster_id {
            None => noise_ids.push(assignment.point_id),
            Some(id) => {
                let (members, prob_sum) = groups.entry(id).or_default();
                members.push(assignment.point_id);
                *prob_sum += f64::from(assignment.probability);
            }
        }
    }

    // BTreeMap yields ascending ids; the stable sort keeps that order among equal sizes.
    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .map(|(id, (member_ids, prob_sum))| Cluster {
            id,
            avg_probability: round4(prob_sum / member_ids.len() as f64),
            member_ids,
        })
        .collect();
    clusters.sort_by(|a, b| b.member_ids.len().cmp(&a.member_ids.len()));

    ClusteringResult {
        cluster_count: clusters.len(),
        clusters,
        noise_ids,
        params_used: ParamsUsed {
            clustering,
            reduction,
        },
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
