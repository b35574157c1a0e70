//! HDBSCAN: Hierarchical Density-Based Spatial Clustering of Applications with Noise.
//!
//! HDBSCAN (Campello, Moulavi, Sander 2013) extends DBSCAN by removing the global
//! epsilon parameter and instead building a hierarchy of density-based clusters.
//! It selects the most stable clusters from the hierarchy automatically.
//!
//! # Algorithm Outline
//!
//! 1. **Core distance**: For each point, compute the distance to its k-th nearest
//!    other point (k = `min_samples`, defaulting to `min_cluster_size`, capped at
//!    `n - 1`). This estimates local density.
//!
//! 2. **Mutual reachability distance**: For each pair (i, j):
//!    `mrd(i, j) = max(core_dist[i], core_dist[j], dist(i, j))`.
//!    This smooths out density spikes so sparse regions don't create spurious links.
//!
//! 3. **MST on mutual reachability graph**: Build a minimum spanning tree over the
//!    mutual reachability distances using Prim's algorithm (O(n^2)).
//!
//! 4. **Single-linkage tree**: Walk MST edges in ascending distance order, merging
//!    components into a binary dendrogram.
//!
//! 5. **Condensed cluster tree**: Walk the dendrogram top-down. A split where both
//!    sides hold at least `min_cluster_size` points creates two child clusters;
//!    otherwise the small side's points "fall out" of the current cluster at
//!    `lambda = 1 / distance`.
//!
//! 6. **Flat cluster selection**:
//!    - *Excess of mass* (`eom`): select the non-overlapping set of clusters that
//!      maximizes total stability, `sum(child_size * (lambda - lambda_birth))`.
//!    - *Leaf*: select the leaves of the condensed tree.
//!
//!    With `selection_epsilon > 0`, selected clusters born below that distance
//!    threshold are replaced by their closest ancestor born above it.
//!
//! 7. **Labels and probabilities**: points are labeled with the selected cluster that
//!    owns them (noise otherwise). A point's membership probability is its fall-out
//!    lambda divided by the largest fall-out lambda in its cluster.
//!
//! # Complexity
//!
//! O(n^2) time and space for the dense pairwise distance computation.
//! Suitable for datasets up to ~10k-50k points depending on dimensionality.
//!
//! # References
//!
//! Campello, R. J. G. B., Moulavi, D., Sander, J. (2013). "Density-Based Clustering
//! Based on Hierarchical Density Estimates." PAKDD 2013.
//!
//! Malzer, C., Baum, M. (2020). "A Hybrid Approach To Hierarchical Density-based
//! Cluster Selection." (cluster selection epsilon)

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::distance::{pairwise_distances, DistanceMetric};
use super::traits::Clustering;
use super::util::{self, MstEdge, UnionFind};
use crate::error::{Error, Result};

/// Label assigned to points that belong to no cluster.
pub const NOISE: usize = usize::MAX;

/// Policy for choosing flat clusters from the condensed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Excess of Mass: maximize total cluster stability.
    #[default]
    Eom,
    /// Leaf clusters only: the most fine-grained clusters in the hierarchy.
    Leaf,
}

impl SelectionMethod {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionMethod::Eom => "eom",
            SelectionMethod::Leaf => "leaf",
        }
    }
}

/// HDBSCAN clustering algorithm.
#[derive(Debug, Clone)]
pub struct Hdbscan {
    min_samples: Option<usize>,
    min_cluster_size: usize,
    selection_epsilon: f32,
    selection_method: SelectionMethod,
    metric: DistanceMetric,
}

/// Output of [`Hdbscan::fit`]: one label and one membership probability per point.
#[derive(Debug, Clone, PartialEq)]
pub struct HdbscanFit {
    /// Cluster label per point, or [`NOISE`].
    ///
    /// Labels are dense: `0..n_clusters`.
    pub labels: Vec<usize>,
    /// Membership strength per point in `[0, 1]`; `0.0` for noise.
    pub probabilities: Vec<f32>,
}

impl HdbscanFit {
    /// Number of distinct (non-noise) clusters.
    pub fn n_clusters(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l != NOISE)
            .max()
            .map_or(0, |&l| l + 1)
    }
}

impl Hdbscan {
    /// Create a new HDBSCAN clusterer with default parameters.
    ///
    /// Defaults: `min_cluster_size = 5`, `min_samples` unset (falls back to
    /// `min_cluster_size`), excess-of-mass selection, no selection epsilon, Euclidean metric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `min_samples` (k for core distance computation).
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    /// Set `min_cluster_size` (minimum points for a cluster to persist).
    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    /// Set the distance threshold below which selected clusters are merged upwards.
    pub fn with_selection_epsilon(mut self, selection_epsilon: f32) -> Self {
        self.selection_epsilon = selection_epsilon;
        self
    }

    /// Set the flat cluster selection method.
    pub fn with_selection_method(mut self, selection_method: SelectionMethod) -> Self {
        self.selection_method = selection_method;
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Fit and predict, returning `None` for noise points.
    pub fn fit_predict_with_noise(&self, data: &[Vec<f32>]) -> Result<Vec<Option<usize>>> {
        let labels = self.fit_predict(data)?;
        Ok(labels
            .into_iter()
            .map(|l| if l == NOISE { None } else { Some(l) })
            .collect())
    }

    /// Cluster `data`, returning labels and membership probabilities.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] / [`Error::InvalidParameter`] / [`Error::DimensionMismatch`]
    ///   for malformed input or parameters.
    /// - [`Error::ClusteringFailed`] when coordinates (or distances derived from them)
    ///   are not finite.
    pub fn fit(&self, data: &[Vec<f32>]) -> Result<HdbscanFit> {
        let n = data.len();
        self.validate(data)?;

        if n == 1 {
            return Ok(HdbscanFit {
                labels: vec![NOISE],
                probabilities: vec![0.0],
            });
        }

        let dists = pairwise_distances(data, self.metric);
        if dists.iter().any(|d| !d.is_finite()) {
            return Err(Error::ClusteringFailed(format!(
                "non-finite {} distance between points",
                self.metric
            )));
        }

        let k = self.min_samples.unwrap_or(self.min_cluster_size);
        let core_dists = core_distances(&dists, n, k);

        let mst = util::prim_mst(n, |i, j| {
            mutual_reachability(dists[i * n + j], core_dists[i], core_dists[j])
        });

        if mst.iter().all(|e| e.weight <= 0.0) {
            // No density variation at all: every point sits at the same location.
            debug!(n_points = n, "all mutual reachability distances are zero; single cluster");
            return Ok(HdbscanFit {
                labels: vec![0; n],
                probabilities: vec![1.0; n],
            });
        }

        let linkage = single_linkage(&mst, n);
        let condensed = condense_tree(&linkage, n, self.min_cluster_size);
        let fit = extract_clusters(
            &condensed,
            n,
            self.selection_method,
            f64::from(self.selection_epsilon),
        );
        debug!(
            n_points = n,
            n_clusters = fit.n_clusters(),
            method = self.selection_method.as_str(),
            "hdbscan fit complete"
        );
        Ok(fit)
    }

    fn validate(&self, data: &[Vec<f32>]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidInput("empty input".into()));
        }
        if self.min_samples == Some(0) {
            return Err(Error::invalid_parameter("min_samples", "must be at least 1"));
        }
        if self.min_cluster_size < 2 {
            return Err(Error::invalid_parameter("min_cluster_size", "must be at least 2"));
        }
        if !self.selection_epsilon.is_finite() || self.selection_epsilon < 0.0 {
            return Err(Error::invalid_parameter(
                "selection_epsilon",
                "must be a finite value >= 0",
            ));
        }

        let d = data[0].len();
        if d == 0 {
            return Err(Error::invalid_parameter("dimension", "must be at least 1"));
        }
        for point in data.iter().skip(1) {
            if point.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: point.len(),
                });
            }
        }
        if let Some(i) = data.iter().position(|p| p.iter().any(|x| !x.is_finite())) {
            return Err(Error::ClusteringFailed(format!(
                "point {i} has a non-finite coordinate"
            )));
        }
        Ok(())
    }
}

impl Default for Hdbscan {
    fn default() -> Self {
        Self {
            min_samples: None,
            min_cluster_size: 5,
            selection_epsilon: 0.0,
            selection_method: SelectionMethod::Eom,
            metric: DistanceMetric::Euclidean,
        }
    }
}

impl Clustering for Hdbscan {
    fn fit_predict(&self, data: &[Vec<f32>]) -> Result<Vec<usize>> {
        self.fit(data).map(|fit| fit.labels)
    }

    fn n_clusters(&self) -> usize {
        0
    }
}

fn core_distances(dists: &[f32], n: usize, min_samples: usize) -> Vec<f32> {
    // The point itself is not a neighbour: k = 1 is the nearest other point.
    let k = min_samples.clamp(1, n.saturating_sub(1).max(1));
    let mut core = Vec::with_capacity(n);
    for i in 0..n {
        let mut row: Vec<f32> = (0..n)
            .filter(|&j| j != i)
            .map(|j| dists[i * n + j])
            .collect();
        row.sort_by(|a, b| a.total_cmp(b));
        core.push(row.get(k - 1).copied().unwrap_or(0.0));
    }
    core
}

#[inline]
fn mutual_reachability(dist: f32, core_i: f32, core_j: f32) -> f32 {
    dist.max(core_i).max(core_j)
}

// ---------------------------------------------------------------------------
// Single-linkage dendrogram
// ---------------------------------------------------------------------------

/// Internal dendrogram node. Node ids `0..n` are points; node `n + i` is `linkage[i]`.
struct LinkageNode {
    left: usize,
    right: usize,
    distance: f32,
    size: usize,
}

fn single_linkage(mst: &[MstEdge], n: usize) -> Vec<LinkageNode> {
    let mut nodes: Vec<LinkageNode> = Vec::with_capacity(n.saturating_sub(1));
    let mut uf = UnionFind::new(n);
    let mut comp_node: Vec<usize> = (0..n).collect();

    for &MstEdge { a: u, b: v, weight: distance } in mst {
        let ru = uf.find(u);
        let rv = uf.find(v);
        if ru == rv {
            continue;
        }
        let left = comp_node[ru];
        let right = comp_node[rv];
        let size = uf.component_size(ru) + uf.component_size(rv);
        nodes.push(LinkageNode {
            left,
            right,
            distance,
            size,
        });
        let new_root = uf.merge(ru, rv);
        comp_node[new_root] = n + nodes.len() - 1;
    }
    nodes
}

#[inline]
fn node_size(nodes: &[LinkageNode], n: usize, id: usize) -> usize {
    if id < n {
        1
    } else {
        nodes[id - n].size
    }
}

fn leaves_under(nodes: &[LinkageNode], n: usize, id: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(node) = stack.pop() {
        if node < n {
            out.push(node);
        } else {
            let link = &nodes[node - n];
            stack.push(link.right);
            stack.push(link.left);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Condensed cluster tree
// ---------------------------------------------------------------------------

/// An entry in the condensed cluster tree stored as a flat table.
///
/// Each row represents either:
/// - A point falling out of a cluster (child is a point index, child_size = 1)
/// - A cluster splitting into a child cluster (child is a cluster id, child_size > 1)
///
/// Cluster ids start at `n`; the root cluster is `n`.
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

fn condense_tree(linkage: &[LinkageNode], n: usize, min_cluster_size: usize) -> Vec<CondensedEdge> {
    let mut condensed: Vec<CondensedEdge> = Vec::with_capacity(2 * n);
    let Some(last) = linkage.len().checked_sub(1) else {
        return condensed;
    };

    let mut next_label = n + 1;
    let mut stack = vec![(n + last, n)];

    while let Some((node, label)) = stack.pop() {
        let link = &linkage[node - n];
        let lambda = if link.distance > 0.0 {
            1.0 / f64::from(link.distance)
        } else {
            f64::INFINITY
        };
        let left_size = node_size(linkage, n, link.left);
        let right_size = node_size(linkage, n, link.right);
        let left_big = left_size >= min_cluster_size;
        let right_big = right_size >= min_cluster_size;

        let fall_out = |side: usize, condensed: &mut Vec<CondensedEdge>| {
            for p in leaves_under(linkage, n, side) {
                condensed.push(CondensedEdge {
                    parent: label,
                    child: p,
                    lambda,
                    child_size: 1,
                });
            }
        };

        match (left_big, right_big) {
            (true, true) => {
                // Genuine split: both sides become child clusters.
                for (child, size) in [(link.left, left_size), (link.right, right_size)] {
                    condensed.push(CondensedEdge {
                        parent: label,
                        child: next_label,
                        lambda,
                        child_size: size,
                    });
                    stack.push((child, next_label));
                    next_label += 1;
                }
            }
            (true, false) => {
                fall_out(link.right, &mut condensed);
                stack.push((link.left, label));
            }
            (false, true) => {
                fall_out(link.left, &mut condensed);
                stack.push((link.right, label));
            }
            (false, false) => {
                fall_out(link.left, &mut condensed);
                fall_out(link.right, &mut condensed);
            }
        }
    }

    // Zero-distance merges give infinite lambda; cap them above every finite value.
    let max_finite = condensed
        .iter()
        .map(|e| e.lambda)
        .filter(|l| l.is_finite())
        .fold(0.0f64, f64::max);
    let cap = if max_finite > 0.0 { max_finite * 2.0 } else { 1.0 };
    for edge in &mut condensed {
        if !edge.lambda.is_finite() {
            edge.lambda = cap;
        }
    }

    condensed
}

fn extract_clusters(
    condensed: &[CondensedEdge],
    n: usize,
    method: SelectionMethod,
    epsilon: f64,
) -> HdbscanFit {
    let num_clusters = condensed
        .iter()
        .filter(|e| e.child_size > 1)
        .map(|e| e.child - n + 1)
        .max()
        .unwrap_or(1);

    let mut lambda_birth = vec![0.0f64; num_clusters];
    let mut parent_of: Vec<Option<usize>> = vec![None; num_clusters];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
    for edge in condensed.iter().filter(|e| e.child_size > 1) {
        let (p, c) = (edge.parent - n, edge.child - n);
        lambda_birth[c] = edge.lambda;
        parent_of[c] = Some(p);
        children[p].push(c);
    }

    let mut stability = vec![0.0f64; num_clusters];
    for edge in condensed {
        let p = edge.parent - n;
        stability[p] += edge.child_size as f64 * (edge.lambda - lambda_birth[p]);
    }

    // Cluster 0 is the root and is never selected. Children always have larger ids
    // than their parent, so descending id order is bottom-up.
    let mut selected = vec![false; num_clusters];
    match method {
        SelectionMethod::Eom => {
            let mut subtree_stab = stability.clone();
            for c in (1..num_clusters).rev() {
                let child_sum: f64 = children[c].iter().map(|&ch| subtree_stab[ch]).sum();
                if stability[c] >= child_sum {
                    selected[c] = true;
                    deselect_descendants(&children, c, &mut selected);
                    subtree_stab[c] = stability[c];
                } else {
                    subtree_stab[c] = child_sum;
                }
            }
        }
        SelectionMethod::Leaf => {
            for c in 1..num_clusters {
                selected[c] = children[c].is_empty();
            }
        }
    }

    if epsilon > 0.0 {
        selected = apply_selection_epsilon(&selected, &lambda_birth, &parent_of, &children, epsilon);
    }

    let mut label_map = vec![NOISE; num_clusters];
    let mut next_label = 0usize;
    for (c, &sel) in selected.iter().enumerate() {
        if sel {
            label_map[c] = next_label;
            next_label += 1;
        }
    }

    // owner[c]: the selected cluster at or above c.
    let mut owner: Vec<Option<usize>> = vec![None; num_clusters];
    for c in 0..num_clusters {
        owner[c] = if selected[c] {
            Some(c)
        } else {
            parent_of[c].and_then(|p| owner[p])
        };
    }

    // Largest lambda among a cluster's own rows (points and child splits).
    // Points that fell out deeper in the subtree clamp to it and score 1.0.
    let mut max_lambda = vec![0.0f64; num_clusters];
    for edge in condensed {
        let p = edge.parent - n;
        max_lambda[p] = max_lambda[p].max(edge.lambda);
    }

    let mut labels = vec![NOISE; n];
    let mut point_owner: Vec<Option<usize>> = vec![None; n];
    let mut point_lambda = vec![0.0f64; n];
    for edge in condensed.iter().filter(|e| e.child_size == 1 && e.child < n) {
        if let Some(o) = owner[edge.parent - n] {
            labels[edge.child] = label_map[o];
            point_owner[edge.child] = Some(o);
            point_lambda[edge.child] = edge.lambda;
        }
    }

    let probabilities = point_owner
        .iter()
        .zip(&point_lambda)
        .map(|(owner, &lambda)| match owner {
            None => 0.0,
            Some(o) if max_lambda[*o] > 0.0 => (lambda.min(max_lambda[*o]) / max_lambda[*o]) as f32,
            Some(_) => 1.0,
        })
        .collect();

    HdbscanFit {
        labels,
        probabilities,
    }
}

/// Replace selected clusters born at a distance below `epsilon` with their closest
/// ancestor born above it (never the root).
fn apply_selection_epsilon(
    selected: &[bool],
    lambda_birth: &[f64],
    parent_of: &[Option<usize>],
    children: &[Vec<usize>],
    epsilon: f64,
) -> Vec<bool> {
    let birth_distance = |c: usize| {
        if lambda_birth[c] > 0.0 {
            1.0 / lambda_birth[c]
        } else {
            f64::INFINITY
        }
    };

    let mut out = vec![false; selected.len()];
    for c in (0..selected.len()).filter(|&c| selected[c]) {
        if birth_distance(c) >= epsilon {
            out[c] = true;
            continue;
        }
        let mut node = c;
        while let Some(p) = parent_of[node] {
            if parent_of[p].is_none() {
                break;
            }
            node = p;
            if birth_distance(p) > epsilon {
                break;
            }
        }
        out[node] = true;
    }

    for c in 0..out.len() {
        if out[c] {
            deselect_descendants(children, c, &mut out);
        }
    }
    out
}

fn deselect_descendants(children: &[Vec<usize>], node: usize, selected: &mut [bool]) {
    for &child in &children[node] {
        selected[child] = false;
        deselect_descendants(children, child, selected);
    }
}
