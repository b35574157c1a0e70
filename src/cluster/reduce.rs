//! Neighbour-graph dimensionality reduction (UMAP-style).
//!
//! High-dimensional embeddings cluster poorly under density methods: distances
//! concentrate and every point looks equally far from every other. Projecting into a
//! few dozen dimensions first makes density structure visible again.
//!
//! ## Method
//!
//! 1. Exact k-nearest-neighbour graph under the input metric (cosine by default).
//! 2. Fuzzy membership weights per point: `exp(-(d - rho) / sigma)`, with `rho` the
//!    distance to the nearest neighbour and `sigma` chosen so the weights sum to
//!    `log2(k)`. Directed weights are symmetrized with the fuzzy union
//!    `w = a + b - a * b`.
//! 3. A seeded random projection gives the initial layout (rescaled to `[0, 10]`).
//! 4. Stochastic gradient descent with negative sampling pulls graph neighbours
//!    together and pushes random pairs apart, using the low-dimensional similarity
//!    curve `1 / (1 + a * d^(2b))` fitted to `min_dist`.
//!
//! The RNG is seeded, so identical inputs and parameters always give identical
//! projections.
//!
//! This is a compact reimplementation of the approach in McInnes, Healy, Melville
//! (2018), "UMAP: Uniform Manifold Approximation and Projection". It skips the
//! approximate-NN index and the spectral initialization of the reference library.

use std::collections::BTreeMap;

use rand::prelude::*;
use tracing::debug;

use super::distance::{pairwise_distances, squared_euclidean, DistanceMetric};
use crate::error::{Error, Result};
use crate::pipeline::EffectiveReduction;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 42;

const SMOOTH_K_TOLERANCE: f32 = 1e-5;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const GRADIENT_CLIP: f32 = 4.0;

/// Contract for dimensionality reduction backends.
///
/// Implementations return one `target_dims`-long vector per input vector.
/// Any failure is reported as [`Error::ReductionUnavailable`]; callers are expected
/// to fall back to the original vectors.
pub trait DimensionReducer: Send + Sync {
    /// Fit on `data` and return its projection.
    fn fit_transform(&self, data: &[Vec<f32>], params: &EffectiveReduction) -> Result<Vec<Vec<f32>>>;
}

/// UMAP-style reducer.
#[derive(Debug, Clone)]
pub struct Umap {
    seed: u64,
    n_epochs: Option<usize>,
    negative_sample_rate: usize,
    metric: DistanceMetric,
}

impl Default for Umap {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            n_epochs: None,
            negative_sample_rate: 5,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl Umap {
    /// Create a reducer with the default seed and cosine input metric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of optimization epochs.
    ///
    /// Defaults to 500 for up to 10 000 points and 200 above that.
    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = Some(n_epochs);
        self
    }

    /// Set the metric used to build the neighbour graph.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

impl DimensionReducer for Umap {
    fn fit_transform(&self, data: &[Vec<f32>], params: &EffectiveReduction) -> Result<Vec<Vec<f32>>> {
        let n = data.len();
        let dim = params.target_dims;
        if n < 3 {
            return Err(Error::ReductionUnavailable(format!(
                "need at least 3 points, got {n}"
            )));
        }
        if dim == 0 || params.neighbors < 2 {
            return Err(Error::ReductionUnavailable(
                "target_dims and neighbors must be positive".into(),
            ));
        }
        if data.iter().flatten().any(|x| !x.is_finite()) {
            return Err(Error::ReductionUnavailable("input has non-finite coordinates".into()));
        }

        let k = params.neighbors.min(n - 1);
        let dists = pairwise_distances(data, self.metric);
        let knn = nearest_neighbors(&dists, n, k);
        let graph = fuzzy_graph(&knn);
        if graph.is_empty() {
            return Err(Error::ReductionUnavailable("neighbour graph is empty".into()));
        }

        let (a, b) = fit_curve(params.min_dist, 1.0);
        let n_epochs = self
            .n_epochs
            .unwrap_or(if n <= 10_000 { 500 } else { 200 })
            .max(1);
        debug!(
            n_points = n,
            target_dims = dim,
            neighbors = k,
            edges = graph.len(),
            n_epochs,
            a,
            b,
            "umap layout"
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut embedding = initial_layout(data, dim, &mut rng);
        optimize_layout(
            &mut embedding,
            dim,
            &graph,
            Layout {
                n_epochs,
                a,
                b,
                negative_sample_rate: self.negative_sample_rate,
            },
            &mut rng,
        );

        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::ReductionUnavailable("layout diverged".into()));
        }
        Ok(embedding.chunks(dim).map(<[f32]>::to_vec).collect())
    }
}

/// `k` nearest neighbours of every point (excluding itself), ascending by distance.
fn nearest_neighbors(dists: &[f32], n: usize, k: usize) -> Vec<Vec<(usize, f32)>> {
    (0..n)
        .map(|i| {
            let mut row: Vec<(usize, f32)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, dists[i * n + j]))
                .collect();
            row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            row.truncate(k);
            row
        })
        .collect()
}

/// Find `(rho, sigma)` so that `sum(exp(-(d - rho) / sigma)) == log2(k)`.
fn smooth_knn(row: &[(usize, f32)], mean_distance: f32) -> (f32, f32) {
    let target = (row.len() as f32).log2().max(f32::EPSILON);
    let rho = row.iter().map(|&(_, d)| d).find(|&d| d > 0.0).unwrap_or(0.0);

    let (mut lo, mut hi, mut mid) = (0.0f32, f32::INFINITY, 1.0f32);
    for _ in 0..64 {
        let psum: f32 = row
            .iter()
            .map(|&(_, d)| {
                let d = d - rho;
                if d > 0.0 {
                    (-d / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();
        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    (rho, mid.max(MIN_K_DIST_SCALE * mean_distance).max(f32::MIN_POSITIVE))
}

/// Symmetrized fuzzy neighbour graph as `(i, j, weight)` with `i < j`.
///
/// A `BTreeMap` keeps edge order (and therefore the layout) deterministic.
fn fuzzy_graph(knn: &[Vec<(usize, f32)>]) -> Vec<(usize, usize, f32)> {
    let mean_distance = {
        let all: Vec<f32> = knn.iter().flatten().map(|&(_, d)| d).collect();
        if all.is_empty() {
            0.0
        } else {
            all.iter().sum::<f32>() / all.len() as f32
        }
    };

    let mut directed: BTreeMap<(usize, usize), (f32, f32)> = BTreeMap::new();
    for (i, row) in knn.iter().enumerate() {
        let (rho, sigma) = smooth_knn(row, mean_distance);
        for &(j, d) in row {
            let w = (-(d - rho).max(0.0) / sigma).exp();
            let key = (i.min(j), i.max(j));
            let entry = directed.entry(key).or_insert((0.0, 0.0));
            if i < j {
                entry.0 = w;
            } else {
                entry.1 = w;
            }
        }
    }

    directed
        .into_iter()
        .map(|((i, j), (w_ij, w_ji))| (i, j, w_ij + w_ji - w_ij * w_ji))
        .filter(|&(_, _, w)| w > 0.0)
        .collect()
}

/// Fit `a`, `b` of `1 / (1 + a * x^(2b))` to the offset exponential implied by
/// `min_dist` (coarse grid search refined twice around the best cell).
fn fit_curve(min_dist: f32, spread: f32) -> (f32, f32) {
    let xs: Vec<f32> = (0..300).map(|i| i as f32 * 3.0 * spread / 299.0).collect();
    let ys: Vec<f32> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();
    let loss = |a: f32, b: f32| -> f32 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a_lo, mut a_hi) = (0.01f32.ln(), 10.0f32.ln());
    let (mut b_lo, mut b_hi) = (0.1f32, 2.0f32);
    let mut best = (1.0f32, 1.0f32, f32::INFINITY);
    for _ in 0..3 {
        let steps = 40;
        let a_step = (a_hi - a_lo) / steps as f32;
        let b_step = (b_hi - b_lo) / steps as f32;
        for ia in 0..=steps {
            let a = (a_lo + ia as f32 * a_step).exp();
            for ib in 0..=steps {
                let b = b_lo + ib as f32 * b_step;
                let l = loss(a, b);
                if l < best.2 {
                    best = (a, b, l);
                }
            }
        }
        let (a, b, _) = best;
        a_lo = a.ln() - 2.0 * a_step;
        a_hi = a.ln() + 2.0 * a_step;
        b_lo = (b - 2.0 * b_step).max(0.01);
        b_hi = b + 2.0 * b_step;
    }
    (best.0, best.1)
}

/// Seeded random projection, rescaled per output dimension to `[0, 10]`.
fn initial_layout(data: &[Vec<f32>], dim: usize, rng: &mut StdRng) -> Vec<f32> {
    let original_dim = data[0].len();
    let mut mat: Vec<Vec<f32>> = Vec::with_capacity(dim);
    for _ in 0..dim {
        let mut row: Vec<f32> = (0..original_dim)
            .map(|_| rng.random::<f32>() * 2.0 - 1.0)
            .collect();
        normalize_in_place(&mut row);
        mat.push(row);
    }

    let n = data.len();
    let mut out: Vec<f32> = Vec::with_capacity(n * dim);
    for v in data {
        for row in &mat {
            out.push(v.iter().zip(row).map(|(x, y)| x * y).sum());
        }
    }

    for c in 0..dim {
        let (min, max) = (0..n)
            .map(|i| out[i * dim + c])
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
        let range = max - min;
        for i in 0..n {
            let x = &mut out[i * dim + c];
            *x = if range > f32::EPSILON { (*x - min) / range * 10.0 } else { 5.0 };
            // Small jitter separates coincident points.
            *x += (rng.random::<f32>() - 0.5) * 1e-3;
        }
    }
    out
}

fn normalize_in_place(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v {
            *x /= norm;
        }
    }
}

struct Layout {
    n_epochs: usize,
    a: f32,
    b: f32,
    negative_sample_rate: usize,
}

fn optimize_layout(
    embedding: &mut [f32],
    dim: usize,
    graph: &[(usize, usize, f32)],
    layout: Layout,
    rng: &mut StdRng,
) {
    let n = embedding.len() / dim;
    let Layout {
        n_epochs,
        a,
        b,
        negative_sample_rate,
    } = layout;

    let w_max = graph.iter().map(|e| e.2).fold(0.0f32, f32::max);
    let epochs_per_sample: Vec<f64> = graph
        .iter()
        .map(|e| f64::from(w_max / e.2))
        .collect();
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|e| e / negative_sample_rate.max(1) as f64)
        .collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut delta = vec![0.0f32; dim];
    for epoch in 0..n_epochs {
        let alpha = 1.0 - epoch as f32 / n_epochs as f32;
        let now = epoch as f64;

        for (e, &(i, j, _)) in graph.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }

            // Attraction along the graph edge.
            let d2 = squared_euclidean(&embedding[i * dim..(i + 1) * dim], &embedding[j * dim..(j + 1) * dim]);
            let coeff = if d2 > 0.0 {
                -2.0 * a * b * d2.powf(b - 1.0) / (1.0 + a * d2.powf(b))
            } else {
                0.0
            };
            for c in 0..dim {
                delta[c] = clip(coeff * (embedding[i * dim + c] - embedding[j * dim + c])) * alpha;
            }
            for c in 0..dim {
                embedding[i * dim + c] += delta[c];
                embedding[j * dim + c] -= delta[c];
            }
            next_sample[e] += epochs_per_sample[e];

            // Repulsion from random points.
            let n_neg = ((now - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_neg {
                let k = rng.random_range(0..n);
                if k == i {
                    continue;
                }
                let d2 = squared_euclidean(&embedding[i * dim..(i + 1) * dim], &embedding[k * dim..(k + 1) * dim]);
                let coeff = if d2 > 0.0 {
                    2.0 * b / ((0.001 + d2) * (1.0 + a * d2.powf(b)))
                } else {
                    0.0
                };
                for c in 0..dim {
                    let g = if coeff > 0.0 {
                        clip(coeff * (embedding[i * dim + c] - embedding[k * dim + c]))
                    } else {
                        GRADIENT_CLIP
                    };
                    embedding[i * dim + c] += g * alpha;
                }
            }
            next_negative[e] += n_neg as f64 * epochs_per_negative[e];
        }
    }
}

#[inline]
fn clip(x: f32) -> f32 {
    x.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two groups of unit-ish vectors around orthogonal directions in 8 dimensions.
    fn two_directions() -> Vec<Vec<f32>> {
        let mut data = Vec::new();
        for axis in [0usize, 4] {
            for i in 0..10 {
                let mut v = vec![0.0f32; 8];
                v[axis] = 1.0;
                v[axis + 1] = 0.02 * i as f32;
                v[axis + 2] = 0.01 * ((i * 3) % 7) as f32;
                data.push(v);
            }
        }
        data
    }

    fn params(target_dims: usize) -> EffectiveReduction {
        EffectiveReduction {
            target_dims,
            neighbors: 5,
            min_dist: 0.1,
        }
    }

    #[test]
    fn output_shape() {
        let data = two_directions();
        let out = Umap::new().with_n_epochs(50).fit_transform(&data, &params(3)).unwrap();
        assert_eq!(out.len(), data.len());
        assert!(out.iter().all(|v| v.len() == 3));
        assert!(out.iter().flatten().all(|x| x.is_finite()));
    }

    #[test]
    fn seeded_runs_are_identical() {
        let data = two_directions();
        let a = Umap::new().with_n_epochs(100).fit_transform(&data, &params(2)).unwrap();
        let b = Umap::new().with_n_epochs(100).fit_transform(&data, &params(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seeds_differ() {
        let data = two_directions();
        let a = Umap::new().with_n_epochs(20).fit_transform(&data, &params(2)).unwrap();
        let b = Umap::new()
            .with_seed(7)
            .with_n_epochs(20)
            .fit_transform(&data, &params(2))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn neighbours_stay_in_their_group() {
        let data = two_directions();
        let out = Umap::new().fit_transform(&data, &params(2)).unwrap();

        for i in 0..out.len() {
            let nearest = (0..out.len())
                .filter(|&j| j != i)
                .min_by(|&x, &y| {
                    squared_euclidean(&out[i], &out[x]).total_cmp(&squared_euclidean(&out[i], &out[y]))
                })
                .unwrap();
            assert_eq!(i / 10, nearest / 10, "point {i} nearest to {nearest}");
        }
    }

    #[test]
    fn fuzzy_graph_is_symmetric_and_bounded() {
        let data = two_directions();
        let dists = pairwise_distances(&data, DistanceMetric::Cosine);
        let graph = fuzzy_graph(&nearest_neighbors(&dists, data.len(), 4));
        assert!(!graph.is_empty());
        for &(i, j, w) in &graph {
            assert!(i < j);
            assert!(w > 0.0 && w <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn curve_fit_matches_reference_values() {
        // Reference library: min_dist = 0.1, spread = 1.0 -> a ~ 1.58, b ~ 0.90.
        let (a, b) = fit_curve(0.1, 1.0);
        assert!((a - 1.58).abs() < 0.15, "a = {a}");
        assert!((b - 0.90).abs() < 0.08, "b = {b}");
    }

    #[test]
    fn non_finite_input_is_unavailable() {
        let mut data = two_directions();
        data[3][0] = f32::INFINITY;
        let err = Umap::new().fit_transform(&data, &params(2)).unwrap_err();
        assert!(matches!(err, Error::ReductionUnavailable(_)));
    }

    #[test]
    fn too_few_points_is_unavailable() {
        let data = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        assert!(matches!(
            Umap::new().fit_transform(&data, &params(2)),
            Err(Error::ReductionUnavailable(_))
        ));
    }
}
