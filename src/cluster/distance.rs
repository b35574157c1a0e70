//! Distance metrics over dense vectors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Distance metric used to build pairwise distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`. Angle-based; the usual choice for embedding vectors.
    #[default]
    Cosine,
    /// L2 distance.
    Euclidean,
    /// L1 distance.
    Manhattan,
}

impl DistanceMetric {
    /// Wire name of the metric.
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Manhattan => "manhattan",
        }
    }

    /// Distance between `a` and `b` under this metric.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine(a, b),
            DistanceMetric::Euclidean => squared_euclidean(a, b).sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "manhattan" | "l1" => Ok(DistanceMetric::Manhattan),
            other => Err(Error::invalid_parameter(
                "distance_metric",
                format!("unknown metric {other:?}"),
            )),
        }
    }
}

#[inline]
pub(crate) fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    // Zero vectors have no direction: identical to each other, maximally far from the rest.
    match (na > 0.0, nb > 0.0) {
        (false, false) => 0.0,
        (true, true) => (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0),
        _ => 1.0,
    }
}

/// Dense row-major `n x n` distance matrix.
pub(crate) fn pairwise_distances(data: &[Vec<f32>], metric: DistanceMetric) -> Vec<f32> {
    let n = data.len();
    let mut dists = vec![0.0f32; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = metric.distance(&data[i], &data[j]);
            dists[i * n + j] = d;
            dists[j * n + i] = d;
        }
    }
    dists
}
