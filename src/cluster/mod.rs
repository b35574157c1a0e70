//! Numerical building blocks: distances, density clustering, dimensionality reduction.
//!
//! ## Density clustering
//!
//! [`Hdbscan`] groups points that sit in dense regions and leaves the rest as noise.
//! The number of clusters is not an input: it falls out of the density hierarchy,
//! which suits photo collections where nobody knows in advance how many events,
//! places, or faces they contain.
//!
//! ## Dimensionality reduction
//!
//! Embeddings from vision and text models typically have hundreds of dimensions.
//! Density estimates degrade there, so the pipeline can first project vectors with
//! [`Umap`], a seeded neighbour-graph embedding, and cluster the projection.
//!
//! ## Usage
//!
//! ```rust
//! use album_cluster::cluster::{Clustering, DistanceMetric, Hdbscan, NOISE};
//!
//! let data = vec![
//!     vec![0.0, 0.0],
//!     vec![0.1, 0.1],
//!     vec![0.0, 0.1],
//!     vec![10.0, 10.0],
//!     vec![10.1, 10.1],
//!     vec![10.0, 10.1],
//! ];
//!
//! let fit = Hdbscan::new()
//!     .with_min_cluster_size(2)
//!     .with_metric(DistanceMetric::Euclidean)
//!     .fit(&data)
//!     .unwrap();
//! assert_eq!(fit.labels[0], fit.labels[1]);
//! assert_ne!(fit.labels[0], fit.labels[3]);
//! assert!(fit.labels.iter().all(|&l| l != NOISE));
//!
//! let labels = Hdbscan::new().with_min_cluster_size(2).fit_predict(&data).unwrap();
//! assert_eq!(labels.len(), data.len());
//! ```

mod distance;
mod hdbscan;
mod reduce;
mod traits;
mod util;

pub use distance::DistanceMetric;
pub use hdbscan::{Hdbscan, HdbscanFit, SelectionMethod, NOISE};
pub use reduce::{DimensionReducer, Umap, DEFAULT_SEED};
pub use traits::Clustering;
