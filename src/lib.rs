//! Clustering engine for "smart albums".
//!
//! `album_cluster` groups embedding vectors (one per photo, caption, ...) into
//! density-based clusters and reports progress while it works.
//!
//! - [`cluster`]: HDBSCAN, a UMAP-style reducer, distance metrics.
//! - [`pipeline`]: batch validation, parameter normalization, the synchronous and
//!   streaming [`ClusteringEngine`], result assembly.
//! - [`progress`]: progress events and their delivery strategies (channel, webhook).
//! - [`jobs`]: asynchronous jobs with polling and callbacks.
//!
//! ```rust
//! use album_cluster::{ClusterParams, ClusteringEngine, VectorBatch};
//!
//! let vectors = vec![
//!     vec![1.0, 0.0], vec![0.99, 0.01], vec![0.98, 0.02],
//!     vec![0.0, 1.0], vec![0.01, 0.99], vec![0.02, 0.98],
//! ];
//! let batch = VectorBatch::new(vectors, vec![11, 12, 13, 21, 22, 23]).unwrap();
//!
//! let mut params = ClusterParams::default();
//! params.clustering.min_cluster_size = 2;
//!
//! let result = ClusteringEngine::new().cluster(batch, &params).unwrap();
//! assert_eq!(result.n_points(), 6);
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod progress;

pub use cluster::{Clustering, DistanceMetric, Hdbscan, HdbscanFit, SelectionMethod, Umap, NOISE};
pub use config::{EngineConfig, RetentionPolicy};
pub use error::{Error, Result};
pub use jobs::{Job, JobId, JobOrchestrator, JobStore, SubmitRequest, SubmitResponse};
pub use pipeline::{
    ClusterParams, ClusteringEngine, ClusteringParams, ClusteringResult, ProgressStream,
    ReductionParams, VectorBatch,
};
pub use progress::{JobStatus, ProgressEvent, ProgressReporter};
