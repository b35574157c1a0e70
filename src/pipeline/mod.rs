//! Input validation, parameter normalization, execution, and result assembly.

mod assemble;
mod batch;
mod engine;
mod params;

pub use assemble::{assemble, assignments, Cluster, ClusterAssignment, ClusteringResult, ParamsUsed};
pub use batch::{PointId, VectorBatch};
pub use engine::{ClusteringEngine, ClusteringRun, ProgressStream};
pub use params::{
    normalize, ClusterParams, ClusteringParams, EffectiveClustering, EffectiveReduction,
    NormalizedParams, ReductionParams,
};
