use thiserror::Error;

/// Errors returned by the clustering engine and job orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    /// Input batch is structurally invalid (size mismatch, too few points).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Human-readable explanation.
        message: String,
    },

    /// Points in a dataset have inconsistent dimensionality.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimensionality.
        expected: usize,
        /// Found dimensionality.
        found: usize,
    },

    /// The dimensionality reducer could not produce a projection.
    ///
    /// The engine recovers from this by clustering the original vectors.
    #[error("dimensionality reduction unavailable: {0}")]
    ReductionUnavailable(String),

    /// The density clusterer could not label the batch.
    #[error("clustering failed: {0}")]
    ClusteringFailed(String),

    /// A remote progress notification could not be delivered.
    #[error("callback delivery failed: {0}")]
    CallbackDeliveryFailed(String),

    /// No job with the given id is known to the store.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Engine configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    /// Whether this error rejects the request before any pipeline stage runs.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::InvalidParameter { .. } | Error::DimensionMismatch { .. }
        )
    }
}

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;
