use crate::error::{Error, Result};

/// Caller-supplied identifier of one vector (e.g. an image id).
pub type PointId = i64;

/// An ordered set of equal-length vectors, each paired with its identifier.
///
/// `ids[i]` identifies `vectors[i]`. A batch always holds at least two points of
/// dimension one or more.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBatch {
    vectors: Vec<Vec<f32>>,
    ids: Vec<PointId>,
}

impl VectorBatch {
    /// Validate and wrap `vectors` and `ids`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when the lengths differ or fewer than two points are given.
    /// - [`Error::InvalidParameter`] for zero-length vectors.
    /// - [`Error::DimensionMismatch`] when vectors differ in length.
    pub fn new(vectors: Vec<Vec<f32>>, ids: Vec<PointId>) -> Result<Self> {
        if vectors.len() != ids.len() {
            return Err(Error::InvalidInput(format!(
                "{} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        if vectors.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "at least 2 points are required, got {}",
                vectors.len()
            )));
        }
        let d = vectors[0].len();
        if d == 0 {
            return Err(Error::invalid_parameter("dimension", "must be at least 1"));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != d) {
            return Err(Error::DimensionMismatch {
                expected: d,
                found: v.len(),
            });
        }
        Ok(Self { vectors, ids })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always `false`: a valid batch holds at least two points.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vector dimensionality.
    pub fn dim(&self) -> usize {
        self.vectors[0].len()
    }

    pub(crate) fn into_parts(self) -> (Vec<Vec<f32>>, Vec<PointId>) {
        (self.vectors, self.ids)
    }
}
