//! Error types for the factorgraph library
//!
//! Every fallible operation in the crate returns [`FactorGraphResult`]. Manifold-level
//! failures are reported through [`ManifoldError`] and converted automatically, the
//! same way the other module errors fold into the crate-level error.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::core::key::Key;
use crate::manifold::ManifoldError;
use thiserror::Error;

/// Main result type used throughout the factorgraph library
pub type FactorGraphResult<T> = Result<T, FactorGraphError>;

/// Main error type for the factorgraph library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorGraphError {
    /// A value was inserted under a key that already holds one
    #[error("Duplicate key: {0} is already present")]
    DuplicateKey(Key),

    /// A lookup by key found nothing
    #[error("Key not found: {0}")]
    KeyNotFound(Key),

    /// A factor references a variable that has no value in the container
    #[error("Missing variable: factor references {0}, which has no value")]
    MissingVariable(Key),

    /// Elimination hit a rank-deficient or non-finite block
    #[error("Underconstrained system at elimination slot {variable}: {reason}")]
    UnderconstrainedSystem { variable: usize, reason: String },

    /// The ordering heuristic could not produce a valid bijection
    #[error("Ordering failed: {0}")]
    OrderingFailed(String),

    /// Levenberg-Marquardt could not find an error-decreasing step
    #[error("Maximum damping retries exceeded after {retries} attempts (lambda = {lambda:.3e})")]
    MaxRetriesExceeded { retries: usize, lambda: f64 },

    /// Matrix or vector dimensions disagree
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An ordering slot for a value lies past the end of the delta vector
    #[error("Delta out of range: {key} maps to slot {slot} but delta has {available} slots")]
    DeltaOutOfRange {
        key: Key,
        slot: usize,
        available: usize,
    },

    /// Noise model parameters are not usable
    #[error("Invalid noise model: {0}")]
    InvalidNoiseModel(String),

    /// A linear solver was handed a noise model it cannot represent
    #[error("Unsupported noise model: {0}")]
    UnsupportedNoiseModel(String),

    /// A landmark projects behind a camera
    #[error("Cheirality violation: point {point} is behind camera {pose}")]
    Cheirality { pose: Key, point: Key },

    /// Failure reported by the sparse linear algebra backend
    #[error("Linear solver error: {0}")]
    LinearSolver(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Manifold operation errors
    #[error("Manifold error: {0}")]
    Manifold(#[from] ManifoldError),
}

impl FactorGraphError {
    /// True for failures that indicate the graph does not observe some direction.
    pub fn is_underconstrained(&self) -> bool {
        matches!(self, FactorGraphError::UnderconstrainedSystem { .. })
    }
}
