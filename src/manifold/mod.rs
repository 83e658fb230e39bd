//! Manifold representations for variables that do not live in a vector space.
//!
//! Every variable type stored in [`crate::core::values::Values`] implements
//! [`Manifold`], which is what the optimizer needs from it: a tangent dimension,
//! a retraction that applies a tangent-space update, and local coordinates (the
//! inverse of the retraction) together with their derivative.
//!
//! Lie group    | size | dim | X ∈ M             | Exp(T)        | Comp. | Action
//! ------------ | ---- | --- | ----------------- | ------------- | ----- | ------
//! n-D vector   | n    | n   | v ∈ Rⁿ            | v             | v₁+v₂ | v + x
//! Rotation     | 9    | 3   | R, RᵀR = I        | R = exp([θ]x) | R₁R₂  | Rx
//! Rigid motion | 16   | 6   | M = [R t; 0 1]    | Exp([v̂])      | M₁M₂  | Rx+t
//!
//! Rotations are stored as unit quaternions. Poses use the tangent layout
//! `[ω, v]` (rotation first) and retract with `R·Exp(ω)`, `t + R·v`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use std::fmt::Debug;
use thiserror::Error;

pub mod euclidean;
pub mod se3;
pub mod so3;

pub use se3::{SE3, SE3Tangent};
pub use so3::{SO3, SO3Tangent};

/// Errors that can occur during manifold operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ManifoldError {
    /// Invalid tangent vector dimension
    #[error("Invalid tangent dimension: expected {expected}, got {actual}")]
    InvalidTangentDimension { expected: usize, actual: usize },

    /// Two values that must share a manifold do not
    #[error("Manifold type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Numerical instability in computation
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

/// Result type for manifold operations.
pub type ManifoldResult<T> = Result<T, ManifoldError>;

/// Fail with [`ManifoldError::InvalidTangentDimension`] unless the sizes agree.
pub fn check_tangent_dim(expected: usize, actual: usize) -> ManifoldResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ManifoldError::InvalidTangentDimension { expected, actual })
    }
}

/// Skew-symmetric matrix `[v]ₓ` such that `[v]ₓ w = v × w`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Variable plug-in used by the values container and the linearization.
///
/// The tangent conventions must satisfy, for every `x` and small `d`:
/// `x.local_coordinates(&x.retract(d)?) ≈ d` and `x.retract(&zeros)? == x`.
pub trait Manifold: Clone + Debug + Send + Sync {
    /// Tangent-space dimension.
    fn dim(&self) -> usize;

    /// Apply a tangent-space update. `delta` must have exactly `dim()` entries.
    fn retract(&self, delta: &[f64]) -> ManifoldResult<Self>;

    /// Tangent vector `d` such that `self.retract(d) == other`.
    fn local_coordinates(&self, other: &Self) -> DVector<f64>;

    /// Derivative of `self.local_coordinates(other)` with respect to a
    /// retraction of `other`, evaluated at zero update.
    fn local_coordinates_jacobian(&self, other: &Self) -> DMatrix<f64>;
}

/// Core group operations shared by the rotation and pose types.
pub trait LieGroup: Clone + Debug + PartialEq {
    /// The tangent space vector type
    type TangentVector: Tangent<Self>;

    /// Matrix form of a Lie algebra element
    type LieAlgebra: Clone + Debug + PartialEq;

    /// Degrees of freedom - dimension of the tangent space
    const DOF: usize;

    /// The neutral element e such that e ∘ g = g ∘ e = g.
    fn identity() -> Self;

    /// g⁻¹ such that g ∘ g⁻¹ = e.
    fn inverse(&self) -> Self;

    /// Group multiplication g₁ ∘ g₂.
    fn compose(&self, other: &Self) -> Self;

    /// Relative transformation g₁⁻¹ ∘ g₂.
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// Logarithmic map from the group to its tangent space.
    fn log(&self) -> Self::TangentVector;

    /// Group action on a 3D point.
    fn act(&self, point: &Vector3<f64>) -> Vector3<f64>;

    /// Approximate equality within `tolerance`.
    fn is_approx(&self, other: &Self, tolerance: f64) -> bool;
}

/// Lie algebra operations for the tangent type of a group `G`.
pub trait Tangent<G: LieGroup>: Clone + Debug + PartialEq {
    /// Exponential map to the group.
    fn exp(&self) -> G;

    /// Hat operator: φ^∧ (vector to matrix).
    fn hat(&self) -> G::LieAlgebra;

    /// Zero tangent vector.
    fn zero() -> Self;

    /// Check if the tangent vector is approximately zero.
    fn is_zero(&self, tolerance: f64) -> bool;
}
