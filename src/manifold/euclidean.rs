//! Euclidean spaces as (trivial) manifolds: retraction is addition and local
//! coordinates are subtraction.

use crate::manifold::{Manifold, ManifoldResult, check_tangent_dim};
use nalgebra::{DMatrix, DVector, Vector3};

impl Manifold for DVector<f64> {
    fn dim(&self) -> usize {
        self.len()
    }

    fn retract(&self, delta: &[f64]) -> ManifoldResult<Self> {
        check_tangent_dim(self.len(), delta.len())?;
        Ok(self + DVector::from_column_slice(delta))
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        other - self
    }

    fn local_coordinates_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(self.len(), self.len())
    }
}

impl Manifold for Vector3<f64> {
    fn dim(&self) -> usize {
        3
    }

    fn retract(&self, delta: &[f64]) -> ManifoldResult<Self> {
        check_tangent_dim(3, delta.len())?;
        Ok(self + Vector3::from_column_slice(delta))
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let d = other - self;
        DVector::from_column_slice(d.as_slice())
    }

    fn local_coordinates_jacobian(&self, _other: &Self) -> DMatrix<f64> {
        DMatrix::identity(3, 3)
    }
}
