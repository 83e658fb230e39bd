//! Typed variable storage and manifold updates.
//!
//! A [`Value`] is a closed sum over the supported variable manifolds, and
//! [`Values`] is an insertion-ordered map from [`Key`] to [`Value`].
//! All update operations return a fresh container; nothing is mutated in place
//! once a container has been handed to an optimizer.

use crate::core::key::Key;
use crate::core::ordering::Ordering;
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::VectorValues;
use crate::manifold::{LieGroup, Manifold, ManifoldError, ManifoldResult, SE3, SO3};
use nalgebra::{DMatrix, DVector, Vector3};
use std::collections::HashMap;
use std::fmt;

/// Current estimate of one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Euclidean vector of any size
    Vector(DVector<f64>),
    /// 3D point (landmark)
    Point3(Vector3<f64>),
    /// 3D rotation
    Rot3(SO3),
    /// 3D rigid pose
    Pose3(SE3),
}

impl Value {
    /// Short manifold name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Vector(_) => "Vector",
            Value::Point3(_) => "Point3",
            Value::Rot3(_) => "Rot3",
            Value::Pose3(_) => "Pose3",
        }
    }

    /// Tangent-space dimension.
    pub fn dim(&self) -> usize {
        match self {
            Value::Vector(v) => Manifold::dim(v),
            Value::Point3(p) => Manifold::dim(p),
            Value::Rot3(r) => r.dim(),
            Value::Pose3(p) => p.dim(),
        }
    }

    pub fn retract(&self, delta: &[f64]) -> ManifoldResult<Value> {
        Ok(match self {
            Value::Vector(v) => Value::Vector(v.retract(delta)?),
            Value::Point3(p) => Value::Point3(p.retract(delta)?),
            Value::Rot3(r) => Value::Rot3(r.retract(delta)?),
            Value::Pose3(p) => Value::Pose3(p.retract(delta)?),
        })
    }

    /// Tangent vector taking `self` to `other`; both must share a manifold.
    pub fn local_coordinates(&self, other: &Value) -> ManifoldResult<DVector<f64>> {
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => {
                crate::manifold::check_tangent_dim(a.len(), b.len())?;
                Ok(a.local_coordinates(b))
            }
            (Value::Point3(a), Value::Point3(b)) => Ok(a.local_coordinates(b)),
            (Value::Rot3(a), Value::Rot3(b)) => Ok(a.local_coordinates(b)),
            (Value::Pose3(a), Value::Pose3(b)) => Ok(a.local_coordinates(b)),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Derivative of `self.local_coordinates(other)` with respect to `other`.
    pub fn local_coordinates_jacobian(&self, other: &Value) -> ManifoldResult<DMatrix<f64>> {
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => {
                crate::manifold::check_tangent_dim(a.len(), b.len())?;
                Ok(a.local_coordinates_jacobian(b))
            }
            (Value::Point3(a), Value::Point3(b)) => Ok(a.local_coordinates_jacobian(b)),
            (Value::Rot3(a), Value::Rot3(b)) => Ok(a.local_coordinates_jacobian(b)),
            (Value::Pose3(a), Value::Pose3(b)) => Ok(a.local_coordinates_jacobian(b)),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Relative value `self⁻¹ ∘ other` (difference for vector spaces).
    pub fn between(&self, other: &Value) -> ManifoldResult<Value> {
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => {
                crate::manifold::check_tangent_dim(a.len(), b.len())?;
                Ok(Value::Vector(b - a))
            }
            (Value::Point3(a), Value::Point3(b)) => Ok(Value::Point3(b - a)),
            (Value::Rot3(a), Value::Rot3(b)) => Ok(Value::Rot3(a.between(b))),
            (Value::Pose3(a), Value::Pose3(b)) => Ok(Value::Pose3(a.between(b))),
            _ => Err(self.mismatch(other)),
        }
    }

    /// Derivatives of `self.between(other)` with respect to `self` and
    /// `other`, in each manifold's retraction coordinates.
    pub fn between_jacobians(
        &self,
        other: &Value,
    ) -> ManifoldResult<(DMatrix<f64>, DMatrix<f64>)> {
        fn dynamic<const N: usize>(m: nalgebra::SMatrix<f64, N, N>) -> DMatrix<f64> {
            DMatrix::from_column_slice(N, N, m.as_slice())
        }
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => {
                crate::manifold::check_tangent_dim(a.len(), b.len())?;
                let n = a.len();
                Ok((-DMatrix::identity(n, n), DMatrix::identity(n, n)))
            }
            (Value::Point3(_), Value::Point3(_)) => {
                Ok((-DMatrix::identity(3, 3), DMatrix::identity(3, 3)))
            }
            (Value::Rot3(a), Value::Rot3(b)) => {
                let (d_a, d_b) = a.between_jacobians(b);
                Ok((dynamic(d_a), dynamic(d_b)))
            }
            (Value::Pose3(a), Value::Pose3(b)) => {
                let (d_a, d_b) = a.between_jacobians(b);
                Ok((dynamic(d_a), dynamic(d_b)))
            }
            _ => Err(self.mismatch(other)),
        }
    }

    pub fn is_approx(&self, other: &Value, tolerance: f64) -> bool {
        match (self, other) {
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && (a - b).amax() <= tolerance
            }
            (Value::Point3(a), Value::Point3(b)) => (a - b).amax() <= tolerance,
            (Value::Rot3(a), Value::Rot3(b)) => a.is_approx(b, tolerance),
            (Value::Pose3(a), Value::Pose3(b)) => a.is_approx(b, tolerance),
            _ => false,
        }
    }

    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_point3(&self) -> Option<&Vector3<f64>> {
        match self {
            Value::Point3(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_rot3(&self) -> Option<&SO3> {
        match self {
            Value::Rot3(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pose3(&self) -> Option<&SE3> {
        match self {
            Value::Pose3(p) => Some(p),
            _ => None,
        }
    }

    fn mismatch(&self, other: &Value) -> ManifoldError {
        ManifoldError::TypeMismatch {
            expected: self.type_name(),
            found: other.type_name(),
        }
    }
}

impl From<DVector<f64>> for Value {
    fn from(v: DVector<f64>) -> Self {
        Value::Vector(v)
    }
}

impl From<Vector3<f64>> for Value {
    fn from(p: Vector3<f64>) -> Self {
        Value::Point3(p)
    }
}

impl From<SO3> for Value {
    fn from(r: SO3) -> Self {
        Value::Rot3(r)
    }
}

impl From<SE3> for Value {
    fn from(p: SE3) -> Self {
        Value::Pose3(p)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Vector(v) => write!(f, "Vector{:?}", v.as_slice()),
            Value::Point3(p) => write!(f, "Point3[{:.4}, {:.4}, {:.4}]", p.x, p.y, p.z),
            Value::Rot3(r) => write!(f, "{r}"),
            Value::Pose3(p) => write!(f, "{p}"),
        }
    }
}

/// Insertion-ordered mapping from keys to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    entries: Vec<(Key, Value)>,
    index: HashMap<Key, usize>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new variable. Fails with `DuplicateKey` if the key is present.
    pub fn insert(&mut self, key: Key, value: impl Into<Value>) -> FactorGraphResult<()> {
        if self.index.contains_key(&key) {
            return Err(FactorGraphError::DuplicateKey(key));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push((key, value.into()));
        Ok(())
    }

    /// Replace an existing variable with a value of the same manifold.
    pub fn update(&mut self, key: Key, value: impl Into<Value>) -> FactorGraphResult<()> {
        let value = value.into();
        let slot = *self
            .index
            .get(&key)
            .ok_or(FactorGraphError::KeyNotFound(key))?;
        let current = &self.entries[slot].1;
        if current.type_name() != value.type_name() || current.dim() != value.dim() {
            return Err(ManifoldError::TypeMismatch {
                expected: current.type_name(),
                found: value.type_name(),
            }
            .into());
        }
        self.entries[slot].1 = value;
        Ok(())
    }

    /// Value stored under `key`; fails with `KeyNotFound` if absent.
    pub fn at(&self, key: Key) -> FactorGraphResult<&Value> {
        self.get(key).ok_or(FactorGraphError::KeyNotFound(key))
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.index.get(&key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.index.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.iter().map(|(k, _)| *k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &Value)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Sum of tangent dimensions over all variables.
    pub fn total_dim(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.dim()).sum()
    }

    pub fn vector(&self, key: Key) -> FactorGraphResult<&DVector<f64>> {
        let value = self.at(key)?;
        value.as_vector().ok_or_else(|| typed_mismatch("Vector", value))
    }

    pub fn point3(&self, key: Key) -> FactorGraphResult<&Vector3<f64>> {
        let value = self.at(key)?;
        value.as_point3().ok_or_else(|| typed_mismatch("Point3", value))
    }

    pub fn rot3(&self, key: Key) -> FactorGraphResult<&SO3> {
        let value = self.at(key)?;
        value.as_rot3().ok_or_else(|| typed_mismatch("Rot3", value))
    }

    pub fn pose3(&self, key: Key) -> FactorGraphResult<&SE3> {
        let value = self.at(key)?;
        value.as_pose3().ok_or_else(|| typed_mismatch("Pose3", value))
    }

    /// Apply a tangent-space update.
    ///
    /// Each variable present in `ordering` is retracted by the delta block at
    /// its slot. Variables absent from the ordering are copied unchanged and
    /// ordering slots without a value are ignored, so `delta` may cover a
    /// superset of the stored keys.
    pub fn retract(&self, delta: &VectorValues, ordering: &Ordering) -> FactorGraphResult<Values> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let updated = match ordering.position(*key) {
                None => value.clone(),
                Some(slot) => {
                    let block = delta.get(slot).ok_or(FactorGraphError::DeltaOutOfRange {
                        key: *key,
                        slot,
                        available: delta.len(),
                    })?;
                    value.retract(block)?
                }
            };
            entries.push((*key, updated));
        }
        Ok(Values {
            entries,
            index: self.index.clone(),
        })
    }

    /// Tangent difference from `self` to `other`, sliced by `ordering`.
    ///
    /// Left inverse of [`Values::retract`]: for small `d`,
    /// `v.local_coordinates(&v.retract(d, o)?, o)? ≈ d`.
    pub fn local_coordinates(
        &self,
        other: &Values,
        ordering: &Ordering,
    ) -> FactorGraphResult<VectorValues> {
        let blocks = ordering
            .keys()
            .iter()
            .map(|&key| {
                let a = self.at(key)?;
                let b = other.at(key)?;
                Ok(a.local_coordinates(b)?)
            })
            .collect::<FactorGraphResult<Vec<_>>>()?;
        Ok(VectorValues::from_blocks(&blocks))
    }

    /// Ordering over the stored keys in insertion order.
    pub fn ordering_arbitrary(&self) -> Ordering {
        Ordering::from_unique_keys(self.keys())
    }

    /// Same key set with every value within `tolerance`.
    pub fn is_approx(&self, other: &Values, tolerance: f64) -> bool {
        self.len() == other.len()
            && self.iter().all(|(key, value)| {
                other
                    .get(key)
                    .is_some_and(|o| value.is_approx(o, tolerance))
            })
    }
}

fn typed_mismatch(expected: &'static str, found: &Value) -> FactorGraphError {
    ManifoldError::TypeMismatch {
        expected,
        found: found.type_name(),
    }
    .into()
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Values with {} variables:", self.len())?;
        for (key, value) in self.iter() {
            writeln!(f, "  {key}: {value}")?;
        }
        Ok(())
    }
}
