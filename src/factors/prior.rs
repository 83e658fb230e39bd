//! Unary prior on any variable type.

use super::check_arity;
use crate::core::{Key, NonlinearFactor, Value};
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::NoiseModel;
use nalgebra::{DMatrix, DVector};

/// Residual `local_coordinates(prior, x)`.
///
/// A hard noise model turns the prior into an equality constraint, which is
/// how gauge freedom is usually removed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorFactor {
    key: [Key; 1],
    prior: Value,
    noise_model: NoiseModel,
}

impl PriorFactor {
    pub fn new(
        key: Key,
        prior: impl Into<Value>,
        noise_model: NoiseModel,
    ) -> FactorGraphResult<Self> {
        let prior = prior.into();
        if noise_model.dim() != prior.dim() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "PriorFactor noise model",
                expected: prior.dim(),
                actual: noise_model.dim(),
            });
        }
        Ok(Self {
            key: [key],
            prior,
            noise_model,
        })
    }

    pub fn prior(&self) -> &Value {
        &self.prior
    }
}

impl NonlinearFactor for PriorFactor {
    fn keys(&self) -> &[Key] {
        &self.key
    }

    fn noise_model(&self) -> &NoiseModel {
        &self.noise_model
    }

    fn evaluate_error(
        &self,
        values: &[&Value],
        jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> FactorGraphResult<DVector<f64>> {
        check_arity("PriorFactor", 1, values, jacobians.as_deref())?;
        let x = values[0];
        let residual = self.prior.local_coordinates(x)?;
        if let Some(jac) = jacobians {
            jac[0] = self.prior.local_coordinates_jacobian(x)?;
        }
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::numerical::{DEFAULT_STEP, factor_jacobians};
    use crate::core::{Values, pose_key};
    use crate::manifold::{LieGroup, ManifoldError, SE3, SO3};
    use nalgebra::Vector3;

    #[test]
    fn test_pose_prior_jacobian() {
        let prior = SE3::new(
            SO3::from_scaled_axis(Vector3::new(0.2, 0.1, -0.3)),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let estimate = SE3::new(
            SO3::from_scaled_axis(Vector3::new(0.25, 0.05, -0.2)),
            Vector3::new(1.1, 1.9, 3.2),
        );
        let factor = PriorFactor::new(pose_key(0), prior, NoiseModel::unit(6)).unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), estimate).unwrap();

        let x = values.at(pose_key(0)).unwrap();
        let mut analytic = vec![DMatrix::zeros(6, 6)];
        factor
            .evaluate_error(&[x], Some(analytic.as_mut_slice()))
            .unwrap();
        let numerical = factor_jacobians(&factor, &values, DEFAULT_STEP).unwrap();
        assert!((&analytic[0] - &numerical[0]).amax() < 1e-6);
    }

    #[test]
    fn test_prior_error_at_prior_is_zero() {
        let factor = PriorFactor::new(
            pose_key(2),
            Vector3::new(1.0, -1.0, 0.5),
            NoiseModel::isotropic(3, 0.1).unwrap(),
        )
        .unwrap();
        let mut values = Values::new();
        values
            .insert(pose_key(2), Vector3::new(1.0, -1.0, 0.5))
            .unwrap();
        assert_eq!(factor.error(&values).unwrap(), 0.0);

        values
            .update(pose_key(2), Vector3::new(1.1, -1.0, 0.5))
            .unwrap();
        // whitened 1.0 on the first row
        assert!((factor.error(&values).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_prior_type_mismatch() {
        let factor = PriorFactor::new(pose_key(0), SO3::identity(), NoiseModel::unit(3)).unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), Vector3::zeros()).unwrap();
        assert_eq!(
            factor.error(&values),
            Err(FactorGraphError::Manifold(ManifoldError::TypeMismatch {
                expected: "Rot3",
                found: "Point3",
            }))
        );
    }

    #[test]
    fn test_noise_dimension_checked() {
        assert!(PriorFactor::new(pose_key(0), SO3::identity(), NoiseModel::unit(6)).is_err());
    }

    #[test]
    fn test_short_inputs_are_rejected() {
        let factor = PriorFactor::new(pose_key(0), SO3::identity(), NoiseModel::unit(3)).unwrap();
        let x = Value::from(SO3::identity());
        assert_eq!(
            factor.evaluate_error(&[], None),
            Err(FactorGraphError::DimensionMismatch {
                context: "PriorFactor",
                expected: 1,
                actual: 0,
            })
        );
        let mut none: Vec<DMatrix<f64>> = Vec::new();
        assert!(matches!(
            factor.evaluate_error(&[&x], Some(none.as_mut_slice())),
            Err(FactorGraphError::DimensionMismatch { actual: 0, .. })
        ));
    }

    #[test]
    fn test_equality() {
        let a = PriorFactor::new(pose_key(0), SO3::identity(), NoiseModel::unit(3)).unwrap();
        assert_eq!(a, a.clone());
        let other_key = PriorFactor::new(pose_key(1), SO3::identity(), NoiseModel::unit(3));
        assert_ne!(a, other_key.unwrap());
        let other_noise = PriorFactor::new(pose_key(0), SO3::identity(), NoiseModel::hard(3));
        assert_ne!(a, other_noise.unwrap());
        let other_prior = PriorFactor::new(
            pose_key(0),
            SO3::from_euler_angles(0.1, 0.0, 0.0),
            NoiseModel::unit(3),
        );
        assert_ne!(a, other_prior.unwrap());
    }
}
