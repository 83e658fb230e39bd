//! Relative measurement between two variables of the same type.

use super::check_arity;
use crate::core::{Key, NonlinearFactor, Value};
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::NoiseModel;
use nalgebra::{DMatrix, DVector};

/// Residual `local_coordinates(measured, between(x1, x2))`.
///
/// Jacobians chain the derivative of `local_coordinates` at the measurement
/// with the derivatives of `between`; for vector spaces they reduce to
/// `-I` and `I`.
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenFactor {
    keys: [Key; 2],
    measured: Value,
    noise_model: NoiseModel,
}

impl BetweenFactor {
    pub fn new(
        key1: Key,
        key2: Key,
        measured: impl Into<Value>,
        noise_model: NoiseModel,
    ) -> FactorGraphResult<Self> {
        let measured = measured.into();
        if noise_model.dim() != measured.dim() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "BetweenFactor noise model",
                expected: measured.dim(),
                actual: noise_model.dim(),
            });
        }
        Ok(Self {
            keys: [key1, key2],
            measured,
            noise_model,
        })
    }

    pub fn measured(&self) -> &Value {
        &self.measured
    }
}

impl NonlinearFactor for BetweenFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn noise_model(&self) -> &NoiseModel {
        &self.noise_model
    }

    fn evaluate_error(
        &self,
        values: &[&Value],
        jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> FactorGraphResult<DVector<f64>> {
        check_arity("BetweenFactor", 2, values, jacobians.as_deref())?;
        let (x1, x2) = (values[0], values[1]);
        let relative = x1.between(x2)?;
        let residual = self.measured.local_coordinates(&relative)?;
        if let Some(jac) = jacobians {
            let d_relative = self.measured.local_coordinates_jacobian(&relative)?;
            let (d_x1, d_x2) = x1.between_jacobians(x2)?;
            jac[0] = &d_relative * d_x1;
            jac[1] = d_relative * d_x2;
        }
        Ok(residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::numerical::{DEFAULT_STEP, factor_jacobians};
    use crate::core::{Values, pose_key};
    use crate::manifold::{LieGroup, SE3, SO3};
    use nalgebra::Vector3;

    fn pose(rx: f64, ry: f64, rz: f64, x: f64, y: f64, z: f64) -> SE3 {
        SE3::new(
            SO3::from_scaled_axis(Vector3::new(rx, ry, rz)),
            Vector3::new(x, y, z),
        )
    }

    #[test]
    fn test_pose_between_zero_at_measurement() {
        let a = pose(0.1, 0.2, 0.3, 1.0, 0.0, 0.0);
        let b = pose(-0.1, 0.4, 0.0, 2.0, 1.0, -1.0);
        let factor =
            BetweenFactor::new(pose_key(0), pose_key(1), a.between(&b), NoiseModel::unit(6))
                .unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), a).unwrap();
        values.insert(pose_key(1), b).unwrap();
        assert!(factor.error(&values).unwrap() < 1e-20);
    }

    #[test]
    fn test_point_between_linearization() {
        let factor = BetweenFactor::new(
            pose_key(0),
            pose_key(1),
            Vector3::new(1.0, 0.0, 0.0),
            NoiseModel::isotropic(3, 0.5).unwrap(),
        )
        .unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), Vector3::zeros()).unwrap();
        values
            .insert(pose_key(1), Vector3::new(1.5, 0.0, 0.0))
            .unwrap();
        let ordering = values.ordering_arbitrary();
        let linear = factor.linearize(&values, &ordering).unwrap();
        assert_eq!(linear.blocks()[0], -DMatrix::identity(3, 3) * 2.0);
        assert_eq!(linear.blocks()[1], DMatrix::identity(3, 3) * 2.0);
        assert!((linear.rhs()[0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pose_between_linearize_solves_in_one_step() {
        let a = SE3::identity();
        let measured = pose(0.0, 0.0, 0.2, 1.0, 0.0, 0.0);
        let factor =
            BetweenFactor::new(pose_key(0), pose_key(1), measured.clone(), NoiseModel::unit(6))
                .unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), a).unwrap();
        values
            .insert(pose_key(1), pose(0.0, 0.0, 0.21, 1.01, 0.0, 0.0))
            .unwrap();

        let ordering = crate::core::Ordering::from_keys([pose_key(1)]).unwrap();
        let linear = factor.linearize(&values, &ordering);
        // pose_key(0) is not in the ordering
        assert!(linear.is_err());

        let ordering = values.ordering_arbitrary();
        let linear = factor.linearize(&values, &ordering).unwrap();
        assert_eq!(linear.blocks()[1].shape(), (6, 6));
        assert!(linear.rhs().norm() > 1e-3);
    }

    #[test]
    fn test_mixed_types_fail() {
        let factor = BetweenFactor::new(
            pose_key(0),
            pose_key(1),
            SO3::identity(),
            NoiseModel::unit(3),
        )
        .unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), SO3::identity()).unwrap();
        values.insert(pose_key(1), Vector3::zeros()).unwrap();
        assert!(factor.error(&values).is_err());
    }

    #[test]
    fn test_pose_jacobians_match_numerical() {
        let a = pose(0.4, -0.3, 1.2, 1.0, -2.0, 0.5);
        let b = pose(-0.7, 0.2, 2.5, 3.0, 1.0, -1.0);
        let measured = pose(-1.0, 0.6, 1.0, 0.5, 2.0, -0.3);
        let factor =
            BetweenFactor::new(pose_key(0), pose_key(1), measured, NoiseModel::unit(6)).unwrap();
        let mut values = Values::new();
        values.insert(pose_key(0), a).unwrap();
        values.insert(pose_key(1), b).unwrap();

        let inputs = [values.at(pose_key(0)).unwrap(), values.at(pose_key(1)).unwrap()];
        let mut analytic = vec![DMatrix::zeros(6, 6), DMatrix::zeros(6, 6)];
        factor
            .evaluate_error(&inputs, Some(analytic.as_mut_slice()))
            .unwrap();
        let numerical = factor_jacobians(&factor, &values, DEFAULT_STEP).unwrap();
        for (a, n) in analytic.iter().zip(&numerical) {
            assert!((a - n).amax() < 1e-6, "analytic {a} numerical {n}");
        }
    }

    #[test]
    fn test_rotation_jacobians_match_numerical() {
        let factor = BetweenFactor::new(
            pose_key(0),
            pose_key(1),
            SO3::from_euler_angles(0.2, 0.1, -0.4),
            NoiseModel::unit(3),
        )
        .unwrap();
        let mut values = Values::new();
        values
            .insert(pose_key(0), SO3::from_euler_angles(1.0, -0.5, 0.3))
            .unwrap();
        values
            .insert(pose_key(1), SO3::from_euler_angles(-0.6, 0.8, 2.0))
            .unwrap();

        let inputs = [values.at(pose_key(0)).unwrap(), values.at(pose_key(1)).unwrap()];
        let mut analytic = vec![DMatrix::zeros(3, 3), DMatrix::zeros(3, 3)];
        factor
            .evaluate_error(&inputs, Some(analytic.as_mut_slice()))
            .unwrap();
        let numerical = factor_jacobians(&factor, &values, DEFAULT_STEP).unwrap();
        for (a, n) in analytic.iter().zip(&numerical) {
            assert!((a - n).amax() < 1e-6, "analytic {a} numerical {n}");
        }
    }

    #[test]
    fn test_short_inputs_are_rejected() {
        let factor = BetweenFactor::new(
            pose_key(0),
            pose_key(1),
            Vector3::zeros(),
            NoiseModel::unit(3),
        )
        .unwrap();
        let x = Value::from(Vector3::<f64>::zeros());
        assert_eq!(
            factor.evaluate_error(&[&x], None),
            Err(FactorGraphError::DimensionMismatch {
                context: "BetweenFactor",
                expected: 2,
                actual: 1,
            })
        );
        let mut one = vec![DMatrix::zeros(3, 3)];
        assert!(matches!(
            factor.evaluate_error(&[&x, &x], Some(one.as_mut_slice())),
            Err(FactorGraphError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_equality() {
        let noise = NoiseModel::isotropic(6, 0.1).unwrap();
        let measured = pose(0.0, 0.0, 0.2, 1.0, 0.0, 0.0);
        let factor =
            BetweenFactor::new(pose_key(0), pose_key(1), measured.clone(), noise.clone()).unwrap();
        assert_eq!(factor, factor.clone());
        let swapped =
            BetweenFactor::new(pose_key(1), pose_key(0), measured.clone(), noise.clone()).unwrap();
        assert_ne!(factor, swapped);
        let rotated = pose(0.0, 0.0, 0.3, 1.0, 0.0, 0.0);
        assert_ne!(factor, BetweenFactor::new(pose_key(0), pose_key(1), rotated, noise).unwrap());
    }
}
