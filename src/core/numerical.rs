//! Central-difference Jacobians on manifolds.
//!
//! Perturbations are applied through [`Value::retract`], so the columns are
//! derivatives with respect to the local tangent coordinates of each input,
//! matching the convention analytic factor Jacobians use.

use crate::core::factor::{NonlinearFactor, gather_values};
use crate::core::values::{Value, Values};
use crate::error::{FactorGraphError, FactorGraphResult};
use nalgebra::{DMatrix, DVector};

/// Step used when callers have no better choice.
pub const DEFAULT_STEP: f64 = 1e-5;

/// Jacobian of `f` with respect to the tangent space of `value`.
pub fn numerical_jacobian<F>(f: F, value: &Value, step: f64) -> FactorGraphResult<DMatrix<f64>>
where
    F: Fn(&Value) -> FactorGraphResult<DVector<f64>>,
{
    let mut jacobians = numerical_jacobians(|inputs| f(inputs[0]), &[value], step)?;
    jacobians.pop().ok_or_else(|| {
        FactorGraphError::InvalidInput("numerical Jacobian produced no block".to_string())
    })
}

/// One Jacobian block per input of a multi-argument function.
pub fn numerical_jacobians<F>(
    f: F,
    inputs: &[&Value],
    step: f64,
) -> FactorGraphResult<Vec<DMatrix<f64>>>
where
    F: Fn(&[&Value]) -> FactorGraphResult<DVector<f64>>,
{
    if !(step.is_finite() && step > 0.0) {
        return Err(FactorGraphError::InvalidInput(format!(
            "finite difference step must be positive, got {step}"
        )));
    }
    let rows = f(inputs)?.len();
    let mut blocks = Vec::with_capacity(inputs.len());

    for (k, value) in inputs.iter().enumerate() {
        let cols = value.dim();
        let mut block = DMatrix::zeros(rows, cols);
        let mut delta = vec![0.0; cols];
        for j in 0..cols {
            delta[j] = step;
            let plus = value.retract(&delta)?;
            delta[j] = -step;
            let minus = value.retract(&delta)?;
            delta[j] = 0.0;

            let mut perturbed: Vec<&Value> = inputs.to_vec();
            perturbed[k] = &plus;
            let f_plus = f(&perturbed)?;
            perturbed[k] = &minus;
            let f_minus = f(&perturbed)?;
            if f_plus.len() != rows || f_minus.len() != rows {
                return Err(FactorGraphError::DimensionMismatch {
                    context: "numerical_jacobians output",
                    expected: rows,
                    actual: f_plus.len().max(f_minus.len()),
                });
            }
            block
                .column_mut(j)
                .copy_from(&((f_plus - f_minus) / (2.0 * step)));
        }
        blocks.push(block);
    }
    Ok(blocks)
}

/// Numerical Jacobians of a factor's unwhitened residual at `values`.
pub fn factor_jacobians(
    factor: &dyn NonlinearFactor,
    values: &Values,
    step: f64,
) -> FactorGraphResult<Vec<DMatrix<f64>>> {
    let inputs = gather_values(factor.keys(), values)?;
    numerical_jacobians(|x| factor.evaluate_error(x, None), &inputs, step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{LieGroup, SE3, SO3};
    use nalgebra::Vector3;

    #[test]
    fn test_linear_function() {
        let x = Value::Vector(DVector::from_vec(vec![1.0, 2.0]));
        let j = numerical_jacobian(
            |v| {
                let v = v.as_vector().ok_or_else(|| {
                    FactorGraphError::InvalidInput("vector expected".to_string())
                })?;
                Ok(DVector::from_vec(vec![3.0 * v[0] - v[1], v[0] * v[1]]))
            },
            &x,
            DEFAULT_STEP,
        )
        .unwrap();
        let expected = DMatrix::from_row_slice(2, 2, &[3.0, -1.0, 2.0, 1.0]);
        assert!((j - expected).amax() < 1e-8);
    }

    #[test]
    fn test_rotation_local_coordinates_at_identity() {
        // d/dδ Log(Exp(δ)) = I at the identity
        let r = Value::Rot3(SO3::identity());
        let base = r.clone();
        let j = numerical_jacobian(
            |v| Ok(base.local_coordinates(v)?),
            &r,
            DEFAULT_STEP,
        )
        .unwrap();
        assert!((j - DMatrix::identity(3, 3)).amax() < 1e-8);
    }

    #[test]
    fn test_multi_argument_blocks() {
        let pose = Value::Pose3(SE3::new(
            SO3::from_scaled_axis(Vector3::new(0.1, -0.2, 0.3)),
            Vector3::new(1.0, 2.0, 3.0),
        ));
        let point = Value::Point3(Vector3::new(0.5, 0.5, 4.0));
        let blocks = numerical_jacobians(
            |x| {
                let pose = x[0].as_pose3().ok_or_else(|| {
                    FactorGraphError::InvalidInput("pose expected".to_string())
                })?;
                let point = x[1].as_point3().ok_or_else(|| {
                    FactorGraphError::InvalidInput("point expected".to_string())
                })?;
                let p = pose.transform_to(point, None, None);
                Ok(DVector::from_column_slice(p.as_slice()))
            },
            &[&pose, &point],
            DEFAULT_STEP,
        )
        .unwrap();
        assert_eq!(blocks[0].shape(), (3, 6));
        assert_eq!(blocks[1].shape(), (3, 3));

        // derivative with respect to the point is Rᵀ
        let rt = pose.as_pose3().unwrap().rotation_matrix().transpose();
        for i in 0..3 {
            for j in 0..3 {
                assert!((blocks[1][(i, j)] - rt[(i, j)]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_rejects_bad_step() {
        let x = Value::Vector(DVector::zeros(1));
        assert!(numerical_jacobian(|v| Ok(v.as_vector().unwrap().clone()), &x, 0.0).is_err());
    }
}
