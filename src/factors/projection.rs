//! Monocular projection factor.
//!
//! Residual between the projection of a landmark through a posed camera and
//! the measured pixel: `K·π(Rᵀ(p - t)) - z`, where π divides by depth.

use super::{check_arity, expect_point3, expect_pose3};
use crate::core::{Key, NonlinearFactor, Value};
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::factors::calibration::Cal3S2;
use crate::linalg::NoiseModel;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Vector2};
use std::sync::Arc;

/// Pixel measurement of landmark `point` from camera `pose`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionFactor {
    keys: [Key; 2],
    measured: Vector2<f64>,
    calibration: Arc<Cal3S2>,
    noise_model: NoiseModel,
}

impl ProjectionFactor {
    pub fn new(
        measured: Vector2<f64>,
        noise_model: NoiseModel,
        pose: Key,
        point: Key,
        calibration: Arc<Cal3S2>,
    ) -> FactorGraphResult<Self> {
        if noise_model.dim() != 2 {
            return Err(FactorGraphError::DimensionMismatch {
                context: "ProjectionFactor noise model",
                expected: 2,
                actual: noise_model.dim(),
            });
        }
        Ok(Self {
            keys: [pose, point],
            measured,
            calibration,
            noise_model,
        })
    }

    pub fn measured(&self) -> &Vector2<f64> {
        &self.measured
    }

    pub fn calibration(&self) -> &Cal3S2 {
        &self.calibration
    }

    pub fn pose_key(&self) -> Key {
        self.keys[0]
    }

    pub fn point_key(&self) -> Key {
        self.keys[1]
    }
}

impl NonlinearFactor for ProjectionFactor {
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
        check_arity("ProjectionFactor", 2, values, jacobians.as_deref())?;
        let pose = expect_pose3(values[0])?;
        let point = expect_point3(values[1])?;

        let mut d_pose = Matrix3x6::zeros();
        let mut d_point = Matrix3::zeros();
        let p_cam = pose.transform_to(point, Some(&mut d_pose), Some(&mut d_point));

        let pixel = self
            .calibration
            .project(&p_cam)
            .ok_or(FactorGraphError::Cheirality {
                pose: self.keys[0],
                point: self.keys[1],
            })?;

        if let Some(jac) = jacobians {
            let d_pixel = self.calibration.jacobian_point(&p_cam);
            let h_pose = d_pixel * d_pose;
            let h_point = d_pixel * d_point;
            jac[0] = DMatrix::from_column_slice(2, 6, h_pose.as_slice());
            jac[1] = DMatrix::from_column_slice(2, 3, h_point.as_slice());
        }

        let r = pixel - self.measured;
        Ok(DVector::from_column_slice(r.as_slice()))
    }
}
