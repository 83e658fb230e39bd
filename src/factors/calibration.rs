//! Five-parameter pinhole calibration.
//!
//! # Camera Model
//!
//! ```text
//! x_n = X / Z,  y_n = Y / Z
//! u = fx * x_n + s * y_n + u0
//! v = fy * y_n + v0
//! ```

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector2, Vector3};

/// Pinhole intrinsics with skew, no distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cal3S2 {
    /// Focal length in x (pixels)
    pub fx: f64,
    /// Focal length in y (pixels)
    pub fy: f64,
    /// Skew
    pub s: f64,
    /// Principal point x (pixels)
    pub u0: f64,
    /// Principal point y (pixels)
    pub v0: f64,
}

impl Cal3S2 {
    #[must_use]
    pub const fn new(fx: f64, fy: f64, s: f64, u0: f64, v0: f64) -> Self {
        Self { fx, fy, s, u0, v0 }
    }

    /// Calibration matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.s, self.u0, //
            0.0, self.fy, self.v0, //
            0.0, 0.0, 1.0,
        )
    }

    /// Normalized image coordinates to pixels.
    pub fn uncalibrate(&self, p: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * p.x + self.s * p.y + self.u0,
            self.fy * p.y + self.v0,
        )
    }

    /// ∂uncalibrate/∂p
    pub fn uncalibrate_jacobian(&self) -> Matrix2<f64> {
        Matrix2::new(self.fx, self.s, 0.0, self.fy)
    }

    /// Pixels to normalized image coordinates.
    pub fn calibrate(&self, uv: &Vector2<f64>) -> Vector2<f64> {
        let y = (uv.y - self.v0) / self.fy;
        let x = (uv.x - self.u0 - self.s * y) / self.fx;
        Vector2::new(x, y)
    }

    /// Pixel of a camera-frame point, or `None` when it is not in front of
    /// the camera.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<Vector2<f64>> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some(self.uncalibrate(&Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z)))
    }

    /// ∂pixel/∂p_cam
    pub fn jacobian_point(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let inv_z = 1.0 / p_cam.z;
        let x_n = p_cam.x * inv_z;
        let y_n = p_cam.y * inv_z;
        let d_normalized = Matrix2x3::new(
            inv_z,
            0.0,
            -x_n * inv_z,
            0.0,
            inv_z,
            -y_n * inv_z,
        );
        self.uncalibrate_jacobian() * d_normalized
    }
}
