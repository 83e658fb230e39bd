//! SO(3) - Special Orthogonal Group in 3D
//!
//! SO(3) elements are represented using nalgebra's UnitQuaternion internally.
//! SO(3) tangent elements are represented as axis-angle vectors in R³,
//! where the direction gives the axis of rotation and the magnitude gives the angle.
//!
//! As a variable, a rotation retracts on the right: `R ⊕ θ = R · Exp(θ)`.

use crate::manifold::{LieGroup, Manifold, ManifoldResult, Tangent, check_tangent_dim, skew};
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use std::fmt;

/// SO(3) group element representing rotations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3 {
    /// Internal representation as a unit quaternion
    quaternion: UnitQuaternion<f64>,
}

impl fmt::Display for SO3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = self.quaternion.quaternion();
        write!(
            f,
            "SO3(quaternion: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            q.w, q.i, q.j, q.k
        )
    }
}

/// SO(3) tangent space element: an axis-angle vector `[θx, θy, θz]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SO3Tangent {
    data: Vector3<f64>,
}

impl fmt::Display for SO3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "so3(axis-angle: [{:.4}, {:.4}, {:.4}])",
            self.data.x, self.data.y, self.data.z
        )
    }
}

impl SO3 {
    /// Create a new SO(3) element from a unit quaternion.
    pub fn new(quaternion: UnitQuaternion<f64>) -> Self {
        SO3 { quaternion }
    }

    /// Create SO(3) from scaled axis (axis-angle vector).
    pub fn from_scaled_axis(axis_angle: Vector3<f64>) -> Self {
        SO3::new(UnitQuaternion::from_scaled_axis(axis_angle))
    }

    /// Create SO(3) from Euler angles (roll, pitch, yaw).
    pub fn from_euler_angles(roll: f64, pitch: f64, yaw: f64) -> Self {
        SO3::new(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// Create SO(3) from a rotation matrix. The matrix is assumed orthonormal.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        let rotation = Rotation3::from_matrix_unchecked(*matrix);
        SO3::new(UnitQuaternion::from_rotation_matrix(&rotation))
    }

    /// Get the quaternion representation.
    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        self.quaternion
    }

    /// Get the rotation matrix (3x3).
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.quaternion.to_rotation_matrix().into_inner()
    }

    /// Rotate a point by the inverse rotation, `Rᵀ p`.
    pub fn unrotate(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion.inverse_transform_vector(point)
    }

    /// Derivatives of `self.between(other)` under right perturbations of
    /// `self` and of `other`.
    ///
    /// `(R₁ Exp(δ))ᵀ R₂ = R_b Exp(-R_bᵀ δ)` and `R₁ᵀ R₂ Exp(δ) = R_b Exp(δ)`.
    pub fn between_jacobians(&self, other: &Self) -> (Matrix3<f64>, Matrix3<f64>) {
        let relative = self.between(other).rotation_matrix();
        (-relative.transpose(), Matrix3::identity())
    }
}

impl LieGroup for SO3 {
    type TangentVector = SO3Tangent;
    type LieAlgebra = Matrix3<f64>;

    const DOF: usize = 3;

    fn identity() -> Self {
        SO3 {
            quaternion: UnitQuaternion::identity(),
        }
    }

    /// R⁻¹ = Rᵀ, for quaternions: q⁻¹ = q*
    fn inverse(&self) -> Self {
        SO3 {
            quaternion: self.quaternion.inverse(),
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SO3 {
            quaternion: self.quaternion * other.quaternion,
        }
    }

    /// θu = Log(q) = (2 / ‖v‖) · v · atan2(‖v‖, w)
    ///
    /// The quaternion is flipped to the w ≥ 0 hemisphere so the returned
    /// angle lies in [0, π].
    fn log(&self) -> SO3Tangent {
        let q = self.quaternion.quaternion();
        let sin_angle_squared = q.i * q.i + q.j * q.j + q.k * q.k;

        let log_coeff = if sin_angle_squared > f64::EPSILON {
            let sin_angle = sin_angle_squared.sqrt();
            let cos_angle = q.w;
            let two_angle = 2.0
                * if cos_angle < 0.0 {
                    f64::atan2(-sin_angle, -cos_angle)
                } else {
                    f64::atan2(sin_angle, cos_angle)
                };
            two_angle / sin_angle
        } else {
            // small-angle limit
            2.0 * q.w.signum()
        };

        SO3Tangent::new(Vector3::new(
            q.i * log_coeff,
            q.j * log_coeff,
            q.k * log_coeff,
        ))
    }

    fn act(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion * point
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.between(other).log().angle() <= tolerance
    }
}

impl Manifold for SO3 {
    fn dim(&self) -> usize {
        3
    }

    fn retract(&self, delta: &[f64]) -> ManifoldResult<Self> {
        check_tangent_dim(3, delta.len())?;
        let tangent = SO3Tangent::new(Vector3::from_column_slice(delta));
        Ok(self.compose(&tangent.exp()))
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let theta = self.between(other).log();
        DVector::from_column_slice(theta.data.as_slice())
    }

    /// Log(R₁ᵀ R₂ Exp(δ)) ≈ Log(R₁ᵀ R₂) + J_r⁻¹ δ
    fn local_coordinates_jacobian(&self, other: &Self) -> DMatrix<f64> {
        let jr_inv = self.between(other).log().right_jacobian_inv();
        DMatrix::from_column_slice(3, 3, jr_inv.as_slice())
    }
}

impl SO3Tangent {
    /// Create a new SO3Tangent from axis-angle vector.
    pub fn new(axis_angle: Vector3<f64>) -> Self {
        SO3Tangent { data: axis_angle }
    }

    /// Create SO3Tangent from individual components.
    pub fn from_components(x: f64, y: f64, z: f64) -> Self {
        SO3Tangent::new(Vector3::new(x, y, z))
    }

    /// Get the axis-angle vector.
    pub fn axis_angle(&self) -> Vector3<f64> {
        self.data
    }

    /// Get the angle of rotation.
    pub fn angle(&self) -> f64 {
        self.data.norm()
    }

    /// Right Jacobian of the exponential map.
    ///
    /// J_r(θ) = I - (1 - cos θ)/θ² [θ]ₓ + (θ - sin θ)/θ³ [θ]ₓ²
    pub fn right_jacobian(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let w = skew(&self.data);

        if theta_sq <= f64::EPSILON {
            Matrix3::identity() - 0.5 * w
        } else {
            let theta = theta_sq.sqrt();
            Matrix3::identity() - (1.0 - theta.cos()) / theta_sq * w
                + (theta - theta.sin()) / (theta_sq * theta) * w * w
        }
    }

    /// Inverse of the right Jacobian.
    ///
    /// J_r⁻¹(θ) = I + ½[θ]ₓ + (1/θ² - (1 + cos θ)/(2θ sin θ)) [θ]ₓ²
    pub fn right_jacobian_inv(&self) -> Matrix3<f64> {
        let theta_sq = self.data.norm_squared();
        let w = skew(&self.data);

        if theta_sq <= f64::EPSILON {
            Matrix3::identity() + 0.5 * w
        } else {
            let theta = theta_sq.sqrt();
            Matrix3::identity()
                + 0.5 * w
                + (1.0 / theta_sq - (1.0 + theta.cos()) / (2.0 * theta * theta.sin())) * w * w
        }
    }

    /// Left Jacobian, J_l(θ) = J_r(θ)ᵀ.
    pub fn left_jacobian(&self) -> Matrix3<f64> {
        self.right_jacobian().transpose()
    }

    /// Inverse of the left Jacobian.
    pub fn left_jacobian_inv(&self) -> Matrix3<f64> {
        self.right_jacobian_inv().transpose()
    }
}

impl Tangent<SO3> for SO3Tangent {
    /// q = Exp(θu) = cos(θ/2) + u sin(θ/2)
    fn exp(&self) -> SO3 {
        let theta_squared = self.data.norm_squared();

        let quaternion = if theta_squared > f64::EPSILON {
            UnitQuaternion::from_scaled_axis(self.data)
        } else {
            UnitQuaternion::from_quaternion(Quaternion::new(
                1.0,
                self.data.x / 2.0,
                self.data.y / 2.0,
                self.data.z / 2.0,
            ))
        };

        SO3 { quaternion }
    }

    fn hat(&self) -> Matrix3<f64> {
        skew(&self.data)
    }

    fn zero() -> Self {
        SO3Tangent::new(Vector3::zeros())
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
