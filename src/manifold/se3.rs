//! SE(3) - Special Euclidean Group in 3D
//!
//! SE(3) elements are represented as a combination of SO(3) rotation and Vector3 translation.
//! SE(3) tangent elements are represented as `[theta(3), rho(3)]`: rotation first,
//! then translation.
//!
//! Group exponential and logarithm are the exact Lie maps. As an optimization
//! variable a pose retracts with the decoupled rule
//! `R' = R · Exp(θ)`, `t' = t + R · ρ`, whose local coordinates are cheap
//! and exactly invertible.

use crate::manifold::so3::{SO3, SO3Tangent};
use crate::manifold::{LieGroup, Manifold, ManifoldResult, Tangent, check_tangent_dim, skew};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x6, Matrix4, Matrix6, Vector3, Vector6};
use std::fmt;

/// SE(3) group element representing rigid body transformations in 3D.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3 {
    /// Rotation part as SO(3) element
    rotation: SO3,
    /// Translation part as Vector3
    translation: Vector3<f64>,
}

impl fmt::Display for SE3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.translation;
        let q = self.rotation.quaternion();
        write!(
            f,
            "SE3(translation: [{:.4}, {:.4}, {:.4}], rotation: [w: {:.4}, x: {:.4}, y: {:.4}, z: {:.4}])",
            t.x, t.y, t.z, q.w, q.i, q.j, q.k
        )
    }
}

/// SE(3) tangent space element, internally `[θx, θy, θz, ρx, ρy, ρz]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SE3Tangent {
    data: Vector6<f64>,
}

impl fmt::Display for SE3Tangent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let theta = self.theta();
        let rho = self.rho();
        write!(
            f,
            "se3(theta: [{:.4}, {:.4}, {:.4}], rho: [{:.4}, {:.4}, {:.4}])",
            theta.x, theta.y, theta.z, rho.x, rho.y, rho.z
        )
    }
}

impl SE3 {
    /// Create a pose from its rotation and translation.
    pub fn new(rotation: SO3, translation: Vector3<f64>) -> Self {
        SE3 {
            rotation,
            translation,
        }
    }

    /// Create a pose from a rotation matrix and a translation.
    pub fn from_matrix_translation(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        SE3::new(SO3::from_matrix(rotation), translation)
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        SE3::new(SO3::identity(), translation)
    }

    /// Get the translation part.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Get the rotation part.
    pub fn rotation(&self) -> &SO3 {
        &self.rotation
    }

    /// Get the rotation matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.rotation_matrix()
    }

    /// Homogeneous 4x4 matrix.
    pub fn matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Express a world point in this pose's frame: `Rᵀ (p - t)`.
    ///
    /// Jacobians are with respect to the pose tangent `[θ, ρ]` under the
    /// pose retraction, and with respect to the world point.
    pub fn transform_to(
        &self,
        point: &Vector3<f64>,
        jacobian_pose: Option<&mut Matrix3x6<f64>>,
        jacobian_point: Option<&mut Matrix3<f64>>,
    ) -> Vector3<f64> {
        let local = self.rotation.unrotate(&(point - self.translation));

        if let Some(jac) = jacobian_pose {
            jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&skew(&local));
            jac.fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-Matrix3::identity()));
        }

        if let Some(jac) = jacobian_point {
            *jac = self.rotation_matrix().transpose();
        }

        local
    }

    /// Derivatives of `self.between(other)` under the decoupled retraction of
    /// `self` and of `other`.
    ///
    /// With `b = (R_b, t_b) = self⁻¹ ∘ other`, perturbing `self` by `(θ, ρ)`
    /// moves `b` by `(-R_bᵀ θ, R_bᵀ (t_b^ θ - ρ))`; perturbing `other` moves
    /// `b` by exactly `(θ, ρ)`.
    pub fn between_jacobians(&self, other: &Self) -> (Matrix6<f64>, Matrix6<f64>) {
        let relative = self.between(other);
        let rt = relative.rotation_matrix().transpose();

        let mut d_self = Matrix6::zeros();
        d_self.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-rt));
        d_self
            .fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(rt * skew(&relative.translation)));
        d_self.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-rt));
        (d_self, Matrix6::identity())
    }
}

impl LieGroup for SE3 {
    type TangentVector = SE3Tangent;
    type LieAlgebra = Matrix4<f64>;

    const DOF: usize = 6;

    fn identity() -> Self {
        SE3 {
            rotation: SO3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// M⁻¹ = [Rᵀ  -Rᵀt; 0 1]
    fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let translation = -rotation.act(&self.translation);
        SE3 {
            rotation,
            translation,
        }
    }

    fn compose(&self, other: &Self) -> Self {
        SE3 {
            rotation: self.rotation.compose(&other.rotation),
            translation: self.translation + self.rotation.act(&other.translation),
        }
    }

    /// τ = log(M) = [Log(R); V⁻¹(θ) t]
    fn log(&self) -> SE3Tangent {
        let theta = self.rotation.log();
        let rho = theta.left_jacobian_inv() * self.translation;
        SE3Tangent::new(theta.axis_angle(), rho)
    }

    fn act(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.act(point) + self.translation
    }

    fn is_approx(&self, other: &Self, tolerance: f64) -> bool {
        self.rotation.is_approx(&other.rotation, tolerance)
            && (self.translation - other.translation).norm() <= tolerance
    }
}

impl Manifold for SE3 {
    fn dim(&self) -> usize {
        6
    }

    fn retract(&self, delta: &[f64]) -> ManifoldResult<Self> {
        check_tangent_dim(6, delta.len())?;
        let omega = Vector3::new(delta[0], delta[1], delta[2]);
        let v = Vector3::new(delta[3], delta[4], delta[5]);
        Ok(SE3 {
            rotation: self.rotation.compose(&SO3Tangent::new(omega).exp()),
            translation: self.translation + self.rotation.act(&v),
        })
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let omega = self.rotation.between(&other.rotation).log().axis_angle();
        let v = self.rotation.unrotate(&(other.translation - self.translation));
        DVector::from_vec(vec![omega.x, omega.y, omega.z, v.x, v.y, v.z])
    }

    /// Block diagonal: `J_r⁻¹(ω)` on rotation, `R₁ᵀ R₂` on translation.
    fn local_coordinates_jacobian(&self, other: &Self) -> DMatrix<f64> {
        let relative = self.rotation.between(&other.rotation);
        let jr_inv = relative.log().right_jacobian_inv();
        let r12 = relative.rotation_matrix();

        let mut jac = DMatrix::zeros(6, 6);
        jac.view_mut((0, 0), (3, 3)).copy_from(&jr_inv);
        jac.view_mut((3, 3), (3, 3)).copy_from(&r12);
        jac
    }
}

impl SE3Tangent {
    /// Create a tangent from rotation and translation parts.
    pub fn new(theta: Vector3<f64>, rho: Vector3<f64>) -> Self {
        let mut data = Vector6::zeros();
        data.fixed_rows_mut::<3>(0).copy_from(&theta);
        data.fixed_rows_mut::<3>(3).copy_from(&rho);
        SE3Tangent { data }
    }

    /// Rotational part.
    pub fn theta(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(0).into_owned()
    }

    /// Translational part.
    pub fn rho(&self) -> Vector3<f64> {
        self.data.fixed_rows::<3>(3).into_owned()
    }

    /// All six coefficients, rotation first.
    pub fn coeffs(&self) -> Vector6<f64> {
        self.data
    }
}

impl Tangent<SE3> for SE3Tangent {
    /// M = exp(τ) = [Exp(θ)  V(θ)ρ; 0 1]
    fn exp(&self) -> SE3 {
        let theta = SO3Tangent::new(self.theta());
        SE3 {
            rotation: theta.exp(),
            translation: theta.left_jacobian() * self.rho(),
        }
    }

    fn hat(&self) -> Matrix4<f64> {
        let mut m = Matrix4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&skew(&self.theta()));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.rho());
        m
    }

    fn zero() -> Self {
        SE3Tangent {
            data: Vector6::zeros(),
        }
    }

    fn is_zero(&self, tolerance: f64) -> bool {
        self.data.norm() < tolerance
    }
}
