//! Domain factor types.
//!
//! These are ordinary implementations of [`NonlinearFactor`](crate::core::NonlinearFactor):
//!
//! - `prior`: unary prior on any variable type
//! - `between`: relative measurement between two variables
//! - `projection`: monocular pixel measurement of a landmark from a camera pose
//! - `calibration`: the five-parameter pinhole calibration used by projection

use crate::core::Value;
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::manifold::{ManifoldError, SE3};
use nalgebra::{DMatrix, Vector3};

pub mod between;
pub mod calibration;
pub mod prior;
pub mod projection;

pub use between::BetweenFactor;
pub use calibration::Cal3S2;
pub use prior::PriorFactor;
pub use projection::ProjectionFactor;

/// Fail unless `values`, and `jacobians` when requested, hold one entry per key.
fn check_arity(
    context: &'static str,
    arity: usize,
    values: &[&Value],
    jacobians: Option<&[DMatrix<f64>]>,
) -> FactorGraphResult<()> {
    let lengths = std::iter::once(values.len()).chain(jacobians.map(<[_]>::len));
    for actual in lengths {
        if actual != arity {
            return Err(FactorGraphError::DimensionMismatch {
                context,
                expected: arity,
                actual,
            });
        }
    }
    Ok(())
}

fn expect_pose3(value: &Value) -> FactorGraphResult<&SE3> {
    value.as_pose3().ok_or_else(|| {
        ManifoldError::TypeMismatch {
            expected: "Pose3",
            found: value.type_name(),
        }
        .into()
    })
}

fn expect_point3(value: &Value) -> FactorGraphResult<&Vector3<f64>> {
    value.as_point3().ok_or_else(|| {
        ManifoldError::TypeMismatch {
            expected: "Point3",
            found: value.type_name(),
        }
        .into()
    })
}
