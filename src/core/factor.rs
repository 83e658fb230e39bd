//! Nonlinear factor contract.
//!
//! A factor references an ordered list of keys and computes a residual
//! `h(x) - z` from the current values of those keys. Arity is a runtime
//! property: implementors receive a slice of type-erased [`Value`] references
//! in key order and fill one Jacobian block per key when asked.
//!
//! Linearization is provided by the trait: it gathers the values, asks the
//! factor for its residual and Jacobians, then whitens both through the noise
//! model so the resulting [`JacobianFactor`] has unit sigma on soft rows and
//! sigma zero on hard rows.

use crate::core::key::Key;
use crate::core::ordering::Ordering;
use crate::core::values::{Value, Values};
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::{JacobianFactor, NoiseModel};
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::sync::Arc;

/// Constraint over a fixed set of variables.
pub trait NonlinearFactor: fmt::Debug + Send + Sync {
    /// Keys in the order [`NonlinearFactor::evaluate_error`] receives their values.
    fn keys(&self) -> &[Key];

    fn noise_model(&self) -> &NoiseModel;

    /// Compute the unwhitened residual `h(x) - z`.
    ///
    /// `values[i]` is the current value of `keys()[i]`. When `jacobians` is
    /// given it holds one zeroed `dim() × values[i].dim()` block per key,
    /// which the factor overwrites with `∂residual/∂δx_i` in the local tangent
    /// coordinates of that value.
    fn evaluate_error(
        &self,
        values: &[&Value],
        jacobians: Option<&mut [DMatrix<f64>]>,
    ) -> FactorGraphResult<DVector<f64>>;

    /// Number of variables this factor touches.
    fn size(&self) -> usize {
        self.keys().len()
    }

    /// Residual dimension.
    fn dim(&self) -> usize {
        self.noise_model().dim()
    }

    /// Unwhitened residual at `values`.
    fn unwhitened_error(&self, values: &Values) -> FactorGraphResult<DVector<f64>> {
        let inputs = gather_values(self.keys(), values)?;
        let residual = self.evaluate_error(&inputs, None)?;
        check_residual(self.dim(), &residual)?;
        Ok(residual)
    }

    /// `0.5 · ‖whiten(h(x) - z)‖²`
    fn error(&self, values: &Values) -> FactorGraphResult<f64> {
        let residual = self.unwhitened_error(values)?;
        Ok(0.5 * self.noise_model().distance(&residual))
    }

    /// First-order expansion at `values`, expressed over `ordering` slots.
    ///
    /// The returned factor is whitened: `A = whiten(J)` and `b = -whiten(r)`,
    /// so that `A·δx - b` is the whitened residual after a step `δx`.
    fn linearize(&self, values: &Values, ordering: &Ordering) -> FactorGraphResult<JacobianFactor> {
        let keys = self.keys();
        let inputs = gather_values(keys, values)?;
        let rows = self.dim();

        let mut jacobians: Vec<DMatrix<f64>> = inputs
            .iter()
            .map(|v| DMatrix::zeros(rows, v.dim()))
            .collect();
        let residual = self.evaluate_error(&inputs, Some(jacobians.as_mut_slice()))?;
        check_residual(rows, &residual)?;

        let model = self.noise_model();
        let mut terms = Vec::with_capacity(keys.len());
        for ((key, value), jacobian) in keys.iter().zip(&inputs).zip(&jacobians) {
            if jacobian.shape() != (rows, value.dim()) {
                return Err(FactorGraphError::DimensionMismatch {
                    context: "NonlinearFactor Jacobian columns",
                    expected: value.dim(),
                    actual: jacobian.ncols(),
                });
            }
            let slot = ordering.index_of(*key)?;
            terms.push((slot, model.whiten_matrix(jacobian)));
        }

        JacobianFactor::new(terms, -model.whiten(&residual), model.whitened_model())
    }
}

/// Values for `keys`, in order. A missing key is a [`FactorGraphError::MissingVariable`].
pub fn gather_values<'a>(keys: &[Key], values: &'a Values) -> FactorGraphResult<Vec<&'a Value>> {
    keys.iter()
        .map(|&key| values.get(key).ok_or(FactorGraphError::MissingVariable(key)))
        .collect()
}

fn check_residual(expected: usize, residual: &DVector<f64>) -> FactorGraphResult<()> {
    if residual.len() != expected {
        return Err(FactorGraphError::DimensionMismatch {
            context: "NonlinearFactor residual",
            expected,
            actual: residual.len(),
        });
    }
    Ok(())
}

/// Residual callback used by [`CustomFactor`].
pub type ErrorFunction =
    dyn Fn(&[&Value], Option<&mut [DMatrix<f64>]>) -> FactorGraphResult<DVector<f64>>
    + Send
    + Sync;

/// Factor whose residual is an arbitrary closure over any number of keys.
#[derive(Clone)]
pub struct CustomFactor {
    keys: Vec<Key>,
    noise_model: NoiseModel,
    error_fn: Arc<ErrorFunction>,
}

impl CustomFactor {
    pub fn new<F>(keys: Vec<Key>, noise_model: NoiseModel, error_fn: F) -> Self
    where
        F: Fn(&[&Value], Option<&mut [DMatrix<f64>]>) -> FactorGraphResult<DVector<f64>>
            + Send
            + Sync
            + 'static,
    {
        CustomFactor {
            keys,
            noise_model,
            error_fn: Arc::new(error_fn),
        }
    }
}

impl fmt::Debug for CustomFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFactor")
            .field("keys", &self.keys)
            .field("noise_model", &self.noise_model)
            .finish_non_exhaustive()
    }
}

impl NonlinearFactor for CustomFactor {
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
        (self.error_fn)(values, jacobians)
    }
}
