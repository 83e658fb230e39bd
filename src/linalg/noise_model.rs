//! Gaussian noise models used to whiten residuals.
//!
//! A zero sigma marks a hard constraint row. Such rows are never divided by
//! their sigma: whitening leaves them untouched and the elimination treats them
//! as equality rows with infinite precision.

use crate::error::{FactorGraphError, FactorGraphResult};
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Noise model attached to a factor's residual.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseModel {
    /// Identity covariance
    Unit { dim: usize },
    /// Same sigma on every row
    Isotropic { dim: usize, sigma: f64 },
    /// Independent per-row sigmas, all positive
    Diagonal { sigmas: DVector<f64> },
    /// Per-row sigmas where zero rows are hard constraints
    Constrained { sigmas: DVector<f64> },
}

fn check_sigma(sigma: f64) -> FactorGraphResult<()> {
    if sigma.is_finite() && sigma >= 0.0 {
        Ok(())
    } else {
        Err(FactorGraphError::InvalidNoiseModel(format!(
            "sigma must be finite and non-negative, got {sigma}"
        )))
    }
}

impl NoiseModel {
    pub fn unit(dim: usize) -> Self {
        NoiseModel::Unit { dim }
    }

    /// Isotropic model. A zero sigma yields an all-hard constrained model.
    pub fn isotropic(dim: usize, sigma: f64) -> FactorGraphResult<Self> {
        check_sigma(sigma)?;
        if sigma == 0.0 {
            Ok(NoiseModel::hard(dim))
        } else {
            Ok(NoiseModel::Isotropic { dim, sigma })
        }
    }

    /// Diagonal model; promoted to [`NoiseModel::Constrained`] if any sigma is zero.
    pub fn diagonal(sigmas: DVector<f64>) -> FactorGraphResult<Self> {
        for &s in sigmas.iter() {
            check_sigma(s)?;
        }
        if sigmas.iter().any(|&s| s == 0.0) {
            Ok(NoiseModel::Constrained { sigmas })
        } else {
            Ok(NoiseModel::Diagonal { sigmas })
        }
    }

    /// Mixed model where zero sigmas are hard rows and the rest are soft.
    pub fn constrained(sigmas: DVector<f64>) -> FactorGraphResult<Self> {
        for &s in sigmas.iter() {
            check_sigma(s)?;
        }
        Ok(NoiseModel::Constrained { sigmas })
    }

    /// Every row is a hard constraint.
    pub fn hard(dim: usize) -> Self {
        NoiseModel::Constrained {
            sigmas: DVector::zeros(dim),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            NoiseModel::Unit { dim } | NoiseModel::Isotropic { dim, .. } => *dim,
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => sigmas.len(),
        }
    }

    pub fn sigmas(&self) -> DVector<f64> {
        match self {
            NoiseModel::Unit { dim } => DVector::from_element(*dim, 1.0),
            NoiseModel::Isotropic { dim, sigma } => DVector::from_element(*dim, *sigma),
            NoiseModel::Diagonal { sigmas } | NoiseModel::Constrained { sigmas } => {
                sigmas.clone()
            }
        }
    }

    /// True if at least one row is a hard constraint.
    pub fn is_constrained(&self) -> bool {
        match self {
            NoiseModel::Constrained { sigmas } => sigmas.iter().any(|&s| s == 0.0),
            _ => false,
        }
    }

    pub fn is_hard_row(&self, row: usize) -> bool {
        match self {
            NoiseModel::Constrained { sigmas } => sigmas.get(row).is_some_and(|&s| s == 0.0),
            _ => false,
        }
    }

    /// Divisor applied to a row when whitening; 1 for hard rows.
    fn row_scale(&self, row: usize) -> f64 {
        match self {
            NoiseModel::Unit { .. } => 1.0,
            NoiseModel::Isotropic { sigma, .. } => *sigma,
            NoiseModel::Diagonal { sigmas } => sigmas[row],
            NoiseModel::Constrained { sigmas } => {
                if sigmas[row] == 0.0 {
                    1.0
                } else {
                    sigmas[row]
                }
            }
        }
    }

    /// Scale a residual to unit covariance. Hard rows pass through unchanged.
    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(residual.len(), |i, _| residual[i] / self.row_scale(i))
    }

    /// Row-scale a Jacobian the same way [`NoiseModel::whiten`] scales a residual.
    pub fn whiten_matrix(&self, matrix: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |i, j| {
            matrix[(i, j)] / self.row_scale(i)
        })
    }

    /// Squared Mahalanobis distance; hard rows add their raw squared value.
    pub fn distance(&self, residual: &DVector<f64>) -> f64 {
        self.whiten(residual).norm_squared()
    }

    /// Model describing an already whitened factor: unit sigmas on soft rows,
    /// zero on hard rows.
    pub fn whitened_model(&self) -> NoiseModel {
        match self {
            NoiseModel::Constrained { sigmas } if self.is_constrained() => {
                NoiseModel::Constrained {
                    sigmas: sigmas.map(|s| if s == 0.0 { 0.0 } else { 1.0 }),
                }
            }
            _ => NoiseModel::Unit { dim: self.dim() },
        }
    }
}

impl fmt::Display for NoiseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseModel::Unit { dim } => write!(f, "Unit({dim})"),
            NoiseModel::Isotropic { dim, sigma } => write!(f, "Isotropic({dim}, sigma = {sigma})"),
            NoiseModel::Diagonal { sigmas } => write!(f, "Diagonal({:?})", sigmas.as_slice()),
            NoiseModel::Constrained { sigmas } => {
                write!(f, "Constrained({:?})", sigmas.as_slice())
            }
        }
    }
}
