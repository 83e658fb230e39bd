//! Linear (Jacobian) factors: `A·Δx ≈ b` over ordering slots.

use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::noise_model::NoiseModel;
use crate::linalg::vector_values::VectorValues;
use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Affine relation `Σ A_k Δx_{slot_k} - b` with a noise model.
///
/// Factors produced by linearization are already whitened: their soft rows
/// carry unit sigma and their hard rows sigma zero.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianFactor {
    slots: Vec<usize>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
    model: NoiseModel,
}

impl JacobianFactor {
    /// Build a factor from `(slot, block)` terms. Every block must have as many
    /// rows as `rhs`, the model must match that size and slots must be distinct.
    pub fn new(
        terms: Vec<(usize, DMatrix<f64>)>,
        rhs: DVector<f64>,
        model: NoiseModel,
    ) -> FactorGraphResult<Self> {
        let rows = rhs.len();
        if model.dim() != rows {
            return Err(FactorGraphError::DimensionMismatch {
                context: "JacobianFactor noise model",
                expected: rows,
                actual: model.dim(),
            });
        }
        let mut slots = Vec::with_capacity(terms.len());
        let mut blocks = Vec::with_capacity(terms.len());
        for (slot, block) in terms {
            if block.nrows() != rows {
                return Err(FactorGraphError::DimensionMismatch {
                    context: "JacobianFactor block rows",
                    expected: rows,
                    actual: block.nrows(),
                });
            }
            if slots.contains(&slot) {
                return Err(FactorGraphError::InvalidInput(format!(
                    "slot {slot} appears twice in one linear factor"
                )));
            }
            slots.push(slot);
            blocks.push(block);
        }
        Ok(JacobianFactor {
            slots,
            blocks,
            rhs,
            model,
        })
    }

    /// Slots in the order the factor references them.
    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    pub fn terms(&self) -> impl Iterator<Item = (usize, &DMatrix<f64>)> + '_ {
        self.slots.iter().copied().zip(self.blocks.iter())
    }

    pub fn block_for(&self, slot: usize) -> Option<&DMatrix<f64>> {
        self.slots
            .iter()
            .position(|&s| s == slot)
            .map(|i| &self.blocks[i])
    }

    pub fn involves(&self, slot: usize) -> bool {
        self.slots.contains(&slot)
    }

    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn model(&self) -> &NoiseModel {
        &self.model
    }

    pub fn is_constrained(&self) -> bool {
        self.model.is_constrained()
    }

    /// `A·x - b` before whitening.
    pub fn unwhitened_error(&self, x: &VectorValues) -> FactorGraphResult<DVector<f64>> {
        let mut e = -self.rhs.clone();
        for (slot, block) in self.terms() {
            let xs = x.get(slot).ok_or(FactorGraphError::DimensionMismatch {
                context: "JacobianFactor slot count",
                expected: slot + 1,
                actual: x.len(),
            })?;
            if xs.len() != block.ncols() {
                return Err(FactorGraphError::DimensionMismatch {
                    context: "JacobianFactor::unwhitened_error",
                    expected: block.ncols(),
                    actual: xs.len(),
                });
            }
            e += block * DVector::from_column_slice(xs);
        }
        Ok(e)
    }

    /// `0.5 · ‖whiten(A·x - b)‖²`
    pub fn error(&self, x: &VectorValues) -> FactorGraphResult<f64> {
        Ok(0.5 * self.model.distance(&self.unwhitened_error(x)?))
    }

    /// Equivalent factor whose soft rows have unit sigma.
    pub fn whitened(&self) -> JacobianFactor {
        JacobianFactor {
            slots: self.slots.clone(),
            blocks: self
                .blocks
                .iter()
                .map(|b| self.model.whiten_matrix(b))
                .collect(),
            rhs: self.model.whiten(&self.rhs),
            model: self.model.whitened_model(),
        }
    }
}

impl fmt::Display for JacobianFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "JacobianFactor on slots {:?} ({} rows, {})",
            self.slots,
            self.rows(),
            self.model
        )?;
        for (slot, block) in self.terms() {
            write!(f, "  A[{slot}] = {block}")?;
        }
        write!(f, "  b = {}", self.rhs)
    }
}
