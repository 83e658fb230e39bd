//! Collections of linear factors over one ordering.

use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::elimination::{EliminationArena, GaussianBayesNet};
use crate::linalg::jacobian_factor::JacobianFactor;
use crate::linalg::noise_model::NoiseModel;
use crate::linalg::vector_values::VectorValues;
use nalgebra::{DMatrix, DVector};

/// Linearized system, one [`JacobianFactor`] per nonlinear factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianFactorGraph {
    factors: Vec<JacobianFactor>,
}

/// Whitened dense form `A·x ≈ b` of a linear graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseSystem {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
    /// True for rows that are hard constraints
    pub hard_rows: Vec<bool>,
}

impl GaussianFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_factors(factors: Vec<JacobianFactor>) -> Self {
        GaussianFactorGraph { factors }
    }

    pub fn push(&mut self, factor: JacobianFactor) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JacobianFactor> + '_ {
        self.factors.iter()
    }

    pub fn factors(&self) -> &[JacobianFactor] {
        &self.factors
    }

    pub fn has_constraints(&self) -> bool {
        self.factors.iter().any(|f| f.is_constrained())
    }

    /// Total linear error `Σ 0.5·‖whiten(A·x - b)‖²`.
    pub fn error(&self, x: &VectorValues) -> FactorGraphResult<f64> {
        self.factors.iter().map(|f| f.error(x)).sum()
    }

    /// Copy of the graph with a `sqrt(λ)·I` prior on every slot, which adds
    /// `λ·I` to the normal equations.
    pub fn damped(&self, lambda: f64, dims: &[usize]) -> FactorGraphResult<GaussianFactorGraph> {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(FactorGraphError::InvalidInput(format!(
                "damping must be finite and non-negative, got {lambda}"
            )));
        }
        let sqrt_lambda = lambda.sqrt();
        let mut factors = self.factors.clone();
        factors.reserve(dims.len());
        for (slot, &dim) in dims.iter().enumerate() {
            factors.push(JacobianFactor::new(
                vec![(slot, DMatrix::identity(dim, dim) * sqrt_lambda)],
                DVector::zeros(dim),
                NoiseModel::unit(dim),
            )?);
        }
        Ok(GaussianFactorGraph { factors })
    }

    /// Eliminate along slots `0..dims.len()`.
    pub fn eliminate(&self, dims: &[usize]) -> FactorGraphResult<GaussianBayesNet> {
        EliminationArena::new(self, dims)?.eliminate_all()
    }

    /// Solve the linear least-squares problem by elimination and
    /// back-substitution.
    pub fn optimize(&self, dims: &[usize]) -> FactorGraphResult<VectorValues> {
        self.eliminate(dims)?.back_substitute()
    }

    /// Whitened dense matrix form, columns stacked in slot order.
    pub fn to_dense(&self, dims: &[usize]) -> FactorGraphResult<DenseSystem> {
        let mut offsets = Vec::with_capacity(dims.len());
        let mut n_cols = 0;
        for &d in dims {
            offsets.push(n_cols);
            n_cols += d;
        }
        let n_rows: usize = self.factors.iter().map(|f| f.rows()).sum();

        let mut a = DMatrix::zeros(n_rows, n_cols);
        let mut b = DVector::zeros(n_rows);
        let mut hard_rows = Vec::with_capacity(n_rows);
        let mut row = 0;
        for factor in &self.factors {
            let whitened = factor.whitened();
            let rows = whitened.rows();
            for (slot, block) in whitened.terms() {
                let offset = *offsets.get(slot).ok_or_else(|| {
                    FactorGraphError::InvalidInput(format!(
                        "linear factor references slot {slot} but only {} slots exist",
                        dims.len()
                    ))
                })?;
                if block.ncols() != dims[slot] {
                    return Err(FactorGraphError::DimensionMismatch {
                        context: "GaussianFactorGraph::to_dense",
                        expected: dims[slot],
                        actual: block.ncols(),
                    });
                }
                a.view_mut((row, offset), (rows, block.ncols()))
                    .copy_from(block);
            }
            b.rows_mut(row, rows).copy_from(whitened.rhs());
            hard_rows.extend((0..rows).map(|r| whitened.model().is_hard_row(r)));
            row += rows;
        }
        Ok(DenseSystem { a, b, hard_rows })
    }
}

impl FromIterator<JacobianFactor> for GaussianFactorGraph {
    fn from_iter<I: IntoIterator<Item = JacobianFactor>>(iter: I) -> Self {
        GaussianFactorGraph {
            factors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(slot: usize, dim: usize, target: f64) -> JacobianFactor {
        JacobianFactor::new(
            vec![(slot, DMatrix::identity(dim, dim))],
            DVector::from_element(dim, target),
            NoiseModel::unit(dim),
        )
        .unwrap()
    }

    #[test]
    fn test_graph_error() {
        let graph: GaussianFactorGraph = vec![prior(0, 2, 1.0), prior(1, 1, 2.0)]
            .into_iter()
            .collect();
        let x = VectorValues::zeros(&[2, 1]);
        // 0.5 * (1 + 1) + 0.5 * 4
        assert!((graph.error(&x).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_damped_shrinks_step() {
        let graph = GaussianFactorGraph::from_factors(vec![prior(0, 1, 2.0)]);
        let plain = graph.optimize(&[1]).unwrap();
        assert!((plain.as_vector()[0] - 2.0).abs() < 1e-12);

        let damped = graph.damped(1.0, &[1]).unwrap();
        assert_eq!(damped.len(), 2);
        // (1 + λ) x = 2
        let step = damped.optimize(&[1]).unwrap();
        assert!((step.as_vector()[0] - 1.0).abs() < 1e-12);

        assert!(graph.damped(-1.0, &[1]).is_err());
    }

    #[test]
    fn test_to_dense_layout() {
        let graph = GaussianFactorGraph::from_factors(vec![prior(1, 2, 3.0), prior(0, 1, 1.0)]);
        let dense = graph.to_dense(&[1, 2]).unwrap();
        assert_eq!(dense.a.shape(), (3, 3));
        assert_eq!(dense.a[(0, 1)], 1.0);
        assert_eq!(dense.a[(1, 2)], 1.0);
        assert_eq!(dense.a[(2, 0)], 1.0);
        assert_eq!(dense.b, DVector::from_vec(vec![3.0, 3.0, 1.0]));
        assert_eq!(dense.hard_rows, vec![false; 3]);
        assert!(!graph.has_constraints());
    }

    #[test]
    fn test_to_dense_rejects_bad_slot() {
        let graph = GaussianFactorGraph::from_factors(vec![prior(3, 1, 1.0)]);
        assert!(graph.to_dense(&[1]).is_err());
        assert!(graph.optimize(&[1]).is_err());
    }
}
