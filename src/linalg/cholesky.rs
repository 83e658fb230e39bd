//! Sparse Cholesky backend for unconstrained linear graphs.
//!
//! Forms the normal equations `AᵀA·x = Aᵀb` from the whitened factors and
//! solves them with faer's supernodal LLT. Hard constraint rows have no finite
//! weight in that formulation, so graphs containing them are rejected; use
//! sequential elimination for those.

use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::LinearSolver;
use crate::linalg::gaussian_graph::GaussianFactorGraph;
use crate::linalg::vector_values::VectorValues;
use faer::sparse::{SparseColMat, Triplet};
use faer::{
    Mat, Side,
    linalg::solvers::Solve,
    sparse::linalg::solvers::{Llt, SymbolicLlt},
};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Normal-equation solver backed by faer.
///
/// The symbolic factorization is cached and reused while the Hessian keeps
/// exactly the same sparsity pattern.
#[derive(Clone, Default)]
pub struct SparseCholeskySolver {
    symbolic_pattern: Option<(HessianPattern, SymbolicLlt<usize>)>,
}

/// Size and sorted `(row, col)` entries of an assembled Hessian.
#[derive(Clone, Debug, PartialEq, Eq)]
struct HessianPattern {
    n: usize,
    entries: Vec<(usize, usize)>,
}

impl SparseCholeskySolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for SparseCholeskySolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseCholeskySolver")
            .field(
                "cached_nnz",
                &self.symbolic_pattern.as_ref().map(|(p, _)| p.entries.len()),
            )
            .finish()
    }
}

impl LinearSolver for SparseCholeskySolver {
    fn name(&self) -> &'static str {
        "sparse Cholesky"
    }

    fn solve(
        &mut self,
        graph: &GaussianFactorGraph,
        dims: &[usize],
    ) -> FactorGraphResult<VectorValues> {
        if graph.has_constraints() {
            return Err(FactorGraphError::UnsupportedNoiseModel(
                "sparse Cholesky cannot represent hard constraint rows".to_string(),
            ));
        }

        let mut offsets = Vec::with_capacity(dims.len());
        let mut n = 0;
        for &d in dims {
            offsets.push(n);
            n += d;
        }

        let mut hessian: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut gradient = vec![0.0; n];

        for factor in graph.iter() {
            let whitened = factor.whitened();
            let terms: Vec<_> = whitened.terms().collect();
            for &(slot, block) in &terms {
                let row_offset = *offsets.get(slot).ok_or_else(|| {
                    FactorGraphError::InvalidInput(format!(
                        "linear factor references slot {slot} but only {} slots exist",
                        dims.len()
                    ))
                })?;
                if block.ncols() != dims[slot] {
                    return Err(FactorGraphError::DimensionMismatch {
                        context: "SparseCholeskySolver block columns",
                        expected: dims[slot],
                        actual: block.ncols(),
                    });
                }
                let g = block.transpose() * whitened.rhs();
                for (i, v) in g.iter().enumerate() {
                    gradient[row_offset + i] += v;
                }
                for &(other, other_block) in &terms {
                    let col_offset = offsets[other];
                    let h = block.transpose() * other_block;
                    for i in 0..h.nrows() {
                        for j in 0..h.ncols() {
                            *hessian.entry((row_offset + i, col_offset + j)).or_insert(0.0) +=
                                h[(i, j)];
                        }
                    }
                }
            }
        }

        for (slot, &d) in dims.iter().enumerate() {
            if d > 0 && !graph.iter().any(|f| f.involves(slot)) {
                return Err(FactorGraphError::UnderconstrainedSystem {
                    variable: slot,
                    reason: "no factor involves this variable".to_string(),
                });
            }
        }

        let triplets: Vec<Triplet<usize, usize, f64>> = hessian
            .iter()
            .map(|(&(r, c), &v)| Triplet::new(r, c, v))
            .collect();
        let h = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| FactorGraphError::LinearSolver(format!("building Hessian: {e:?}")))?;

        let pattern = HessianPattern {
            n,
            entries: hessian.keys().copied().collect(),
        };
        let symbolic = match &self.symbolic_pattern {
            Some((cached, sym)) if *cached == pattern => sym.clone(),
            _ => {
                debug!(
                    "sparse Cholesky: symbolic analysis for {} unknowns, {} non-zeros",
                    n,
                    pattern.entries.len()
                );
                let sym = SymbolicLlt::try_new(h.symbolic(), Side::Lower).map_err(|e| {
                    FactorGraphError::LinearSolver(format!("symbolic Cholesky failed: {e:?}"))
                })?;
                self.symbolic_pattern = Some((pattern, sym.clone()));
                sym
            }
        };

        let llt = Llt::try_new_with_symbolic(symbolic, h.as_ref(), Side::Lower).map_err(|e| {
            debug!("sparse Cholesky factorization failed: {:?}", e);
            FactorGraphError::UnderconstrainedSystem {
                variable: 0,
                reason: format!("normal equations are not positive definite: {e:?}"),
            }
        })?;

        let rhs = Mat::<f64>::from_fn(n, 1, |i, _| gradient[i]);
        let dx = llt.solve(&rhs);
        let solution = DVector::from_fn(n, |i, _| dx[(i, 0)]);
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(FactorGraphError::UnderconstrainedSystem {
                variable: 0,
                reason: "non-finite solution from sparse Cholesky".to_string(),
            });
        }
        VectorValues::from_vector(dims, solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::jacobian_factor::JacobianFactor;
    use crate::linalg::noise_model::NoiseModel;
    use nalgebra::DMatrix;

    fn factor(terms: Vec<(usize, DMatrix<f64>)>, rhs: Vec<f64>, sigma: f64) -> JacobianFactor {
        let m = rhs.len();
        JacobianFactor::new(
            terms,
            DVector::from_vec(rhs),
            NoiseModel::isotropic(m, sigma).unwrap(),
        )
        .unwrap()
    }

    fn sample_graph() -> GaussianFactorGraph {
        GaussianFactorGraph::from_factors(vec![
            factor(vec![(0, DMatrix::identity(2, 2))], vec![1.0, 2.0], 0.5),
            factor(
                vec![
                    (0, -DMatrix::identity(2, 2)),
                    (1, DMatrix::from_row_slice(2, 1, &[1.0, 1.0])),
                ],
                vec![0.5, -0.5],
                1.0,
            ),
            factor(vec![(1, DMatrix::from_element(1, 1, 2.0))], vec![3.0], 2.0),
        ])
    }

    #[test]
    fn test_cholesky_matches_elimination() {
        let graph = sample_graph();
        let dims = [2, 1];
        let mut solver = SparseCholeskySolver::new();
        let sparse = solver.solve(&graph, &dims).unwrap();
        let eliminated = graph.optimize(&dims).unwrap();
        assert!((sparse.as_vector() - eliminated.as_vector()).amax() < 1e-10);

        // second solve reuses the symbolic pattern
        let again = solver.solve(&graph, &dims).unwrap();
        assert!((again.as_vector() - sparse.as_vector()).amax() < 1e-14);
    }

    #[test]
    fn test_cholesky_rejects_constraints() {
        let mut graph = sample_graph();
        graph.push(
            JacobianFactor::new(
                vec![(1, DMatrix::from_element(1, 1, 1.0))],
                DVector::from_vec(vec![0.0]),
                NoiseModel::hard(1),
            )
            .unwrap(),
        );
        let result = SparseCholeskySolver::new().solve(&graph, &[2, 1]);
        assert!(matches!(
            result,
            Err(FactorGraphError::UnsupportedNoiseModel(_))
        ));
    }

    #[test]
    fn test_cholesky_unconstrained_slot() {
        let graph = GaussianFactorGraph::from_factors(vec![factor(
            vec![(0, DMatrix::identity(1, 1))],
            vec![1.0],
            1.0,
        )]);
        let result = SparseCholeskySolver::new().solve(&graph, &[1, 2]);
        assert!(result.unwrap_err().is_underconstrained());
    }

    #[test]
    fn test_equal_nnz_patterns_are_not_confused() {
        let unary = |slot: usize, value: f64| {
            factor(vec![(slot, DMatrix::identity(1, 1))], vec![value], 1.0)
        };
        let binary = |a: usize, b: usize| {
            factor(
                vec![
                    (a, DMatrix::from_element(1, 1, -1.0)),
                    (b, DMatrix::from_element(1, 1, 1.0)),
                ],
                vec![2.0],
                0.5,
            )
        };
        // both Hessians have three diagonal and two off-diagonal entries
        let first = GaussianFactorGraph::from_factors(vec![
            unary(0, 1.0),
            unary(1, 2.0),
            unary(2, 3.0),
            binary(0, 1),
        ]);
        let second = GaussianFactorGraph::from_factors(vec![
            unary(0, 1.0),
            unary(1, 2.0),
            unary(2, 3.0),
            binary(1, 2),
        ]);

        let dims = [1, 1, 1];
        let mut solver = SparseCholeskySolver::new();
        for graph in [&first, &second, &first] {
            let sparse = solver.solve(graph, &dims).unwrap();
            let eliminated = graph.optimize(&dims).unwrap();
            assert!((sparse.as_vector() - eliminated.as_vector()).amax() < 1e-10);
        }
    }
}
