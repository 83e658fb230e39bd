//! Sequential variable elimination and back-substitution.
//!
//! Elimination walks the ordering slot by slot. For slot `j` every live factor
//! touching `j` is stacked into one dense block `[A_j | A_sep | b]`, the frontal
//! columns are orthogonalized away with weighted Gram-Schmidt, and the result is
//! split into a [`GaussianConditional`] on `j` and a new factor on the
//! separator. Consumed factors stay in the [`EliminationArena`] marked with the
//! slot that retired them, so a finished arena can be inspected.
//!
//! Hard constraint rows have infinite precision: when one has a usable entry
//! in the current column it is used as the pivot and is consumed exactly.

use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::gaussian_graph::GaussianFactorGraph;
use crate::linalg::jacobian_factor::JacobianFactor;
use crate::linalg::noise_model::NoiseModel;
use crate::linalg::vector_values::VectorValues;
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Smallest hard-row entry that may serve as a pivot.
const HARD_PIVOT_TOLERANCE: f64 = 1e-9;

/// Relative precision below which a frontal column counts as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Conditional density of one variable given its separator, in the form
/// `R·x + Σ S_p·x_p = d` with `R` unit upper triangular.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianConditional {
    slot: usize,
    r: DMatrix<f64>,
    parents: Vec<(usize, DMatrix<f64>)>,
    d: DVector<f64>,
    sigmas: DVector<f64>,
}

impl GaussianConditional {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn dim(&self) -> usize {
        self.d.len()
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn parents(&self) -> &[(usize, DMatrix<f64>)] {
        &self.parents
    }

    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// Standard deviation of each conditional row; zero where a hard row was
    /// the pivot.
    pub fn sigmas(&self) -> &DVector<f64> {
        &self.sigmas
    }

    /// Solve for this variable given already-solved parents.
    pub fn solve(&self, solution: &VectorValues) -> FactorGraphResult<DVector<f64>> {
        let mut rhs = self.d.clone();
        for (parent, s) in &self.parents {
            let xp = solution
                .get(*parent)
                .ok_or(FactorGraphError::DimensionMismatch {
                    context: "GaussianConditional parent slot",
                    expected: parent + 1,
                    actual: solution.len(),
                })?;
            rhs -= s * DVector::from_column_slice(xp);
        }
        let x = self
            .r
            .solve_upper_triangular(&rhs)
            .ok_or_else(|| FactorGraphError::UnderconstrainedSystem {
                variable: self.slot,
                reason: "singular conditional".to_string(),
            })?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FactorGraphError::UnderconstrainedSystem {
                variable: self.slot,
                reason: "non-finite solution".to_string(),
            });
        }
        Ok(x)
    }
}

/// Chain of conditionals produced by eliminating every slot in order.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianBayesNet {
    conditionals: Vec<GaussianConditional>,
    dims: Vec<usize>,
}

impl GaussianBayesNet {
    pub fn conditionals(&self) -> &[GaussianConditional] {
        &self.conditionals
    }

    pub fn len(&self) -> usize {
        self.conditionals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditionals.is_empty()
    }

    /// Solve all conditionals in reverse elimination order.
    pub fn back_substitute(&self) -> FactorGraphResult<VectorValues> {
        let mut solution = VectorValues::zeros(&self.dims);
        for conditional in self.conditionals.iter().rev() {
            let x = conditional.solve(&solution)?;
            solution.set(conditional.slot, x.as_slice())?;
        }
        Ok(solution)
    }
}

/// One factor in the arena plus its elimination bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaEntry {
    pub factor: JacobianFactor,
    /// Slot whose elimination consumed this factor
    pub retired_at: Option<usize>,
    /// Slot whose elimination produced this factor; `None` for input factors
    pub created_by: Option<usize>,
}

/// Working set of linear factors during elimination.
#[derive(Debug, Clone)]
pub struct EliminationArena {
    entries: Vec<ArenaEntry>,
    dims: Vec<usize>,
    next_slot: usize,
}

impl EliminationArena {
    /// Load a graph. Every factor is whitened and checked against `dims`.
    pub fn new(graph: &GaussianFactorGraph, dims: &[usize]) -> FactorGraphResult<Self> {
        let mut entries = Vec::with_capacity(graph.len());
        for factor in graph.iter() {
            for (slot, block) in factor.terms() {
                let expected = *dims.get(slot).ok_or_else(|| {
                    FactorGraphError::InvalidInput(format!(
                        "linear factor references slot {slot} but only {} slots exist",
                        dims.len()
                    ))
                })?;
                if block.ncols() != expected {
                    return Err(FactorGraphError::DimensionMismatch {
                        context: "linear factor block columns",
                        expected,
                        actual: block.ncols(),
                    });
                }
            }
            entries.push(ArenaEntry {
                factor: factor.whitened(),
                retired_at: None,
                created_by: None,
            });
        }
        Ok(EliminationArena {
            entries,
            dims: dims.to_vec(),
            next_slot: 0,
        })
    }

    pub fn entries(&self) -> &[ArenaEntry] {
        &self.entries
    }

    /// Factors not yet consumed.
    pub fn active(&self) -> impl Iterator<Item = &JacobianFactor> + '_ {
        self.entries
            .iter()
            .filter(|e| e.retired_at.is_none())
            .map(|e| &e.factor)
    }

    /// Number of slots eliminated so far.
    pub fn eliminated(&self) -> usize {
        self.next_slot
    }

    /// Eliminate every remaining slot.
    pub fn eliminate_all(&mut self) -> FactorGraphResult<GaussianBayesNet> {
        let mut conditionals = Vec::with_capacity(self.dims.len() - self.next_slot);
        while self.next_slot < self.dims.len() {
            conditionals.push(self.eliminate_next()?);
        }
        Ok(GaussianBayesNet {
            conditionals,
            dims: self.dims.clone(),
        })
    }

    /// Eliminate the next slot in order and return its conditional.
    pub fn eliminate_next(&mut self) -> FactorGraphResult<GaussianConditional> {
        let slot = self.next_slot;
        if slot >= self.dims.len() {
            return Err(FactorGraphError::InvalidInput(
                "every slot is already eliminated".to_string(),
            ));
        }

        let involved: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.retired_at.is_none() && e.factor.involves(slot))
            .map(|(i, _)| i)
            .collect();
        if involved.is_empty() {
            return Err(FactorGraphError::UnderconstrainedSystem {
                variable: slot,
                reason: "no factor involves this variable".to_string(),
            });
        }

        let separator: Vec<usize> = involved
            .iter()
            .flat_map(|&i| self.entries[i].factor.slots().iter().copied())
            .filter(|&s| s != slot)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let frontal_dim = self.dims[slot];
        let mut offsets = HashMap::with_capacity(separator.len() + 1);
        offsets.insert(slot, 0);
        let mut n_cols = frontal_dim;
        for &s in &separator {
            offsets.insert(s, n_cols);
            n_cols += self.dims[s];
        }
        let rhs_col = n_cols;
        n_cols += 1;

        let n_rows: usize = involved.iter().map(|&i| self.entries[i].factor.rows()).sum();
        let mut stacked = DMatrix::zeros(n_rows, n_cols);
        let mut hard = Vec::with_capacity(n_rows);
        let mut row = 0;
        for &i in &involved {
            let factor = &self.entries[i].factor;
            let rows = factor.rows();
            for (s, block) in factor.terms() {
                stacked
                    .view_mut((row, offsets[&s]), (rows, block.ncols()))
                    .copy_from(block);
            }
            stacked
                .view_mut((row, rhs_col), (rows, 1))
                .copy_from(factor.rhs());
            hard.extend((0..rows).map(|r| factor.model().is_hard_row(r)));
            row += rows;
        }
        for &i in &involved {
            self.entries[i].retired_at = Some(slot);
        }
        self.next_slot += 1;

        if stacked.iter().any(|v| !v.is_finite()) {
            return Err(FactorGraphError::UnderconstrainedSystem {
                variable: slot,
                reason: "non-finite entries in linearized system".to_string(),
            });
        }

        let (conditional_rows, sigmas) =
            weighted_gram_schmidt(&mut stacked, &hard, frontal_dim, slot)?;

        let r = conditional_rows.columns(0, frontal_dim).into_owned();
        let parents = separator
            .iter()
            .map(|&s| {
                (
                    s,
                    conditional_rows
                        .columns(offsets[&s], self.dims[s])
                        .into_owned(),
                )
            })
            .collect();
        let d = conditional_rows.column(rhs_col).into_owned();

        if let Some(factor) = self.separator_factor(&stacked, &hard, frontal_dim, &separator)? {
            self.entries.push(ArenaEntry {
                factor,
                retired_at: None,
                created_by: Some(slot),
            });
        }

        trace!(
            "eliminated slot {} from {} factors ({} rows), separator {:?}",
            slot,
            involved.len(),
            n_rows,
            separator
        );

        Ok(GaussianConditional {
            slot,
            r,
            parents,
            d,
            sigmas,
        })
    }

    /// Turn the rows left after frontal elimination into one factor on the
    /// separator. Soft rows are compressed with a QR factorization; hard rows
    /// are carried over unchanged. Rows with no separator content are dropped.
    fn separator_factor(
        &self,
        stacked: &DMatrix<f64>,
        hard: &[bool],
        frontal_dim: usize,
        separator: &[usize],
    ) -> FactorGraphResult<Option<JacobianFactor>> {
        let sep_cols = stacked.ncols() - frontal_dim - 1;
        if sep_cols == 0 {
            return Ok(None);
        }
        let tail = stacked.columns(frontal_dim, sep_cols + 1);
        let scale = tail.norm().max(1.0);
        let zero_tol = 1e-12 * scale;

        let mut rows: Vec<DVector<f64>> = Vec::new();
        let mut row_hard: Vec<bool> = Vec::new();

        let soft_indices: Vec<usize> = (0..hard.len()).filter(|&i| !hard[i]).collect();
        if !soft_indices.is_empty() {
            let soft = DMatrix::from_fn(soft_indices.len(), sep_cols + 1, |i, j| {
                tail[(soft_indices[i], j)]
            });
            let r = soft.qr().r();
            let keep = soft_indices.len().min(sep_cols);
            for i in 0..keep {
                let row = r.row(i);
                if row.columns(0, sep_cols).norm() > zero_tol {
                    rows.push(row.transpose());
                    row_hard.push(false);
                }
            }
        }

        for (i, _) in hard.iter().enumerate().filter(|(_, h)| **h) {
            let row = tail.row(i);
            if row.columns(0, sep_cols).norm() > zero_tol {
                rows.push(row.transpose());
                row_hard.push(true);
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let m = rows.len();
        let mut terms = Vec::with_capacity(separator.len());
        let mut col = 0;
        for &s in separator {
            let dim = self.dims[s];
            let block = DMatrix::from_fn(m, dim, |i, j| rows[i][col + j]);
            terms.push((s, block));
            col += dim;
        }
        let rhs = DVector::from_fn(m, |i, _| rows[i][sep_cols]);
        let model = if row_hard.iter().any(|&h| h) {
            NoiseModel::constrained(DVector::from_fn(m, |i, _| {
                if row_hard[i] { 0.0 } else { 1.0 }
            }))?
        } else {
            NoiseModel::unit(m)
        };
        JacobianFactor::new(terms, rhs, model).map(Some)
    }
}

/// Orthogonalize the first `frontal_dim` columns of `stacked` in place.
///
/// Returns the conditional rows `[R | S | d]` (one per frontal column) and their
/// sigmas. On return the frontal columns of `stacked` are zero and the remaining
/// rows describe the separator.
fn weighted_gram_schmidt(
    stacked: &mut DMatrix<f64>,
    hard: &[bool],
    frontal_dim: usize,
    slot: usize,
) -> FactorGraphResult<(DMatrix<f64>, DVector<f64>)> {
    let n_rows = stacked.nrows();
    let n_cols = stacked.ncols();
    let initial_norms: Vec<f64> = (0..frontal_dim)
        .map(|c| stacked.column(c).norm_squared())
        .collect();

    let mut conditional_rows = DMatrix::zeros(frontal_dim, n_cols);
    let mut sigmas = DVector::zeros(frontal_dim);

    for c in 0..frontal_dim {
        let column = stacked.column(c).into_owned();

        let hard_pivot = (0..n_rows)
            .filter(|&i| hard[i] && column[i].abs() > HARD_PIVOT_TOLERANCE)
            .max_by(|&a, &b| column[a].abs().total_cmp(&column[b].abs()));

        let (pseudo, precision) = match hard_pivot {
            Some(i) => {
                let mut pseudo = DVector::zeros(n_rows);
                pseudo[i] = 1.0 / column[i];
                (pseudo, f64::INFINITY)
            }
            None => {
                let precision: f64 = (0..n_rows)
                    .filter(|&i| !hard[i])
                    .map(|i| column[i] * column[i])
                    .sum();
                if !(precision > RANK_TOLERANCE * initial_norms[c]) || precision == 0.0 {
                    return Err(FactorGraphError::UnderconstrainedSystem {
                        variable: slot,
                        reason: format!(
                            "rank deficient in tangent direction {c} (precision {precision:.3e})"
                        ),
                    });
                }
                let pseudo = DVector::from_fn(n_rows, |i, _| {
                    if hard[i] { 0.0 } else { column[i] / precision }
                });
                (pseudo, precision)
            }
        };

        let mut r_row = pseudo.transpose() * &*stacked;
        r_row[c] = 1.0;
        conditional_rows.row_mut(c).copy_from(&r_row);
        sigmas[c] = if precision.is_infinite() {
            0.0
        } else {
            1.0 / precision.sqrt()
        };

        *stacked -= &column * &r_row;
        stacked.column_mut(c).fill(0.0);
    }

    Ok((conditional_rows, sigmas))
}

/// Eliminate `graph` along slots `0..dims.len()` and return the Bayes net.
pub fn eliminate_sequential(
    graph: &GaussianFactorGraph,
    dims: &[usize],
) -> FactorGraphResult<GaussianBayesNet> {
    EliminationArena::new(graph, dims)?.eliminate_all()
}
