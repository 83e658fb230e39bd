//! Linear layer of the engine.
//!
//! This module holds everything that operates on linearized systems:
//! - Noise models and whitening
//! - Jacobian factors and the Gaussian factor graph
//! - Sequential elimination into a Gaussian Bayes net
//! - A sparse Cholesky backend using faer
//!
//! Variables are addressed by slot, their position in an [`crate::core::Ordering`].

use crate::error::FactorGraphResult;

pub mod cholesky;
pub mod elimination;
pub mod gaussian_graph;
pub mod jacobian_factor;
pub mod noise_model;
pub mod vector_values;

pub use cholesky::SparseCholeskySolver;
pub use elimination::{
    ArenaEntry, EliminationArena, GaussianBayesNet, GaussianConditional, eliminate_sequential,
};
pub use gaussian_graph::{DenseSystem, GaussianFactorGraph};
pub use jacobian_factor::JacobianFactor;
pub use noise_model::NoiseModel;
pub use vector_values::VectorValues;

/// Solves a linear factor graph for the slot increments.
pub trait LinearSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Least-squares solution over slots with sizes `dims`.
    fn solve(
        &mut self,
        graph: &GaussianFactorGraph,
        dims: &[usize],
    ) -> FactorGraphResult<VectorValues>;
}

/// Elimination followed by back-substitution. Handles hard constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialEliminationSolver;

impl LinearSolver for SequentialEliminationSolver {
    fn name(&self) -> &'static str {
        "sequential elimination"
    }

    fn solve(
        &mut self,
        graph: &GaussianFactorGraph,
        dims: &[usize],
    ) -> FactorGraphResult<VectorValues> {
        graph.optimize(dims)
    }
}

/// Linear solver selection for the nonlinear optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinearSolverType {
    #[default]
    SequentialElimination,
    SparseCholesky,
}

impl LinearSolverType {
    pub fn create(self) -> Box<dyn LinearSolver> {
        match self {
            LinearSolverType::SequentialElimination => Box::new(SequentialEliminationSolver),
            LinearSolverType::SparseCholesky => Box::new(SparseCholeskySolver::new()),
        }
    }
}

impl std::fmt::Display for LinearSolverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinearSolverType::SequentialElimination => write!(f, "SequentialElimination"),
            LinearSolverType::SparseCholesky => write!(f, "SparseCholesky"),
        }
    }
}
