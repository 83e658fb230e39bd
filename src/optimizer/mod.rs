//! Iterative nonlinear least-squares solvers.
//!
//! - Gauss-Newton: takes every linearized step
//! - Levenberg-Marquardt: damps the normal equations and only keeps steps
//!   that do not increase the error
//!
//! [`NonlinearOptimizer`] is an immutable state: [`NonlinearOptimizer::iterate`]
//! returns a new state and leaves the one it was called on untouched, so a
//! failed or unwanted step is discarded by dropping it. The graph, ordering
//! and configuration are shared between states.

use crate::core::{NonlinearFactorGraph, Ordering, Values};
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::{GaussianFactorGraph, LinearSolverType};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub mod gauss_newton;
pub mod levenberg_marquardt;

/// Type of optimization algorithm to use
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerType {
    /// Levenberg-Marquardt algorithm (adaptive damping, monotone error)
    #[default]
    LevenbergMarquardt,
    /// Gauss-Newton algorithm (undamped, accepts every step)
    GaussNewton,
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// Type of optimizer algorithm to use
    pub optimizer_type: OptimizerType,
    /// Linear solver used for each step
    pub linear_solver_type: LinearSolverType,
    /// Maximum number of iterations run by `optimize`
    pub max_iterations: usize,
    /// Stop when the relative error decrease falls to this value
    pub relative_error_tolerance: f64,
    /// Stop when the absolute error decrease falls to this value
    pub absolute_error_tolerance: f64,
    /// Stop as soon as the error is at or below this value
    pub error_threshold: f64,
    /// Initial Levenberg-Marquardt damping
    pub lambda_initial: f64,
    /// Multiplier applied to lambda on rejection, divisor on acceptance
    pub lambda_factor: f64,
    pub lambda_lower_bound: f64,
    pub lambda_upper_bound: f64,
    /// Damped solves allowed after the first attempt of one iteration
    pub max_lambda_retries: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::default(),
            linear_solver_type: LinearSolverType::default(),
            max_iterations: 100,
            relative_error_tolerance: 1e-5,
            absolute_error_tolerance: 1e-5,
            error_threshold: 0.0,
            lambda_initial: 1e-5,
            lambda_factor: 10.0,
            lambda_lower_bound: 1e-12,
            lambda_upper_bound: 1e10,
            max_lambda_retries: 10,
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimizer_type(mut self, optimizer_type: OptimizerType) -> Self {
        self.optimizer_type = optimizer_type;
        self
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_relative_error_tolerance(mut self, tolerance: f64) -> Self {
        self.relative_error_tolerance = tolerance;
        self
    }

    pub fn with_absolute_error_tolerance(mut self, tolerance: f64) -> Self {
        self.absolute_error_tolerance = tolerance;
        self
    }

    pub fn with_error_threshold(mut self, threshold: f64) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_lambda_initial(mut self, lambda: f64) -> Self {
        self.lambda_initial = lambda;
        self
    }

    pub fn with_lambda_factor(mut self, factor: f64) -> Self {
        self.lambda_factor = factor;
        self
    }

    pub fn with_lambda_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lambda_lower_bound = lower;
        self.lambda_upper_bound = upper;
        self
    }

    pub fn with_max_lambda_retries(mut self, retries: usize) -> Self {
        self.max_lambda_retries = retries;
        self
    }

    /// Reject settings that would make the damping loop meaningless.
    pub fn validate(&self) -> FactorGraphResult<()> {
        let non_negative = [
            ("relative_error_tolerance", self.relative_error_tolerance),
            ("absolute_error_tolerance", self.absolute_error_tolerance),
            ("error_threshold", self.error_threshold),
            ("lambda_initial", self.lambda_initial),
            ("lambda_lower_bound", self.lambda_lower_bound),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(FactorGraphError::InvalidInput(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(self.lambda_factor.is_finite() && self.lambda_factor > 1.0) {
            return Err(FactorGraphError::InvalidInput(format!(
                "lambda_factor must be greater than one, got {}",
                self.lambda_factor
            )));
        }
        if self.lambda_upper_bound.is_nan() || self.lambda_upper_bound < self.lambda_lower_bound {
            return Err(FactorGraphError::InvalidInput(format!(
                "lambda bounds are inverted: [{}, {}]",
                self.lambda_lower_bound, self.lambda_upper_bound
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OptimizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizerConfig {{ optimizer: {}, linear solver: {}, max_iterations: {}, relative_tol: {:e}, absolute_tol: {:e}, error_threshold: {:e}, lambda: {:e} x{} in [{:e}, {:e}], max_lambda_retries: {} }}",
            self.optimizer_type,
            self.linear_solver_type,
            self.max_iterations,
            self.relative_error_tolerance,
            self.absolute_error_tolerance,
            self.error_threshold,
            self.lambda_initial,
            self.lambda_factor,
            self.lambda_lower_bound,
            self.lambda_upper_bound,
            self.max_lambda_retries
        )
    }
}

/// Lifecycle of an optimizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerPhase {
    Initialized,
    Iterating,
    Converged,
    Failed,
}

/// Why `optimize` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Error decrease fell below the tolerances
    Converged,
    /// Error reached the configured threshold
    ErrorThresholdReached,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// An iteration failed; the last accepted state is kept
    Failed(String),
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::ErrorThresholdReached => write!(f, "Error threshold reached"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Convergence test on two consecutive errors.
///
/// Returns true when `new_error` is at or below `error_threshold`, when the
/// error grew, or when the decrease is small in relative or absolute terms.
pub fn check_convergence(
    relative_error_tolerance: f64,
    absolute_error_tolerance: f64,
    error_threshold: f64,
    current_error: f64,
    new_error: f64,
) -> bool {
    if new_error <= error_threshold {
        return true;
    }
    let absolute_decrease = current_error - new_error;
    if absolute_decrease < 0.0 {
        return true;
    }
    let relative_decrease = if current_error > 0.0 {
        absolute_decrease / current_error
    } else {
        0.0
    };
    relative_decrease <= relative_error_tolerance || absolute_decrease <= absolute_error_tolerance
}

/// One immutable snapshot of an optimization.
#[derive(Debug, Clone)]
pub struct NonlinearOptimizer {
    graph: Arc<NonlinearFactorGraph>,
    ordering: Arc<Ordering>,
    dims: Arc<Vec<usize>>,
    config: Arc<OptimizerConfig>,
    values: Arc<Values>,
    error: f64,
    lambda: f64,
    iteration: usize,
    phase: OptimizerPhase,
}

impl NonlinearOptimizer {
    /// Start from `values` with an explicit elimination `ordering`.
    ///
    /// The ordering must cover exactly the graph's keys and every graph key
    /// needs a value.
    pub fn new(
        graph: Arc<NonlinearFactorGraph>,
        values: Values,
        ordering: Ordering,
        config: OptimizerConfig,
    ) -> FactorGraphResult<Self> {
        config.validate()?;
        if !ordering.is_bijection_over(&graph.keys()) {
            return Err(FactorGraphError::OrderingFailed(format!(
                "{ordering} does not cover exactly the {} graph variables",
                graph.keys().len()
            )));
        }
        let dims = ordering.dims(&values)?.dims;
        let error = graph.error(&values)?;
        Ok(Self {
            graph,
            ordering: Arc::new(ordering),
            dims: Arc::new(dims),
            values: Arc::new(values),
            error,
            lambda: config.lambda_initial,
            config: Arc::new(config),
            iteration: 0,
            phase: OptimizerPhase::Initialized,
        })
    }

    /// Like [`NonlinearOptimizer::new`] with a minimum degree ordering.
    pub fn with_min_degree(
        graph: Arc<NonlinearFactorGraph>,
        values: Values,
        config: OptimizerConfig,
    ) -> FactorGraphResult<Self> {
        let ordering = graph.ordering_min_degree(&values)?;
        Self::new(graph, values, ordering, config)
    }

    /// Graph error at the current values.
    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Current values without copying them.
    pub fn shared_values(&self) -> Arc<Values> {
        Arc::clone(&self.values)
    }

    pub fn graph(&self) -> &NonlinearFactorGraph {
        &self.graph
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    /// Tangent dimension of each ordering slot.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Damping that the next Levenberg-Marquardt iteration starts from.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Number of accepted iterations since the initial state.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    /// Linear system at the current values.
    pub fn linearize(&self) -> FactorGraphResult<GaussianFactorGraph> {
        self.graph.linearize(&self.values, &self.ordering)
    }

    /// One linearize-solve-retract step, producing a new state.
    pub fn iterate(&self) -> FactorGraphResult<Self> {
        let linear = self.linearize()?;
        let mut solver = self.config.linear_solver_type.create();
        match self.config.optimizer_type {
            OptimizerType::GaussNewton => gauss_newton::step(self, &linear, solver.as_mut()),
            OptimizerType::LevenbergMarquardt => {
                levenberg_marquardt::step(self, &linear, solver.as_mut())
            }
        }
    }

    /// Iterate until convergence, failure or the iteration bound.
    pub fn optimize(&self) -> OptimizationResult {
        let start = Instant::now();
        let config = &self.config;
        info!(
            "{} on {} factors, {} variables, initial error {:.6e}",
            config.optimizer_type,
            self.graph.len(),
            self.ordering.len(),
            self.error
        );

        let mut state = self.clone();
        let mut failure = None;
        let status = loop {
            if state.error <= config.error_threshold {
                state.phase = OptimizerPhase::Converged;
                break OptimizationStatus::ErrorThresholdReached;
            }
            if state.iteration - self.iteration >= config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }
            match state.iterate() {
                Ok(next) => {
                    let converged = check_convergence(
                        config.relative_error_tolerance,
                        config.absolute_error_tolerance,
                        config.error_threshold,
                        state.error,
                        next.error,
                    );
                    if next.error > state.error {
                        warn!(
                            "error increased from {:.6e} to {:.6e} at iteration {}",
                            state.error, next.error, next.iteration
                        );
                    }
                    state = next;
                    if converged {
                        state.phase = OptimizerPhase::Converged;
                        break if state.error <= config.error_threshold {
                            OptimizationStatus::ErrorThresholdReached
                        } else {
                            OptimizationStatus::Converged
                        };
                    }
                }
                Err(e) => {
                    warn!("iteration {} failed: {}", state.iteration + 1, e);
                    state.phase = OptimizerPhase::Failed;
                    let status = OptimizationStatus::Failed(e.to_string());
                    failure = Some(e);
                    break status;
                }
            }
        };

        let result = OptimizationResult {
            initial_error: self.error,
            final_error: state.error,
            iterations: state.iteration - self.iteration,
            elapsed: start.elapsed(),
            status,
            failure,
            state,
        };
        info!(
            "{} finished: {} after {} iterations, error {:.6e}",
            config.optimizer_type, result.status, result.iterations, result.final_error
        );
        result
    }

    /// State after an accepted step.
    pub(crate) fn accept(&self, values: Values, error: f64, lambda: f64) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            ordering: Arc::clone(&self.ordering),
            dims: Arc::clone(&self.dims),
            config: Arc::clone(&self.config),
            values: Arc::new(values),
            error,
            lambda,
            iteration: self.iteration + 1,
            phase: OptimizerPhase::Iterating,
        }
    }
}

/// Outcome of [`NonlinearOptimizer::optimize`].
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Last accepted state
    pub state: NonlinearOptimizer,
    pub status: OptimizationStatus,
    pub initial_error: f64,
    pub final_error: f64,
    /// Accepted iterations
    pub iterations: usize,
    pub elapsed: Duration,
    /// Error that stopped the run, if any
    pub failure: Option<FactorGraphError>,
}

impl OptimizationResult {
    pub fn values(&self) -> &Values {
        self.state.values()
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, OptimizationStatus::Failed(_))
    }
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} Optimization Summary ===", self.state.config().optimizer_type)?;
        writeln!(f, "Status:            {}", self.status)?;
        writeln!(f, "Initial error:     {:.6e}", self.initial_error)?;
        writeln!(f, "Final error:       {:.6e}", self.final_error)?;
        writeln!(
            f,
            "Error reduction:   {:.6e} ({:.2}%)",
            self.initial_error - self.final_error,
            100.0 * (self.initial_error - self.final_error) / self.initial_error.max(1e-12)
        )?;
        writeln!(f, "Iterations:        {}", self.iterations)?;
        writeln!(f, "Final lambda:      {:.6e}", self.state.lambda())?;
        writeln!(f, "Total time:        {:?}", self.elapsed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CustomFactor, pose_key};
    use crate::linalg::NoiseModel;
    use nalgebra::DVector;

    /// Residual `x² - target` on a scalar.
    fn square_graph(target: f64) -> NonlinearFactorGraph {
        let mut graph = NonlinearFactorGraph::new();
        graph.add(CustomFactor::new(
            vec![pose_key(0)],
            NoiseModel::unit(1),
            move |values, jacobians| {
                let x = values[0].as_vector().ok_or_else(|| {
                    FactorGraphError::InvalidInput("vector expected".to_string())
                })?[0];
                if let Some(h) = jacobians {
                    h[0][(0, 0)] = 2.0 * x;
                }
                Ok(DVector::from_element(1, x * x - target))
            },
        ));
        graph
    }

    fn start(x: f64) -> Values {
        let mut values = Values::new();
        values
            .insert(pose_key(0), DVector::from_element(1, x))
            .unwrap();
        values
    }

    #[test]
    fn test_check_convergence() {
        // threshold reached
        assert!(check_convergence(1e-5, 1e-5, 1.0, 10.0, 0.5));
        // large decrease keeps going
        assert!(!check_convergence(1e-5, 1e-5, 0.0, 10.0, 5.0));
        // tiny relative decrease stops
        assert!(check_convergence(1e-3, 0.0, 0.0, 1000.0, 999.9999));
        // tiny absolute decrease stops
        assert!(check_convergence(0.0, 1e-3, 0.0, 1.0, 0.9999));
        // increase stops
        assert!(check_convergence(1e-5, 1e-5, 0.0, 1.0, 2.0));
        // zero error
        assert!(check_convergence(1e-5, 1e-5, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_config_builders_and_validation() {
        let config = OptimizerConfig::new()
            .with_optimizer_type(OptimizerType::GaussNewton)
            .with_max_iterations(7)
            .with_lambda_bounds(1e-3, 1e3)
            .with_max_lambda_retries(2);
        assert_eq!(config.optimizer_type, OptimizerType::GaussNewton);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.max_lambda_retries, 2);
        assert!(config.validate().is_ok());
        assert!(config.to_string().contains("Gauss-Newton"));

        assert!(
            OptimizerConfig::new()
                .with_lambda_factor(1.0)
                .validate()
                .is_err()
        );
        assert!(
            OptimizerConfig::new()
                .with_lambda_bounds(1.0, 0.1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_iterate_returns_new_state() {
        let graph = Arc::new(square_graph(4.0));
        let values = start(3.0);
        let ordering = values.ordering_arbitrary();
        let config = OptimizerConfig::new().with_optimizer_type(OptimizerType::GaussNewton);
        let optimizer = NonlinearOptimizer::new(graph, values, ordering, config).unwrap();
        assert_eq!(optimizer.phase(), OptimizerPhase::Initialized);
        assert!((optimizer.error() - 12.5).abs() < 1e-12);

        let next = optimizer.iterate().unwrap();
        // Newton step on x² = 4 from 3: 3 - 5/6
        let x = next.values().vector(pose_key(0)).unwrap()[0];
        assert!((x - (3.0 - 5.0 / 6.0)).abs() < 1e-12);
        assert_eq!(next.iteration(), 1);
        assert_eq!(next.phase(), OptimizerPhase::Iterating);

        // the original state is untouched
        assert_eq!(optimizer.values().vector(pose_key(0)).unwrap()[0], 3.0);
        assert_eq!(optimizer.iteration(), 0);
    }

    #[test]
    fn test_optimize_converges_both_types() {
        for optimizer_type in [OptimizerType::GaussNewton, OptimizerType::LevenbergMarquardt] {
            let graph = Arc::new(square_graph(4.0));
            let config = OptimizerConfig::new()
                .with_optimizer_type(optimizer_type)
                .with_relative_error_tolerance(1e-12)
                .with_absolute_error_tolerance(1e-12);
            let optimizer = NonlinearOptimizer::with_min_degree(graph, start(3.0), config).unwrap();
            let result = optimizer.optimize();
            assert!(result.is_success(), "{result}");
            assert_eq!(result.state.phase(), OptimizerPhase::Converged);
            let x = result.values().vector(pose_key(0)).unwrap()[0];
            assert!((x - 2.0).abs() < 1e-5, "{optimizer_type}: x = {x}");
            assert!(result.final_error < 1e-9);
            assert!(result.to_string().contains("Optimization Summary"));
        }
    }

    #[test]
    fn test_max_iterations() {
        let graph = Arc::new(square_graph(4.0));
        let config = OptimizerConfig::new()
            .with_optimizer_type(OptimizerType::GaussNewton)
            .with_max_iterations(1)
            .with_relative_error_tolerance(0.0)
            .with_absolute_error_tolerance(0.0);
        let optimizer = NonlinearOptimizer::with_min_degree(graph, start(3.0), config).unwrap();
        let result = optimizer.optimize();
        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
    }

    #[test]
    fn test_new_rejects_bad_ordering_and_missing_values() {
        let graph = Arc::new(square_graph(4.0));
        let config = OptimizerConfig::default();

        let wrong = Ordering::from_keys([pose_key(1)]).unwrap();
        assert!(matches!(
            NonlinearOptimizer::new(Arc::clone(&graph), start(1.0), wrong, config.clone()),
            Err(FactorGraphError::OrderingFailed(_))
        ));

        let ordering = Ordering::from_keys([pose_key(0)]).unwrap();
        assert_eq!(
            NonlinearOptimizer::new(graph, Values::new(), ordering, config).unwrap_err(),
            FactorGraphError::MissingVariable(pose_key(0))
        );
    }
}
