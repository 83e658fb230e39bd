//! Levenberg-Marquardt step.
//!
//! The linearization is computed once per iteration. Each attempt adds
//! `sqrt(λ)·I` priors to it, solves, retracts and evaluates the trial error:
//! - error not larger than the current one, up to rounding: accept, divide λ
//!   by the factor
//! - otherwise (or on a singular or cheirality failure): multiply λ and retry
//!
//! After `max_lambda_retries` retries, or once λ passes its upper bound, the
//! step fails with `MaxRetriesExceeded` and the caller keeps its last state.

use crate::core::Values;
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::{GaussianFactorGraph, LinearSolver};
use crate::optimizer::NonlinearOptimizer;
use tracing::{debug, warn};

pub(crate) fn step(
    state: &NonlinearOptimizer,
    linear: &GaussianFactorGraph,
    solver: &mut dyn LinearSolver,
) -> FactorGraphResult<NonlinearOptimizer> {
    let config = state.config();
    let mut lambda = state
        .lambda()
        .clamp(config.lambda_lower_bound, config.lambda_upper_bound);
    let mut attempts = 0;

    loop {
        match try_step(state, linear, solver, lambda) {
            Ok((values, error)) if no_worse(error, state.error()) => {
                debug!(
                    "Levenberg-Marquardt iteration {}: accepted, error {:.6e} -> {:.6e}, lambda {:.3e}",
                    state.iteration() + 1,
                    state.error(),
                    error,
                    lambda
                );
                let next_lambda = (lambda / config.lambda_factor).max(config.lambda_lower_bound);
                return Ok(state.accept(values, error, next_lambda));
            }
            Ok((_, error)) => {
                debug!(
                    "Levenberg-Marquardt iteration {}: rejected, error {:.6e} > {:.6e}, lambda {:.3e}",
                    state.iteration() + 1,
                    error,
                    state.error(),
                    lambda
                );
            }
            Err(e) if is_recoverable(&e) => {
                debug!(
                    "Levenberg-Marquardt iteration {}: damped solve failed at lambda {:.3e}: {}",
                    state.iteration() + 1,
                    lambda,
                    e
                );
            }
            Err(e) => return Err(e),
        }

        attempts += 1;
        if attempts > config.max_lambda_retries {
            return Err(exhausted(attempts - 1, lambda));
        }
        lambda *= config.lambda_factor;
        if lambda > config.lambda_upper_bound {
            return Err(exhausted(attempts - 1, lambda));
        }
    }
}

/// Trial errors within rounding of the current one count as no worse, so an
/// exact optimum (error around 1e-31) can still take its null step.
fn no_worse(trial: f64, current: f64) -> bool {
    trial <= current + f64::EPSILON * current.max(1.0)
}

fn try_step(
    state: &NonlinearOptimizer,
    linear: &GaussianFactorGraph,
    solver: &mut dyn LinearSolver,
    lambda: f64,
) -> FactorGraphResult<(Values, f64)> {
    let damped = linear.damped(lambda, state.dims())?;
    let delta = solver.solve(&damped, state.dims())?;
    let values = state.values().retract(&delta, state.ordering())?;
    let error = state.graph().error(&values)?;
    Ok((values, error))
}

/// Failures that a larger damping may cure.
fn is_recoverable(error: &FactorGraphError) -> bool {
    error.is_underconstrained() || matches!(error, FactorGraphError::Cheirality { .. })
}

fn exhausted(retries: usize, lambda: f64) -> FactorGraphError {
    warn!(
        "Levenberg-Marquardt gave up after {} retries at lambda {:.3e}",
        retries, lambda
    );
    FactorGraphError::MaxRetriesExceeded { retries, lambda }
}
