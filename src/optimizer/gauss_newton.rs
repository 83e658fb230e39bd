//! Gauss-Newton step.
//!
//! Solves the undamped linearized system and accepts the result even when
//! the error grows; convergence policy is left to the caller.

use crate::error::FactorGraphResult;
use crate::linalg::{GaussianFactorGraph, LinearSolver};
use crate::optimizer::NonlinearOptimizer;
use tracing::{debug, warn};

pub(crate) fn step(
    state: &NonlinearOptimizer,
    linear: &GaussianFactorGraph,
    solver: &mut dyn LinearSolver,
) -> FactorGraphResult<NonlinearOptimizer> {
    let delta = solver.solve(linear, state.dims())?;
    let values = state.values().retract(&delta, state.ordering())?;
    let error = state.graph().error(&values)?;

    debug!(
        "Gauss-Newton iteration {}: error {:.6e} -> {:.6e}, |dx| = {:.3e} ({})",
        state.iteration() + 1,
        state.error(),
        error,
        delta.norm(),
        solver.name()
    );
    if error > state.error() {
        warn!(
            "Gauss-Newton step increased the error from {:.6e} to {:.6e}",
            state.error(),
            error
        );
    }

    Ok(state.accept(values, error, state.lambda()))
}
