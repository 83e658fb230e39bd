//! Nonlinear factor graph optimization on manifolds.
//!
//! A problem is a [`NonlinearFactorGraph`] of constraints over keyed variables
//! plus an initial estimate in a [`Values`] container. The optimizer
//! linearizes the graph around the estimate, eliminates the resulting sparse
//! linear system along an [`Ordering`], retracts the estimate by the solution
//! and repeats.
//!
//! ```no_run
//! use std::sync::Arc;
//! use factorgraph::{
//!     NonlinearFactorGraph, NonlinearOptimizer, OptimizerConfig, Values, pose_key,
//!     factors::PriorFactor, linalg::NoiseModel,
//! };
//! use nalgebra::Vector3;
//!
//! # fn main() -> factorgraph::FactorGraphResult<()> {
//! let mut graph = NonlinearFactorGraph::new();
//! graph.add(PriorFactor::new(
//!     pose_key(0),
//!     Vector3::new(1.0, 2.0, 3.0),
//!     NoiseModel::isotropic(3, 0.1)?,
//! )?);
//!
//! let mut initial = Values::new();
//! initial.insert(pose_key(0), Vector3::zeros())?;
//!
//! let optimizer =
//!     NonlinearOptimizer::with_min_degree(Arc::new(graph), initial, OptimizerConfig::default())?;
//! let result = optimizer.optimize();
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;

pub use crate::core::{
    CustomFactor, Key, NonlinearFactor, NonlinearFactorGraph, Ordering, Value, Values,
    landmark_key, pose_key,
};
pub use error::{FactorGraphError, FactorGraphResult};
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{
    NonlinearOptimizer, OptimizationResult, OptimizationStatus, OptimizerConfig, OptimizerPhase,
    OptimizerType, check_convergence,
};
