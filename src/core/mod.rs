//! Nonlinear side of the engine.
//!
//! This module contains the building blocks a problem is expressed with:
//! - Keys and the typed values container
//! - Orderings and fill-reducing ordering heuristics
//! - The nonlinear factor contract and the factor graph
//! - Numerical derivatives for factors without analytic Jacobians

pub mod factor;
pub mod graph;
pub mod key;
pub mod numerical;
pub mod ordering;
pub mod values;

pub use factor::{CustomFactor, ErrorFunction, NonlinearFactor};
pub use graph::NonlinearFactorGraph;
pub use key::{Key, landmark_key, pose_key};
pub use ordering::{
    MinimumDegree, NaturalOrdering, OrderedDims, Ordering, OrderingHeuristic, VariableAdjacency,
};
pub use values::{Value, Values};
