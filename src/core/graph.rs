//! Nonlinear factor graph.
//!
//! An append-only list of shared factors. During optimization the graph is
//! read-only; linearization fans out over factors with rayon since each factor
//! only reads the shared values and writes its own linear factor.

use crate::core::factor::NonlinearFactor;
use crate::core::key::Key;
use crate::core::ordering::{MinimumDegree, Ordering, OrderingHeuristic, VariableAdjacency};
use crate::core::values::Values;
use crate::error::{FactorGraphError, FactorGraphResult};
use crate::linalg::GaussianFactorGraph;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct NonlinearFactorGraph {
    factors: Vec<Arc<dyn NonlinearFactor>>,
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F: NonlinearFactor + 'static>(&mut self, factor: F) {
        self.factors.push(Arc::new(factor));
    }

    pub fn add_shared(&mut self, factor: Arc<dyn NonlinearFactor>) {
        self.factors.push(factor);
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn NonlinearFactor>> {
        self.factors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn NonlinearFactor>> + '_ {
        self.factors.iter()
    }

    /// Every key referenced by at least one factor.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.factors
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .collect()
    }

    /// Sum of factor errors.
    pub fn error(&self, values: &Values) -> FactorGraphResult<f64> {
        self.factors.iter().map(|f| f.error(values)).sum()
    }

    /// Linearize every factor at `values`, in factor order.
    pub fn linearize(
        &self,
        values: &Values,
        ordering: &Ordering,
    ) -> FactorGraphResult<GaussianFactorGraph> {
        let factors = self
            .factors
            .par_iter()
            .map(|f| f.linearize(values, ordering))
            .collect::<FactorGraphResult<Vec<_>>>()?;
        Ok(GaussianFactorGraph::from_factors(factors))
    }

    /// Which keys share a factor.
    pub fn adjacency(&self) -> VariableAdjacency {
        VariableAdjacency::from_factors(self.factors.iter().map(|f| f.keys()))
    }

    pub fn ordering_with(&self, heuristic: &dyn OrderingHeuristic) -> FactorGraphResult<Ordering> {
        let ordering = heuristic.compute_ordering(&self.adjacency())?;
        if !ordering.is_bijection_over(&self.keys()) {
            return Err(FactorGraphError::OrderingFailed(format!(
                "{} ordering does not cover exactly the graph's keys",
                heuristic.name()
            )));
        }
        debug!("{} ordering: {}", heuristic.name(), ordering);
        Ok(ordering)
    }

    /// Fill-reducing ordering for optimizing this graph from `values`.
    ///
    /// Fails with `OrderingFailed` when a graph key has no value, since such an
    /// ordering could never be linearized.
    pub fn ordering_min_degree(&self, values: &Values) -> FactorGraphResult<Ordering> {
        if let Some(missing) = self.keys().into_iter().find(|k| !values.contains(*k)) {
            return Err(FactorGraphError::OrderingFailed(format!(
                "variable {missing} is referenced by the graph but has no value"
            )));
        }
        self.ordering_with(&MinimumDegree)
    }
}

impl FromIterator<Arc<dyn NonlinearFactor>> for NonlinearFactorGraph {
    fn from_iter<I: IntoIterator<Item = Arc<dyn NonlinearFactor>>>(iter: I) -> Self {
        NonlinearFactorGraph {
            factors: iter.into_iter().collect(),
        }
    }
}
