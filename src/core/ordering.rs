//! Elimination orderings and the heuristics that produce them.
//!
//! An [`Ordering`] maps each variable key to a dense slot `0..n`. It is built
//! explicitly from a key sequence or by an [`OrderingHeuristic`] working on the
//! [`VariableAdjacency`] of a graph (which keys co-occur in a factor).

use crate::core::key::Key;
use crate::core::values::Values;
use crate::error::{FactorGraphError, FactorGraphResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Bijection between variable keys and elimination slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ordering {
    keys: Vec<Key>,
    positions: HashMap<Key, usize>,
}

/// Per-slot tangent dimensions of an ordering, with their sum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedDims {
    pub dims: Vec<usize>,
    pub total: usize,
}

impl OrderedDims {
    /// Column offset of each slot in a flat stacking.
    pub fn offsets(&self) -> Vec<usize> {
        self.dims
            .iter()
            .scan(0, |acc, &d| {
                let start = *acc;
                *acc += d;
                Some(start)
            })
            .collect()
    }
}

impl Ordering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit ordering; fails with `DuplicateKey` if a key repeats.
    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> FactorGraphResult<Self> {
        let mut ordering = Ordering::new();
        for key in keys {
            ordering.push(key)?;
        }
        Ok(ordering)
    }

    /// Ordering over keys already known to be distinct. Repeats are ignored.
    pub(crate) fn from_unique_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        let mut ordering = Ordering::new();
        for key in keys {
            let _ = ordering.push(key);
        }
        ordering
    }

    /// Append a key at the next slot, returning that slot.
    pub fn push(&mut self, key: Key) -> FactorGraphResult<usize> {
        if self.positions.contains_key(&key) {
            return Err(FactorGraphError::DuplicateKey(key));
        }
        let slot = self.keys.len();
        self.positions.insert(key, slot);
        self.keys.push(key);
        Ok(slot)
    }

    pub fn position(&self, key: Key) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    /// Slot of `key`; fails with `KeyNotFound` if it is not ordered.
    pub fn index_of(&self, key: Key) -> FactorGraphResult<usize> {
        self.position(key).ok_or(FactorGraphError::KeyNotFound(key))
    }

    pub fn key_at(&self, slot: usize) -> Option<Key> {
        self.keys.get(slot).copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.positions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in slot order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Tangent dimension of every slot, read from the values container.
    pub fn dims(&self, values: &Values) -> FactorGraphResult<OrderedDims> {
        let dims = self
            .keys
            .iter()
            .map(|&key| {
                values
                    .get(key)
                    .map(|v| v.dim())
                    .ok_or(FactorGraphError::MissingVariable(key))
            })
            .collect::<FactorGraphResult<Vec<_>>>()?;
        let total = dims.iter().sum();
        Ok(OrderedDims { dims, total })
    }

    /// True if this ordering covers exactly `keys`.
    pub fn is_bijection_over(&self, keys: &BTreeSet<Key>) -> bool {
        self.len() == keys.len() && keys.iter().all(|k| self.contains(*k))
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        write!(f, "Ordering[{}]", names.join(", "))
    }
}

/// Symmetric key co-occurrence structure of a factor graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableAdjacency {
    neighbors: BTreeMap<Key, BTreeSet<Key>>,
}

impl VariableAdjacency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one factor: every pair of its keys becomes adjacent.
    pub fn add_factor(&mut self, keys: &[Key]) {
        for &a in keys {
            let entry = self.neighbors.entry(a).or_default();
            entry.extend(keys.iter().copied().filter(|&b| b != a));
        }
    }

    /// Insert a single edge. Used to describe hand-built structures.
    pub fn add_edge(&mut self, a: Key, b: Key) {
        self.neighbors.entry(a).or_default().insert(b);
        self.neighbors.entry(b).or_default().insert(a);
    }

    pub fn from_factors<'a>(factors: impl IntoIterator<Item = &'a [Key]>) -> Self {
        let mut adjacency = VariableAdjacency::new();
        for keys in factors {
            adjacency.add_factor(keys);
        }
        adjacency
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.neighbors.keys().copied()
    }

    pub fn key_set(&self) -> BTreeSet<Key> {
        self.neighbors.keys().copied().collect()
    }

    pub fn neighbors(&self, key: Key) -> Option<&BTreeSet<Key>> {
        self.neighbors.get(&key)
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Check that the structure is non-empty, symmetric, loop-free and closed.
    pub fn validate(&self) -> FactorGraphResult<()> {
        if self.neighbors.is_empty() {
            return Err(FactorGraphError::OrderingFailed(
                "no variables to order".to_string(),
            ));
        }
        for (key, adjacent) in &self.neighbors {
            for other in adjacent {
                if other == key {
                    return Err(FactorGraphError::OrderingFailed(format!(
                        "variable {key} is adjacent to itself"
                    )));
                }
                let back = self.neighbors.get(other).ok_or_else(|| {
                    FactorGraphError::OrderingFailed(format!(
                        "variable {key} references unknown neighbor {other}"
                    ))
                })?;
                if !back.contains(key) {
                    return Err(FactorGraphError::OrderingFailed(format!(
                        "adjacency between {key} and {other} is not symmetric"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Ordering service: returns a bijection over exactly the adjacency's keys.
pub trait OrderingHeuristic: Send + Sync {
    fn compute_ordering(&self, adjacency: &VariableAdjacency) -> FactorGraphResult<Ordering>;

    fn name(&self) -> &'static str;
}

/// Keys in ascending order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrdering;

impl OrderingHeuristic for NaturalOrdering {
    fn compute_ordering(&self, adjacency: &VariableAdjacency) -> FactorGraphResult<Ordering> {
        adjacency.validate()?;
        Ordering::from_keys(adjacency.keys())
    }

    fn name(&self) -> &'static str {
        "natural"
    }
}

/// Greedy minimum degree: repeatedly eliminate the variable with the fewest
/// remaining neighbors, connecting its neighbors to model fill-in.
///
/// Ties break on the smallest key, so the result is deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumDegree;

impl OrderingHeuristic for MinimumDegree {
    fn compute_ordering(&self, adjacency: &VariableAdjacency) -> FactorGraphResult<Ordering> {
        adjacency.validate()?;

        let mut remaining: BTreeMap<Key, BTreeSet<Key>> = adjacency.neighbors.clone();
        let mut ordering = Ordering::new();

        while let Some(next) = remaining
            .iter()
            .min_by_key(|(key, adjacent)| (adjacent.len(), **key))
            .map(|(key, _)| *key)
        {
            let adjacent = remaining.remove(&next).unwrap_or_default();
            for &a in &adjacent {
                if let Some(set) = remaining.get_mut(&a) {
                    set.remove(&next);
                    set.extend(adjacent.iter().copied().filter(|&b| b != a));
                }
            }
            ordering.push(next)?;
        }

        if !ordering.is_bijection_over(&adjacency.key_set()) {
            return Err(FactorGraphError::OrderingFailed(
                "minimum degree did not cover every variable".to_string(),
            ));
        }
        tracing::trace!(
            "minimum degree ordering over {} variables: {}",
            ordering.len(),
            ordering
        );
        Ok(ordering)
    }

    fn name(&self) -> &'static str {
        "minimum-degree"
    }
}
