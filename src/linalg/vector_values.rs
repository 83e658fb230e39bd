//! Tangent-space delta vectors, sliced per ordering slot.

use crate::error::{FactorGraphError, FactorGraphResult};
use nalgebra::DVector;

/// A flat vector partitioned into consecutive per-variable blocks.
///
/// Slot `i` holds the tangent update of the variable at ordering position `i`
/// and spans `dims[i]` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorValues {
    dims: Vec<usize>,
    offsets: Vec<usize>,
    data: DVector<f64>,
}

fn offsets_of(dims: &[usize]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(dims.len());
    let mut total = 0;
    for &d in dims {
        offsets.push(total);
        total += d;
    }
    (offsets, total)
}

impl VectorValues {
    /// All-zero vector with the given block sizes.
    pub fn zeros(dims: &[usize]) -> Self {
        let (offsets, total) = offsets_of(dims);
        VectorValues {
            dims: dims.to_vec(),
            offsets,
            data: DVector::zeros(total),
        }
    }

    /// Wrap a flat vector; its length must equal the sum of `dims`.
    pub fn from_vector(dims: &[usize], data: DVector<f64>) -> FactorGraphResult<Self> {
        let (offsets, total) = offsets_of(dims);
        if data.len() != total {
            return Err(FactorGraphError::DimensionMismatch {
                context: "VectorValues::from_vector",
                expected: total,
                actual: data.len(),
            });
        }
        Ok(VectorValues {
            dims: dims.to_vec(),
            offsets,
            data,
        })
    }

    /// Build from one block per slot.
    pub fn from_blocks(blocks: &[DVector<f64>]) -> Self {
        let dims: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
        let mut out = VectorValues::zeros(&dims);
        for (slot, block) in blocks.iter().enumerate() {
            let start = out.offsets[slot];
            out.data.rows_mut(start, block.len()).copy_from(block);
        }
        out
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn offset(&self, slot: usize) -> Option<usize> {
        self.offsets.get(slot).copied()
    }

    pub fn total_dim(&self) -> usize {
        self.data.len()
    }

    /// Block of one slot, or `None` past the end.
    pub fn get(&self, slot: usize) -> Option<&[f64]> {
        let start = *self.offsets.get(slot)?;
        Some(&self.data.as_slice()[start..start + self.dims[slot]])
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut [f64]> {
        let start = *self.offsets.get(slot)?;
        let dim = self.dims[slot];
        Some(&mut self.data.as_mut_slice()[start..start + dim])
    }

    /// Overwrite one slot.
    pub fn set(&mut self, slot: usize, values: &[f64]) -> FactorGraphResult<()> {
        let available = self.len();
        let block = self.get_mut(slot).ok_or_else(|| {
            FactorGraphError::InvalidInput(format!(
                "slot {slot} out of range for {available} slots"
            ))
        })?;
        if block.len() != values.len() {
            return Err(FactorGraphError::DimensionMismatch {
                context: "VectorValues::set",
                expected: block.len(),
                actual: values.len(),
            });
        }
        block.copy_from_slice(values);
        Ok(())
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.data
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.data
    }

    pub fn norm(&self) -> f64 {
        self.data.norm()
    }

    /// Largest absolute entry, used as a step-size diagnostic.
    pub fn max_abs(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.data.amax()
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        VectorValues {
            dims: self.dims.clone(),
            offsets: self.offsets.clone(),
            data: &self.data * factor,
        }
    }
}
