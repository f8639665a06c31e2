//! Distal and proximal dendrite segments.

use super::Pool;
use crate::types::{CellIdx, ColumnIdx, Segment, Synapse};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operations shared by both dendrite kinds.
pub trait Dendrite {
    /// Segment index: the flat index of a distal segment, the column of a proximal one.
    fn index(&self) -> u32;

    /// Number of live synapses on the segment.
    fn num_synapses(&self) -> usize;
}

/// A dynamically created segment on a cell, fed by other cells.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistalDendrite {
    parent_cell: CellIdx,
    flat_index: Segment,
    last_used_iteration: u64,
    ordinal: u64,
    /// Synapse handles in creation order.
    pub(crate) synapses: SmallVec<[Synapse; 32]>,
}

impl DistalDendrite {
    /// Creates an empty segment.
    pub fn new(parent_cell: CellIdx, flat_index: Segment, last_used_iteration: u64, ordinal: u64) -> Self {
        Self {
            parent_cell,
            flat_index,
            last_used_iteration,
            ordinal,
            synapses: SmallVec::new(),
        }
    }

    /// The cell that owns this segment.
    #[inline]
    pub fn parent_cell(&self) -> CellIdx {
        self.parent_cell
    }

    /// Flat index used for O(1) lookup.
    #[inline]
    pub fn flat_index(&self) -> Segment {
        self.flat_index
    }

    /// Temporal-memory iteration in which the segment was last active.
    #[inline]
    pub fn last_used_iteration(&self) -> u64 {
        self.last_used_iteration
    }

    pub(crate) fn set_last_used_iteration(&mut self, iteration: u64) {
        self.last_used_iteration = iteration;
    }

    /// Creation ordinal; older segments have smaller ordinals.
    #[inline]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Synapse handles in creation order.
    #[inline]
    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    /// Canonical ordering key: by parent cell, then by age within the cell.
    ///
    /// Equivalent to comparing `parent_cell + ordinal / next_ordinal` without
    /// going through floating point.
    #[inline]
    pub fn sort_key(&self) -> (CellIdx, u64) {
        (self.parent_cell, self.ordinal)
    }
}

impl Dendrite for DistalDendrite {
    fn index(&self) -> u32 {
        self.flat_index
    }

    fn num_synapses(&self) -> usize {
        self.synapses.len()
    }
}

/// The single receptive-field segment of a column.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProximalDendrite {
    column: ColumnIdx,
    synapse_threshold: f64,
    pub(crate) pool: Pool,
}

impl ProximalDendrite {
    /// Creates a proximal dendrite with an empty pool.
    pub fn new(column: ColumnIdx, synapse_threshold: f64) -> Self {
        Self {
            column,
            synapse_threshold,
            pool: Pool::new(),
        }
    }

    /// Minimum overlap for the column to take part in inhibition.
    #[inline]
    pub fn synapse_threshold(&self) -> f64 {
        self.synapse_threshold
    }

    /// The receptive field.
    #[inline]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Dendrite for ProximalDendrite {
    fn index(&self) -> u32 {
        self.column
    }

    fn num_synapses(&self) -> usize {
        self.pool.len()
    }
}
