//! Temporal-memory cell.

use crate::types::{CellIdx, ColumnIdx, Segment};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One cell of a column.
///
/// Two cells are equal iff their global indices match.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cell {
    index: CellIdx,
    parent_column: ColumnIdx,
    /// Flat indices of the distal segments, in creation order.
    pub(crate) segments: SmallVec<[Segment; 8]>,
}

impl Cell {
    /// Creates cell `slot` of `column`.
    pub fn new(column: ColumnIdx, slot: u32, cells_per_column: u32) -> Self {
        Self {
            index: column * cells_per_column + slot,
            parent_column: column,
            segments: SmallVec::new(),
        }
    }

    /// Global cell index.
    #[inline]
    pub fn index(&self) -> CellIdx {
        self.index
    }

    /// Index of the owning column.
    #[inline]
    pub fn parent_column(&self) -> ColumnIdx {
        self.parent_column
    }

    /// Distal segments of this cell.
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Cell {}
