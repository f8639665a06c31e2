//! Synapse data shared by proximal and distal dendrites.

use crate::types::{CellIdx, Permanence};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A directed, weighted edge into a segment.
///
/// Proximal synapses have no source cell and point at an input bit; distal
/// synapses carry their presynaptic cell and use its index as `input_index`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseData {
    /// Presynaptic cell, `None` for proximal synapses.
    pub source_cell: Option<CellIdx>,

    /// Owning segment: the flat index of a distal segment, or the column index
    /// of a proximal dendrite.
    pub segment_index: u32,

    /// Creation ordinal (distal) or position in the pool (proximal).
    pub synapse_index: u64,

    /// Input bit (proximal) or presynaptic cell index (distal).
    pub input_index: u32,

    /// Connection strength.
    pub permanence: Permanence,

    /// Tombstone set when the synapse is destroyed and its slot awaits reuse.
    pub destroyed: bool,
}

impl SynapseData {
    /// Creates a proximal synapse onto input bit `input_index`.
    pub fn proximal(column: u32, synapse_index: u64, input_index: u32, permanence: Permanence) -> Self {
        Self {
            source_cell: None,
            segment_index: column,
            synapse_index,
            input_index,
            permanence,
            destroyed: false,
        }
    }

    /// Creates a distal synapse from `source` onto segment `segment`.
    pub fn distal(source: CellIdx, segment: u32, synapse_index: u64, permanence: Permanence) -> Self {
        Self {
            source_cell: Some(source),
            segment_index: segment,
            synapse_index,
            input_index: source,
            permanence,
            destroyed: false,
        }
    }
}

impl PartialEq for SynapseData {
    fn eq(&self, other: &Self) -> bool {
        self.segment_index == other.segment_index
            && self.synapse_index == other.synapse_index
            && self.input_index == other.input_index
            && self.source_cell == other.source_cell
    }
}

impl Eq for SynapseData {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_permanence() {
        let a = SynapseData::distal(3, 7, 11, 0.2);
        let mut b = a.clone();
        b.permanence = 0.9;
        assert_eq!(a, b);

        let c = SynapseData::distal(4, 7, 11, 0.2);
        assert_ne!(a, c);
    }

    #[test]
    fn test_proximal_has_no_source() {
        let s = SynapseData::proximal(2, 0, 15, 0.0);
        assert!(s.source_cell.is_none());
        assert_eq!(s.input_index, 15);
        assert_eq!(s.segment_index, 2);
    }
}
