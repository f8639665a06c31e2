//! Primitive type definitions for HTM algorithms.
//!
//! Cells, columns, segments and synapses are all addressed by plain integer
//! indices into flat arenas owned by [`Connections`](crate::algorithms::Connections).

/// Default floating point type used for duty cycles, boost factors and overlaps.
pub type Real = f64;

/// Global index of a cell (`column * cells_per_column + slot`).
pub type CellIdx = u32;

/// Index of a column in the column grid.
pub type ColumnIdx = u32;

/// Flat (global) index of a distal segment.
///
/// Flat indices are recycled through a free list once a segment is destroyed.
pub type Segment = u32;

/// Handle of a distal synapse in the synapse arena.
pub type Synapse = u32;

/// Synapse permanence value.
pub type Permanence = f64;

/// Minimum permanence value.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Maximum permanence value.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Tolerance used when comparing permanences.
///
/// A distal synapse whose permanence falls below this value is destroyed, and a
/// synapse counts as connected once it is within `EPSILON` of the threshold.
pub const EPSILON: Permanence = 0.000_01;
