//! Structural entities of the HTM graph.
//!
//! Columns own their cells and one proximal dendrite; cells own the flat indices
//! of their distal segments. All back-references (cell to column, synapse to
//! segment, segment to cell) are plain indices into the arenas kept by
//! [`Connections`](crate::algorithms::Connections).

mod cell;
mod column;
mod pool;
mod segment;
mod synapse;

pub use cell::Cell;
pub use column::Column;
pub use pool::Pool;
pub use segment::{Dendrite, DistalDendrite, ProximalDendrite};
pub use synapse::SynapseData;
