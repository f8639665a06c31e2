//! Core types for the HTM engine.
//!
//! Index aliases shared by the structural graph and the algorithms that walk it.

mod primitives;

pub use primitives::*;
