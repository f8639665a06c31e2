//! Utility modules for the HTM engine.
//!
//! Random number generation, grid topology and a small moving-average helper.

mod moving_average;
mod random;
mod topology;

pub use moving_average::MovingAverage;
pub use random::Random;
pub use topology::{Topology, WrappingMode};
