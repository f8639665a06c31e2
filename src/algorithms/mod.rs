//! HTM algorithms implementation.
//!
//! This module contains the core algorithms that implement Hierarchical Temporal Memory:
//!
//! - **Connections**: The structural graph and every piece of network state
//! - **Spatial Pooler**: Creates sparse representations from input patterns
//! - **Homeostatic Plasticity Controller**: Detects when the spatial pooler has settled
//! - **Temporal Memory**: Learns temporal sequences
//! - **Execution**: Sequential and parallel strategies for per-column work

mod config;
mod connections;
mod execution;
mod homeostatic;
mod spatial_pooler;
mod temporal_memory;

pub use config::HtmConfig;
pub use connections::{Connections, SegmentActivity};
pub use execution::{ActivityExecutor, ColumnExecutor, Sequential};
pub use homeostatic::{
    avg_delta, input_key, similarity, HomeostaticPlasticityController, StabilityCallback, StabilityEvent,
    DEFAULT_REQUIRED_SIMILARITY, DEFAULT_REQUIRED_STABLE_CYCLES, DEFAULT_WINDOW,
};
pub use spatial_pooler::{inhibition_density, init_permanences, map_potential, SpatialPooler};
pub use temporal_memory::{
    adapt_segment, anomaly_score, grow_synapses, ColumnGroup, ColumnPlan, ComputeCycle, TemporalMemory,
};

#[cfg(feature = "rayon")]
pub use execution::Parallel;

/// Spatial pooler running its per-column work on the rayon thread pool.
#[cfg(feature = "rayon")]
pub type SpatialPoolerMt = SpatialPooler<Parallel>;

/// Temporal memory running its per-column work on the rayon thread pool.
#[cfg(feature = "rayon")]
pub type TemporalMemoryMt = TemporalMemory<Parallel>;
