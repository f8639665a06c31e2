//! # Cortical - a Hierarchical Temporal Memory engine
//!
//! Cortical implements the HTM cortical learning algorithms on top of a single,
//! explicitly passed structural graph ([`Connections`](algorithms::Connections)).
//!
//! ## Overview
//!
//! - **Connections**: owns columns, cells, distal segments, synapses and all
//!   per-column statistics
//! - **Spatial Pooler**: turns a binary input vector into a sparse set of active columns
//! - **Homeostatic Plasticity Controller**: watches the pooler until every input maps
//!   to a stable output, then switches boosting off
//! - **Temporal Memory**: learns sequences of active-column sets and predicts the next one
//!
//! Every algorithm is generic over an execution strategy. [`Sequential`](algorithms::Sequential)
//! runs on the calling thread; with the `rayon` feature, [`Parallel`](algorithms::Parallel)
//! spreads per-column work over a thread pool and produces bit-identical results.
//!
//! ## Quick Start
//!
//! ```rust
//! use cortical::prelude::*;
//!
//! let mut config = HtmConfig::new(&[64], &[128]);
//! config.potential_radius = -1;
//! config.stimulus_threshold = 1.0;
//! config.cells_per_column = 4;
//!
//! let mut mem = Connections::new(config).unwrap();
//! let mut sp = SpatialPooler::init(&mut mem).unwrap();
//! let tm = TemporalMemory::init(&mut mem).unwrap();
//!
//! let mut input = vec![0u8; 64];
//! for i in (0..64).step_by(4) {
//!     input[i] = 1;
//! }
//!
//! let active_columns = sp.compute(&mut mem, &input, true).unwrap();
//! let cycle = tm.compute(&mut mem, &active_columns, true).unwrap();
//! assert!(!cycle.active_cells.is_empty());
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): Enable the parallel execution strategy
//! - `serde`: Enable binary/JSON snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod types;
pub mod utils;
pub mod entities;
pub mod algorithms;
pub mod persistence;

#[cfg(feature = "serde")]
pub mod serialization;

/// Re-export of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::types::{CellIdx, ColumnIdx, Permanence, Real, Segment, Synapse, EPSILON};
    pub use crate::entities::{Cell, Column, Dendrite, DistalDendrite, Pool, ProximalDendrite, SynapseData};
    pub use crate::algorithms::{
        ComputeCycle, Connections, HomeostaticPlasticityController, HtmConfig, Sequential,
        SpatialPooler, StabilityEvent, TemporalMemory,
    };
    #[cfg(feature = "rayon")]
    pub use crate::algorithms::{Parallel, SpatialPoolerMt, TemporalMemoryMt};
    pub use crate::persistence::{HtmReader, HtmWriter, Persist};
    pub use crate::utils::{MovingAverage, Random, Topology, WrappingMode};

    #[cfg(feature = "serde")]
    pub use crate::serialization::{NetworkSnapshot, Serializable, SerializableFormat};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Main error type for cortical operations.
    #[derive(Error, Debug)]
    pub enum CorticalError {
        /// Invalid dimensions provided.
        #[error("Invalid dimensions: {0}")]
        InvalidDimensions(String),

        /// Invalid parameter value.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the invalid parameter.
            name: &'static str,
            /// Description of the error.
            message: String,
        },

        /// Index out of bounds.
        #[error("Index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// Input vector length differs from the configured number of inputs.
        #[error("Input size mismatch: expected {expected}, got {actual}")]
        InputSizeMismatch {
            /// Configured number of inputs.
            expected: usize,
            /// Length of the vector passed in.
            actual: usize,
        },

        /// A destroyed or unknown segment/synapse handle was passed to a mutator.
        #[error("Invalid handle: {0}")]
        InvalidHandle(String),

        /// Malformed text in a persisted stream.
        #[error("Parse error at line {line}: {message}")]
        Parse {
            /// One-based line number in the stream.
            line: usize,
            /// Description of the problem.
            message: String,
        },

        /// I/O error from the underlying stream.
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Serialization error.
        #[cfg(feature = "serde")]
        #[error("Serialization error: {message}")]
        SerializationError {
            /// Description of the serialization error.
            message: String,
        },

        /// Internal error that should not occur.
        #[error("Internal error: {0}")]
        InternalError(String),
    }

    /// Result type alias using CorticalError.
    pub type Result<T> = std::result::Result<T, CorticalError>;
}

pub use error::{CorticalError, Result};
