//! Execution strategies for per-column work.
//!
//! The spatial pooler and the temporal memory are generic over how their
//! column-partitionable work runs. [`Sequential`] runs everything on the calling
//! thread. [`Parallel`] (feature `rayon`) spreads the same work over the rayon
//! thread pool. Both strategies call the same per-column functions and collect
//! results in column order, so they produce bit-identical networks.

use crate::algorithms::connections::SegmentActivity;
use crate::algorithms::spatial_pooler::{adapt_column, init_column, local_min_duty_cycle};
use crate::algorithms::temporal_memory::{plan_column, ColumnGroup, ColumnPlan};
use crate::algorithms::{Connections, HtmConfig};
use crate::entities::Column;
use crate::error::Result;
use crate::types::{CellIdx, Permanence, Real};
use crate::utils::{Topology, WrappingMode};

/// Column-partitioned work of the spatial pooler.
pub trait ColumnExecutor: Default + Send + Sync {
    /// Builds the potential pool and initial permanences of every column in
    /// `columns`, each from its own random stream.
    fn init_columns(
        &self,
        config: &HtmConfig,
        column_topology: &Topology,
        input_topology: &Topology,
        columns: &mut [Column],
    ) -> Result<()>;

    /// Overlap of every column in `columns`, in slice order.
    fn compute_overlaps(&self, columns: &[Column], input: &[u8], stimulus_threshold: f64) -> Vec<u32>;

    /// Reinforces the proximal synapses of the columns flagged in `active`
    /// (indexed like `columns`).
    fn adapt_synapses(&self, config: &HtmConfig, columns: &mut [Column], input: &[u8], active: &[bool]) -> Result<()>;

    /// `pct` times the neighborhood maximum of `duty_cycles`, for every column.
    fn local_min_duty_cycles(
        &self,
        topology: &Topology,
        radius: usize,
        wrap: WrappingMode,
        duty_cycles: &[Real],
        pct: f64,
    ) -> Vec<Real>;
}

/// Column-partitioned work of the temporal memory.
pub trait ActivityExecutor: Default + Send + Sync {
    /// Synapse tallies of every segment for the given active cells.
    fn compute_activity(&self, conn: &Connections, active_cells: &[CellIdx], connected_permanence: Permanence)
        -> SegmentActivity;

    /// Read-only learning plan of every column group, in group order.
    fn plan_columns(&self, conn: &Connections, groups: &[ColumnGroup]) -> Vec<ColumnPlan>;
}

/// Runs all work on the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sequential;

impl ColumnExecutor for Sequential {
    fn init_columns(
        &self,
        config: &HtmConfig,
        column_topology: &Topology,
        input_topology: &Topology,
        columns: &mut [Column],
    ) -> Result<()> {
        columns
            .iter_mut()
            .try_for_each(|column| init_column(config, column_topology, input_topology, column))
    }

    fn compute_overlaps(&self, columns: &[Column], input: &[u8], stimulus_threshold: f64) -> Vec<u32> {
        columns.iter().map(|c| c.overlap(input, stimulus_threshold)).collect()
    }

    fn adapt_synapses(&self, config: &HtmConfig, columns: &mut [Column], input: &[u8], active: &[bool]) -> Result<()> {
        columns
            .iter_mut()
            .zip(active)
            .filter(|&(_, &is_active)| is_active)
            .try_for_each(|(column, _)| adapt_column(config, column, input))
    }

    fn local_min_duty_cycles(
        &self,
        topology: &Topology,
        radius: usize,
        wrap: WrappingMode,
        duty_cycles: &[Real],
        pct: f64,
    ) -> Vec<Real> {
        (0..duty_cycles.len())
            .map(|column| local_min_duty_cycle(topology, column, radius, wrap, duty_cycles, pct))
            .collect()
    }
}

impl ActivityExecutor for Sequential {
    fn compute_activity(
        &self,
        conn: &Connections,
        active_cells: &[CellIdx],
        connected_permanence: Permanence,
    ) -> SegmentActivity {
        conn.compute_activity(active_cells, connected_permanence)
    }

    fn plan_columns(&self, conn: &Connections, groups: &[ColumnGroup]) -> Vec<ColumnPlan> {
        groups.iter().map(|group| plan_column(conn, group)).collect()
    }
}

#[cfg(feature = "rayon")]
pub use parallel::Parallel;

#[cfg(feature = "rayon")]
mod parallel {
    use super::*;
    use rayon::prelude::*;

    /// Active cells tallied per rayon task.
    const ACTIVITY_CHUNK: usize = 256;

    /// Spreads per-column work over the rayon thread pool.
    ///
    /// Each column is mutated by exactly one task and every result is collected
    /// in column order, so the outcome matches [`Sequential`] bit for bit.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Parallel;

    impl ColumnExecutor for Parallel {
        fn init_columns(
            &self,
            config: &HtmConfig,
            column_topology: &Topology,
            input_topology: &Topology,
            columns: &mut [Column],
        ) -> Result<()> {
            columns
                .par_iter_mut()
                .try_for_each(|column| init_column(config, column_topology, input_topology, column))
        }

        fn compute_overlaps(&self, columns: &[Column], input: &[u8], stimulus_threshold: f64) -> Vec<u32> {
            columns.par_iter().map(|c| c.overlap(input, stimulus_threshold)).collect()
        }

        fn adapt_synapses(
            &self,
            config: &HtmConfig,
            columns: &mut [Column],
            input: &[u8],
            active: &[bool],
        ) -> Result<()> {
            columns
                .par_iter_mut()
                .zip(active)
                .filter(|&(_, &is_active)| is_active)
                .try_for_each(|(column, _)| adapt_column(config, column, input))
        }

        fn local_min_duty_cycles(
            &self,
            topology: &Topology,
            radius: usize,
            wrap: WrappingMode,
            duty_cycles: &[Real],
            pct: f64,
        ) -> Vec<Real> {
            (0..duty_cycles.len())
                .into_par_iter()
                .map(|column| local_min_duty_cycle(topology, column, radius, wrap, duty_cycles, pct))
                .collect()
        }
    }

    impl ActivityExecutor for Parallel {
        fn compute_activity(
            &self,
            conn: &Connections,
            active_cells: &[CellIdx],
            connected_permanence: Permanence,
        ) -> SegmentActivity {
            let len = conn.segment_flat_list_len();
            active_cells
                .par_chunks(ACTIVITY_CHUNK)
                .map(|chunk| {
                    let mut activity = SegmentActivity::new(len);
                    conn.tally_activity(chunk, connected_permanence, &mut activity);
                    activity
                })
                .reduce(|| SegmentActivity::new(len), SegmentActivity::merge)
        }

        fn plan_columns(&self, conn: &Connections, groups: &[ColumnGroup]) -> Vec<ColumnPlan> {
            groups.par_iter().map(|group| plan_column(conn, group)).collect()
        }
    }
}
