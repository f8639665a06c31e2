//! Spatial-pooler column.

use super::{Cell, Pool, ProximalDendrite, SynapseData};
use crate::algorithms::HtmConfig;
use crate::error::{CorticalError, Result};
use crate::types::{ColumnIdx, Permanence};
use crate::utils::Topology;
use bitvec::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A column: a fixed set of cells sharing one proximal receptive field.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Column {
    index: ColumnIdx,
    pub(crate) cells: Vec<Cell>,
    proximal: ProximalDendrite,
    /// One bit per input: set when a connected synapse reads that input.
    connected_input_counter: BitVec,
}

impl Column {
    /// Creates a column with `cells_per_column` cells and an empty receptive field.
    pub fn new(index: ColumnIdx, cells_per_column: u32, num_inputs: usize, stimulus_threshold: f64) -> Self {
        Self {
            index,
            cells: (0..cells_per_column)
                .map(|slot| Cell::new(index, slot, cells_per_column))
                .collect(),
            proximal: ProximalDendrite::new(index, stimulus_threshold),
            connected_input_counter: bitvec![0; num_inputs],
        }
    }

    /// Column index.
    #[inline]
    pub fn index(&self) -> ColumnIdx {
        self.index
    }

    /// Cells of this column, ordered by slot.
    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// The column's proximal dendrite.
    #[inline]
    pub fn proximal(&self) -> &ProximalDendrite {
        &self.proximal
    }

    /// The receptive field.
    #[inline]
    pub fn pool(&self) -> &Pool {
        &self.proximal.pool
    }

    /// Connected-input membership row.
    #[inline]
    pub fn connected_input_row(&self) -> &BitSlice {
        &self.connected_input_counter
    }

    /// Number of connected proximal synapses.
    pub fn connected_count(&self) -> usize {
        self.connected_input_counter.count_ones()
    }

    /// Replaces the receptive field with zero-permanence synapses onto `inputs`.
    pub fn create_potential_pool(&mut self, inputs: &[usize]) {
        let mut pool = Pool::new();
        for (i, &input) in inputs.iter().enumerate() {
            pool.add_synapse(SynapseData::proximal(self.index, i as u64, input as u32, 0.0));
        }
        self.proximal.pool = pool;
        self.connected_input_counter.fill(false);
    }

    /// Overwrites the pool permanences (input order) and rebuilds the
    /// connected-input row.
    pub fn set_permanences(&mut self, permanences: &[Permanence], connected_threshold: Permanence) {
        let row = &mut self.connected_input_counter;
        row.fill(false);
        self.proximal
            .pool
            .set_permanences(permanences, connected_threshold, |input| row.set(input as usize, true));
    }

    /// Normalizes and stores new pool permanences.
    ///
    /// When `raise` is set, permanences are first raised uniformly until at
    /// least `stimulus_threshold` synapses are connected. Values at or below the
    /// trim threshold are then zeroed and everything is clipped to
    /// `[syn_perm_min, syn_perm_max]`.
    pub fn update_permanences(
        &mut self,
        permanences: &mut [Permanence],
        config: &HtmConfig,
        raise: bool,
    ) -> Result<()> {
        if raise {
            raise_permanences_to_threshold(permanences, config)?;
        }

        for perm in permanences.iter_mut() {
            if *perm <= config.syn_perm_trim_threshold {
                *perm = 0.0;
            }
            *perm = perm.clamp(config.syn_perm_min, config.syn_perm_max);
        }

        self.set_permanences(permanences, config.syn_perm_connected);
        Ok(())
    }

    /// Number of active inputs read through connected synapses, zeroed when
    /// below `stimulus_threshold`.
    pub fn overlap(&self, input: &[u8], stimulus_threshold: f64) -> u32 {
        let overlap = self
            .connected_input_counter
            .iter_ones()
            .filter(|&i| input.get(i).is_some_and(|&bit| bit != 0))
            .count() as u32;

        if f64::from(overlap) < stimulus_threshold {
            0
        } else {
            overlap
        }
    }

    /// Average extent (over input dimensions) of the connected inputs.
    pub fn connected_span(&self, inputs: &Topology) -> f64 {
        let dims = inputs.num_dimensions();
        let mut min = vec![usize::MAX; dims];
        let mut max = vec![0usize; dims];
        let mut any = false;

        for input in self.connected_input_counter.iter_ones() {
            any = true;
            for (d, coord) in inputs.index_to_coordinates(input).into_iter().enumerate() {
                min[d] = min[d].min(coord);
                max[d] = max[d].max(coord);
            }
        }

        if !any {
            return 0.0;
        }

        let total: usize = min.iter().zip(&max).map(|(lo, hi)| hi - lo + 1).sum();
        total as f64 / dims as f64
    }
}

/// Raises every permanence by `syn_perm_below_stimulus_inc` until at least
/// `stimulus_threshold` of them are connected.
fn raise_permanences_to_threshold(permanences: &mut [Permanence], config: &HtmConfig) -> Result<()> {
    if (permanences.len() as f64) < config.stimulus_threshold {
        return Err(CorticalError::InvalidParameter {
            name: "stimulus_threshold",
            message: format!(
                "potential pool of {} synapses can never reach a stimulus threshold of {}",
                permanences.len(),
                config.stimulus_threshold
            ),
        });
    }

    for perm in permanences.iter_mut() {
        *perm = perm.clamp(config.syn_perm_min, config.syn_perm_max);
    }

    loop {
        let connected = permanences
            .iter()
            .filter(|&&p| p >= config.syn_perm_connected)
            .count();
        if connected as f64 >= config.stimulus_threshold {
            return Ok(());
        }
        for perm in permanences.iter_mut() {
            *perm += config.syn_perm_below_stimulus_inc;
        }
    }
}
