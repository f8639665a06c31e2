//! Connections - the structural graph and state container of an HTM network.
//!
//! `Connections` owns every column, cell, distal segment and synapse, together
//! with the per-column statistics maintained by the spatial pooler and the
//! per-cycle cell/segment state maintained by the temporal memory. Algorithms
//! never keep their own copy of this state; they take `Connections` by
//! reference on every call.

use crate::algorithms::HtmConfig;
use crate::entities::{Cell, Column, Dendrite, DistalDendrite, SynapseData};
use crate::error::{CorticalError, Result};
use crate::persistence::{fmt_opt, join, parse_opt, HtmReader, HtmWriter, Persist};
use crate::types::{CellIdx, ColumnIdx, Permanence, Real, Segment, Synapse, EPSILON};
use crate::utils::{Random, Topology};
use std::io::{BufRead, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-segment synapse tallies produced by [`Connections::compute_activity`].
///
/// Both vectors are indexed by flat segment index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentActivity {
    /// Synapses from active cells whose permanence reaches the connected threshold.
    pub active_synapses: Vec<u32>,
    /// Synapses from active cells regardless of permanence.
    pub potential_synapses: Vec<u32>,
}

impl SegmentActivity {
    /// Zeroed tallies for `len` flat segment slots.
    pub fn new(len: usize) -> Self {
        Self {
            active_synapses: vec![0; len],
            potential_synapses: vec![0; len],
        }
    }

    /// Active-synapse tally of a segment.
    #[inline]
    pub fn active(&self, segment: Segment) -> u32 {
        self.active_synapses.get(segment as usize).copied().unwrap_or(0)
    }

    /// Potential-synapse tally of a segment.
    #[inline]
    pub fn potential(&self, segment: Segment) -> u32 {
        self.potential_synapses.get(segment as usize).copied().unwrap_or(0)
    }

    /// Adds another set of tallies slot by slot.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.active_synapses.iter_mut().zip(other.active_synapses) {
            *a += b;
        }
        for (a, b) in self.potential_synapses.iter_mut().zip(other.potential_synapses) {
            *a += b;
        }
        self
    }
}

/// The aggregate root of an HTM network.
///
/// # Example
///
/// ```rust
/// use cortical::algorithms::{Connections, HtmConfig};
///
/// let mut config = HtmConfig::new(&[16], &[8]);
/// config.cells_per_column = 4;
/// let mut mem = Connections::new(config).unwrap();
///
/// let segment = mem.create_distal_segment(5).unwrap();
/// mem.create_synapse(segment, 12, 0.6).unwrap();
/// mem.create_synapse(segment, 20, 0.3).unwrap();
///
/// let activity = mem.compute_activity(&[12, 20], 0.5);
/// assert_eq!(activity.active(segment), 1);
/// assert_eq!(activity.potential(segment), 2);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connections {
    config: HtmConfig,
    column_topology: Topology,
    input_topology: Topology,

    /// All columns, each owning its cells and proximal dendrite.
    columns: Vec<Column>,

    // Distal graph
    /// Segment arena indexed by flat index; `None` marks a reclaimed slot.
    segments: Vec<Option<DistalDendrite>>,
    /// Reclaimed flat indices, reused from the tail.
    free_flat_indices: Vec<Segment>,
    /// Synapse arena; destroyed entries carry the tombstone flag.
    synapses: Vec<SynapseData>,
    free_synapses: Vec<Synapse>,
    /// Presynaptic cell -> synapses sourced from it.
    receptor_synapses: Vec<Vec<Synapse>>,

    next_flat_index: Segment,
    next_segment_ordinal: u64,
    next_synapse_ordinal: u64,
    num_synapses: usize,
    tm_iteration: u64,

    // Temporal-memory cycle state
    active_cells: Vec<CellIdx>,
    winner_cells: Vec<CellIdx>,
    active_segments: Vec<Segment>,
    matching_segments: Vec<Segment>,
    last_activity: SegmentActivity,

    // Spatial-pooler statistics
    pub(crate) overlap_duty_cycles: Vec<Real>,
    pub(crate) active_duty_cycles: Vec<Real>,
    pub(crate) min_overlap_duty_cycles: Vec<Real>,
    pub(crate) min_active_duty_cycles: Vec<Real>,
    pub(crate) boost_factors: Vec<Real>,
    overlaps: Vec<u32>,
    boosted_overlaps: Vec<Real>,
    inhibition_radius: usize,
    sp_iteration_num: u64,
    sp_iteration_learn_num: u64,

    random: Random,
}

impl Connections {
    /// Validates the configuration and builds the column/cell grid.
    ///
    /// Proximal pools start empty; [`SpatialPooler::init`](crate::algorithms::SpatialPooler::init)
    /// fills them.
    pub fn new(config: HtmConfig) -> Result<Self> {
        config.validate()?;

        let column_topology = Topology::new(&config.column_dimensions, config.is_column_major)?;
        let input_topology = Topology::new(&config.input_dimensions, config.is_column_major)?;
        let num_columns = column_topology.num_elements();
        let num_inputs = input_topology.num_elements();

        let cells_per_column = u32::try_from(config.cells_per_column).map_err(|_| CorticalError::InvalidParameter {
            name: "cells_per_column",
            message: "Too large".to_string(),
        })?;
        let num_cells = num_columns * config.cells_per_column;
        if u32::try_from(num_cells).is_err() {
            return Err(CorticalError::InvalidDimensions(format!(
                "{num_cells} cells exceed the addressable cell range"
            )));
        }

        let columns = (0..num_columns)
            .map(|c| Column::new(c as ColumnIdx, cells_per_column, num_inputs, config.stimulus_threshold))
            .collect();

        let random = Random::new(config.random_seed);

        Ok(Self {
            column_topology,
            input_topology,
            columns,
            segments: Vec::new(),
            free_flat_indices: Vec::new(),
            synapses: Vec::new(),
            free_synapses: Vec::new(),
            receptor_synapses: vec![Vec::new(); num_cells],
            next_flat_index: 0,
            next_segment_ordinal: 0,
            next_synapse_ordinal: 0,
            num_synapses: 0,
            tm_iteration: 0,
            active_cells: Vec::new(),
            winner_cells: Vec::new(),
            active_segments: Vec::new(),
            matching_segments: Vec::new(),
            last_activity: SegmentActivity::default(),
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            min_active_duty_cycles: vec![0.0; num_columns],
            boost_factors: vec![1.0; num_columns],
            overlaps: vec![0; num_columns],
            boosted_overlaps: vec![0.0; num_columns],
            inhibition_radius: 0,
            sp_iteration_num: 0,
            sp_iteration_learn_num: 0,
            random,
            config,
        })
    }

    /// The configuration block.
    #[inline]
    pub fn config(&self) -> &HtmConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn config_mut(&mut self) -> &mut HtmConfig {
        &mut self.config
    }

    /// Changes learning rates and thresholds between cycles.
    ///
    /// `change` edits a copy of the block, which replaces the current one only
    /// if it validates and keeps the grid shape: dimensions, `cells_per_column`,
    /// segment and synapse capacities, and the permanence bounds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` and leaves the block untouched otherwise.
    pub fn update_config(&mut self, change: impl FnOnce(&mut HtmConfig)) -> Result<()> {
        let mut config = self.config.clone();
        change(&mut config);

        let current = &self.config;
        let same_shape = config.input_dimensions == current.input_dimensions
            && config.column_dimensions == current.column_dimensions
            && config.is_column_major == current.is_column_major
            && config.cells_per_column == current.cells_per_column
            && config.max_segments_per_cell == current.max_segments_per_cell
            && config.max_synapses_per_segment == current.max_synapses_per_segment
            && config.syn_perm_min == current.syn_perm_min
            && config.syn_perm_max == current.syn_perm_max;
        if !same_shape {
            return Err(CorticalError::InvalidParameter {
                name: "config",
                message: "the grid shape is fixed once connections exist".to_string(),
            });
        }

        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Topology of the column space.
    #[inline]
    pub fn column_topology(&self) -> &Topology {
        &self.column_topology
    }

    /// Topology of the input space.
    #[inline]
    pub fn input_topology(&self) -> &Topology {
        &self.input_topology
    }

    /// Number of columns.
    #[inline]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of input bits.
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.input_topology.num_elements()
    }

    /// Number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.receptor_synapses.len()
    }

    /// Cells per column.
    #[inline]
    pub fn cells_per_column(&self) -> usize {
        self.config.cells_per_column
    }

    // ========================================================================
    // Columns and cells
    // ========================================================================

    /// All columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Gets a column.
    pub fn column(&self, column: ColumnIdx) -> Result<&Column> {
        self.columns.get(column as usize).ok_or(CorticalError::IndexOutOfBounds {
            index: column as usize,
            size: self.columns.len(),
        })
    }

    /// Splits the borrow into the read-only settings and the mutable columns, so
    /// column-local work can run over disjoint columns.
    pub(crate) fn column_workspace(&mut self) -> (&HtmConfig, &Topology, &Topology, &mut [Column]) {
        (&self.config, &self.column_topology, &self.input_topology, &mut self.columns)
    }

    /// Gets a cell by global index.
    pub fn cell(&self, cell: CellIdx) -> Result<&Cell> {
        let cpc = self.config.cells_per_column;
        self.columns
            .get(cell as usize / cpc)
            .map(|column| &column.cells()[cell as usize % cpc])
            .ok_or(CorticalError::IndexOutOfBounds {
                index: cell as usize,
                size: self.num_cells(),
            })
    }

    fn cell_mut(&mut self, cell: CellIdx) -> Result<&mut Cell> {
        let cpc = self.config.cells_per_column;
        let size = self.num_cells();
        self.columns
            .get_mut(cell as usize / cpc)
            .map(|column| &mut column.cells[cell as usize % cpc])
            .ok_or(CorticalError::IndexOutOfBounds {
                index: cell as usize,
                size,
            })
    }

    /// Column that owns a cell.
    #[inline]
    pub fn column_of_cell(&self, cell: CellIdx) -> ColumnIdx {
        (cell as usize / self.config.cells_per_column) as ColumnIdx
    }

    /// Global indices of the cells of a column.
    pub fn cells_of_column(&self, column: ColumnIdx) -> std::ops::Range<CellIdx> {
        let cpc = self.config.cells_per_column as CellIdx;
        column * cpc..(column + 1) * cpc
    }

    // ========================================================================
    // Segment operations
    // ========================================================================

    /// Gets a live segment.
    pub fn segment(&self, segment: Segment) -> Result<&DistalDendrite> {
        self.segments
            .get(segment as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| CorticalError::InvalidHandle(format!("segment {segment} does not exist")))
    }

    fn segment_mut(&mut self, segment: Segment) -> Result<&mut DistalDendrite> {
        self.segments
            .get_mut(segment as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| CorticalError::InvalidHandle(format!("segment {segment} does not exist")))
    }

    /// Returns whether a flat index currently holds a segment.
    #[inline]
    pub fn is_live_segment(&self, segment: Segment) -> bool {
        matches!(self.segments.get(segment as usize), Some(Some(_)))
    }

    /// Distal segments of a cell, in creation order.
    pub fn segments_of(&self, cell: CellIdx) -> Result<&[Segment]> {
        Ok(self.cell(cell)?.segments())
    }

    /// Number of segments on a cell (0 for unknown cells).
    pub fn num_segments_of(&self, cell: CellIdx) -> usize {
        self.cell(cell).map_or(0, |c| c.segments().len())
    }

    /// Creates a segment on `cell`, evicting least-recently-used segments first
    /// while the cell is at capacity.
    ///
    /// # Returns
    ///
    /// The flat index of the new segment.
    pub fn create_distal_segment(&mut self, cell: CellIdx) -> Result<Segment> {
        self.cell(cell)?;

        while self.num_segments_of(cell) >= self.config.max_segments_per_cell {
            let Some(lru) = self.least_used_segment(cell) else { break };
            log::debug!("evicting segment {lru} from cell {cell} (least recently used)");
            self.destroy_segment(lru)?;
        }

        let flat_index = if let Some(reuse) = self.free_flat_indices.pop() {
            reuse
        } else {
            let flat_index = self.next_flat_index;
            self.next_flat_index += 1;
            self.segments.push(None);
            flat_index
        };

        let ordinal = self.next_segment_ordinal;
        self.next_segment_ordinal += 1;

        self.segments[flat_index as usize] = Some(DistalDendrite::new(cell, flat_index, self.tm_iteration, ordinal));
        self.cell_mut(cell)?.segments.push(flat_index);

        Ok(flat_index)
    }

    /// Destroys a segment: first its synapses, then the segment itself.
    pub fn destroy_segment(&mut self, segment: Segment) -> Result<()> {
        let seg = self.segment(segment)?;
        let cell = seg.parent_cell();
        let handles: Vec<Synapse> = seg.synapses().to_vec();

        for synapse in handles {
            self.release_synapse(synapse);
        }

        self.cell_mut(cell)?.segments.retain(|s| *s != segment);
        self.segments[segment as usize] = None;
        self.free_flat_indices.push(segment);
        Ok(())
    }

    /// The segment of `cell` with the smallest `last_used_iteration`; the
    /// first one in creation order wins ties.
    pub fn least_used_segment(&self, cell: CellIdx) -> Option<Segment> {
        let mut min: Option<(Segment, u64)> = None;
        for &segment in self.cell(cell).ok()?.segments() {
            let used = self.segments[segment as usize].as_ref()?.last_used_iteration();
            if min.map_or(true, |(_, m)| used < m) {
                min = Some((segment, used));
            }
        }
        min.map(|(segment, _)| segment)
    }

    /// Marks a segment as used in the current iteration.
    pub fn record_segment_activity(&mut self, segment: Segment) -> Result<()> {
        let iteration = self.tm_iteration;
        self.segment_mut(segment)?.set_last_used_iteration(iteration);
        Ok(())
    }

    /// Advances the logical clock used for LRU eviction.
    pub fn start_new_iteration(&mut self) {
        self.tm_iteration += 1;
    }

    // ========================================================================
    // Synapse operations
    // ========================================================================

    /// Gets synapse data.
    pub fn synapse(&self, synapse: Synapse) -> Result<&SynapseData> {
        self.synapses
            .get(synapse as usize)
            .filter(|s| !s.destroyed)
            .ok_or_else(|| CorticalError::InvalidHandle(format!("synapse {synapse} does not exist")))
    }

    /// Synapse handles of a segment, in creation order.
    pub fn synapses_of(&self, segment: Segment) -> Result<&[Synapse]> {
        Ok(self.segment(segment)?.synapses())
    }

    /// Synapses whose presynaptic cell is `cell`.
    pub fn receptor_synapses_of(&self, cell: CellIdx) -> &[Synapse] {
        self.receptor_synapses.get(cell as usize).map_or(&[], Vec::as_slice)
    }

    /// Creates a synapse from `presynaptic_cell` onto `segment`.
    ///
    /// While the segment is at capacity its weakest synapse is destroyed first.
    /// The permanence is clamped to `[syn_perm_min, syn_perm_max]`.
    pub fn create_synapse(&mut self, segment: Segment, presynaptic_cell: CellIdx, permanence: Permanence) -> Result<Synapse> {
        self.segment(segment)?;
        if presynaptic_cell as usize >= self.num_cells() {
            return Err(CorticalError::IndexOutOfBounds {
                index: presynaptic_cell as usize,
                size: self.num_cells(),
            });
        }

        while self.segment(segment)?.num_synapses() >= self.config.max_synapses_per_segment {
            let Some(weakest) = self.min_permanence_synapse(segment) else { break };
            log::debug!("evicting synapse {weakest} from segment {segment} (minimum permanence)");
            self.destroy_synapse(weakest, segment)?;
        }

        let ordinal = self.next_synapse_ordinal;
        self.next_synapse_ordinal += 1;
        let data = SynapseData::distal(
            presynaptic_cell,
            segment,
            ordinal,
            self.clamp_permanence(permanence),
        );

        let synapse = if let Some(reuse) = self.free_synapses.pop() {
            self.synapses[reuse as usize] = data;
            reuse
        } else {
            self.synapses.push(data);
            (self.synapses.len() - 1) as Synapse
        };

        self.segment_mut(segment)?.synapses.push(synapse);
        self.receptor_synapses[presynaptic_cell as usize].push(synapse);
        self.num_synapses += 1;

        Ok(synapse)
    }

    /// Destroys a synapse of `segment`.
    pub fn destroy_synapse(&mut self, synapse: Synapse, segment: Segment) -> Result<()> {
        let owner = self.synapse(synapse)?.segment_index;
        if owner != segment {
            return Err(CorticalError::InvalidHandle(format!(
                "synapse {synapse} belongs to segment {owner}, not {segment}"
            )));
        }

        self.segment_mut(segment)?.synapses.retain(|s| *s != synapse);
        self.release_synapse(synapse);
        Ok(())
    }

    /// Removes a synapse from the receptor index and frees its slot.
    fn release_synapse(&mut self, synapse: Synapse) {
        let data = &mut self.synapses[synapse as usize];
        data.destroyed = true;
        if let Some(source) = data.source_cell {
            let receptors = &mut self.receptor_synapses[source as usize];
            if let Some(pos) = receptors.iter().position(|&s| s == synapse) {
                receptors.swap_remove(pos);
            }
        }
        self.free_synapses.push(synapse);
        self.num_synapses -= 1;
    }

    /// Sets a synapse's permanence, clamped to `[syn_perm_min, syn_perm_max]`.
    pub fn update_synapse_permanence(&mut self, synapse: Synapse, permanence: Permanence) -> Result<()> {
        self.synapse(synapse)?;
        self.synapses[synapse as usize].permanence = self.clamp_permanence(permanence);
        Ok(())
    }

    #[inline]
    fn clamp_permanence(&self, permanence: Permanence) -> Permanence {
        permanence.clamp(self.config.syn_perm_min, self.config.syn_perm_max)
    }

    /// The first synapse of `segment` with the smallest permanence, ignoring
    /// differences below [`EPSILON`].
    pub fn min_permanence_synapse(&self, segment: Segment) -> Option<Synapse> {
        let mut min: Option<(Synapse, Permanence)> = None;
        for &synapse in self.segment(segment).ok()?.synapses() {
            let data = &self.synapses[synapse as usize];
            if data.destroyed {
                continue;
            }
            if min.map_or(true, |(_, m)| data.permanence < m - EPSILON) {
                min = Some((synapse, data.permanence));
            }
        }
        min.map(|(synapse, _)| synapse)
    }

    // ========================================================================
    // Activity computation
    // ========================================================================

    /// Tallies, for every segment, the synapses sourced from `active_cells`.
    ///
    /// A synapse counts as active when its permanence exceeds
    /// `connected_permanence - EPSILON`.
    pub fn compute_activity(&self, active_cells: &[CellIdx], connected_permanence: Permanence) -> SegmentActivity {
        let mut activity = SegmentActivity::new(self.segment_flat_list_len());
        self.tally_activity(active_cells, connected_permanence, &mut activity);
        activity
    }

    /// Adds the tallies of `active_cells` into `activity`.
    pub(crate) fn tally_activity(
        &self,
        active_cells: &[CellIdx],
        connected_permanence: Permanence,
        activity: &mut SegmentActivity,
    ) {
        let threshold = connected_permanence - EPSILON;
        for &cell in active_cells {
            for &synapse in self.receptor_synapses_of(cell) {
                let data = &self.synapses[synapse as usize];
                let segment = data.segment_index as usize;
                activity.potential_synapses[segment] += 1;
                if data.permanence > threshold {
                    activity.active_synapses[segment] += 1;
                }
            }
        }
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Number of live segments.
    pub fn num_segments(&self) -> usize {
        self.next_flat_index as usize - self.free_flat_indices.len()
    }

    /// Number of live synapses.
    #[inline]
    pub fn num_synapses(&self) -> usize {
        self.num_synapses
    }

    /// Length of the flat segment table (live and reclaimed slots).
    #[inline]
    pub fn segment_flat_list_len(&self) -> usize {
        self.next_flat_index as usize
    }

    /// Ordinal the next created segment will receive.
    #[inline]
    pub fn next_segment_ordinal(&self) -> u64 {
        self.next_segment_ordinal
    }

    /// Current temporal-memory iteration.
    #[inline]
    pub fn tm_iteration(&self) -> u64 {
        self.tm_iteration
    }

    // ========================================================================
    // Temporal-memory cycle state
    // ========================================================================

    /// Cells active in the last cycle.
    #[inline]
    pub fn active_cells(&self) -> &[CellIdx] {
        &self.active_cells
    }

    /// Winner cells of the last cycle.
    #[inline]
    pub fn winner_cells(&self) -> &[CellIdx] {
        &self.winner_cells
    }

    /// Active segments of the last cycle, sorted by [`DistalDendrite::sort_key`].
    #[inline]
    pub fn active_segments(&self) -> &[Segment] {
        &self.active_segments
    }

    /// Matching segments of the last cycle, sorted by [`DistalDendrite::sort_key`].
    #[inline]
    pub fn matching_segments(&self) -> &[Segment] {
        &self.matching_segments
    }

    /// Tallies of the last [`Connections::compute_activity`] used by learning.
    #[inline]
    pub fn last_activity(&self) -> &SegmentActivity {
        &self.last_activity
    }

    /// Cells predicted for the next cycle: parents of the active segments,
    /// deduplicated, in segment order.
    pub fn predictive_cells(&self) -> Vec<CellIdx> {
        predictive_cells_of(self, &self.active_segments)
    }

    pub(crate) fn set_active_cells(&mut self, active_cells: Vec<CellIdx>, winner_cells: Vec<CellIdx>) {
        self.active_cells = active_cells;
        self.winner_cells = winner_cells;
    }

    pub(crate) fn set_segment_state(
        &mut self,
        active_segments: Vec<Segment>,
        matching_segments: Vec<Segment>,
        activity: SegmentActivity,
    ) {
        self.active_segments = active_segments;
        self.matching_segments = matching_segments;
        self.last_activity = activity;
    }

    /// Clears active/winner cells and active/matching segments; learned
    /// structure is untouched.
    pub fn clear_cycle_state(&mut self) {
        self.active_cells.clear();
        self.winner_cells.clear();
        self.active_segments.clear();
        self.matching_segments.clear();
    }

    /// The network's random generator.
    pub(crate) fn random_mut(&mut self) -> &mut Random {
        &mut self.random
    }

    // ========================================================================
    // Spatial-pooler statistics
    // ========================================================================

    /// Overlap duty cycle of every column.
    #[inline]
    pub fn overlap_duty_cycles(&self) -> &[Real] {
        &self.overlap_duty_cycles
    }

    /// Replaces the overlap duty cycles.
    pub fn set_overlap_duty_cycles(&mut self, values: Vec<Real>) -> Result<()> {
        self.check_column_len(values.len())?;
        self.overlap_duty_cycles = values;
        Ok(())
    }

    /// Active duty cycle of every column.
    #[inline]
    pub fn active_duty_cycles(&self) -> &[Real] {
        &self.active_duty_cycles
    }

    /// Replaces the active duty cycles.
    pub fn set_active_duty_cycles(&mut self, values: Vec<Real>) -> Result<()> {
        self.check_column_len(values.len())?;
        self.active_duty_cycles = values;
        Ok(())
    }

    /// Minimum overlap duty cycle of every column.
    #[inline]
    pub fn min_overlap_duty_cycles(&self) -> &[Real] {
        &self.min_overlap_duty_cycles
    }

    /// Replaces the minimum overlap duty cycles.
    pub fn set_min_overlap_duty_cycles(&mut self, values: Vec<Real>) -> Result<()> {
        self.check_column_len(values.len())?;
        self.min_overlap_duty_cycles = values;
        Ok(())
    }

    /// Minimum active duty cycle of every column.
    #[inline]
    pub fn min_active_duty_cycles(&self) -> &[Real] {
        &self.min_active_duty_cycles
    }

    /// Replaces the minimum active duty cycles.
    pub fn set_min_active_duty_cycles(&mut self, values: Vec<Real>) -> Result<()> {
        self.check_column_len(values.len())?;
        self.min_active_duty_cycles = values;
        Ok(())
    }

    /// Boost factor of every column.
    #[inline]
    pub fn boost_factors(&self) -> &[Real] {
        &self.boost_factors
    }

    /// Replaces the boost factors.
    pub fn set_boost_factors(&mut self, values: Vec<Real>) -> Result<()> {
        self.check_column_len(values.len())?;
        self.boost_factors = values;
        Ok(())
    }

    /// Raw overlaps of the last spatial-pooler cycle.
    #[inline]
    pub fn overlaps(&self) -> &[u32] {
        &self.overlaps
    }

    /// Boosted overlaps of the last spatial-pooler cycle.
    #[inline]
    pub fn boosted_overlaps(&self) -> &[Real] {
        &self.boosted_overlaps
    }

    pub(crate) fn set_overlaps(&mut self, overlaps: Vec<u32>, boosted: Vec<Real>) {
        self.overlaps = overlaps;
        self.boosted_overlaps = boosted;
    }

    /// Current inhibition radius.
    #[inline]
    pub fn inhibition_radius(&self) -> usize {
        self.inhibition_radius
    }

    /// Sets the inhibition radius.
    pub fn set_inhibition_radius(&mut self, radius: usize) {
        self.inhibition_radius = radius;
    }

    /// Spatial-pooler iterations so far.
    #[inline]
    pub fn sp_iteration_num(&self) -> u64 {
        self.sp_iteration_num
    }

    /// Spatial-pooler learning iterations so far.
    #[inline]
    pub fn sp_iteration_learn_num(&self) -> u64 {
        self.sp_iteration_learn_num
    }

    pub(crate) fn update_bookkeeping(&mut self, learn: bool) {
        self.sp_iteration_num += 1;
        if learn {
            self.sp_iteration_learn_num += 1;
        }
    }

    fn check_column_len(&self, len: usize) -> Result<()> {
        if len == self.columns.len() {
            Ok(())
        } else {
            Err(CorticalError::InvalidDimensions(format!(
                "expected {} per-column values, got {len}",
                self.columns.len()
            )))
        }
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Verifies the structural invariants of the whole graph.
    ///
    /// Checks pool consistency, capacity limits, permanence bounds and that the
    /// receptor index agrees with the segments' synapse lists.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |message: String| Err(CorticalError::InternalError(message));

        for column in &self.columns {
            if !column.pool().is_consistent() {
                return fail(format!("column {} has connected inputs outside its pool", column.index()));
            }
            for synapse in column.pool().synapses() {
                if !(self.config.syn_perm_min..=self.config.syn_perm_max).contains(&synapse.permanence) {
                    return fail(format!(
                        "proximal permanence {} of column {} out of bounds",
                        synapse.permanence,
                        column.index()
                    ));
                }
            }
            for cell in column.cells() {
                if cell.segments().len() > self.config.max_segments_per_cell {
                    return fail(format!("cell {} exceeds its segment capacity", cell.index()));
                }
            }
        }

        let mut referenced = 0;
        for segment in self.segments.iter().flatten() {
            check_capacity(segment, self.config.max_synapses_per_segment).map_err(CorticalError::InternalError)?;
            for &synapse in segment.synapses() {
                let Some(data) = self.synapses.get(synapse as usize) else {
                    return fail(format!("segment {} holds unknown synapse {synapse}", segment.flat_index()));
                };
                if data.destroyed || data.segment_index != segment.flat_index() {
                    return fail(format!("segment {} holds a stale synapse {synapse}", segment.flat_index()));
                }
                if !(self.config.syn_perm_min..=self.config.syn_perm_max).contains(&data.permanence) {
                    return fail(format!("distal permanence {} out of bounds", data.permanence));
                }
                let source = data.source_cell.unwrap_or(u32::MAX) as usize;
                if !self.receptor_synapses.get(source).is_some_and(|r| r.contains(&synapse)) {
                    return fail(format!("synapse {synapse} missing from the receptor index"));
                }
                referenced += 1;
            }
        }

        for (cell, receptors) in self.receptor_synapses.iter().enumerate() {
            for &synapse in receptors {
                let sourced_here = self
                    .synapses
                    .get(synapse as usize)
                    .is_some_and(|data| !data.destroyed && data.source_cell == Some(cell as CellIdx));
                if !sourced_here {
                    return fail(format!("receptor index of cell {cell} holds a stale synapse {synapse}"));
                }
            }
        }

        if referenced != self.num_synapses {
            return fail(format!("{referenced} synapses referenced but {} counted", self.num_synapses));
        }
        Ok(())
    }
}

fn check_capacity<D: Dendrite>(dendrite: &D, capacity: usize) -> std::result::Result<(), String> {
    if dendrite.num_synapses() > capacity {
        Err(format!("segment {} exceeds its synapse capacity", dendrite.index()))
    } else {
        Ok(())
    }
}

impl Persist for Connections {
    const TYPE_NAME: &'static str = "Connections";

    fn persist<W: Write>(&self, w: &mut HtmWriter<W>) -> Result<()> {
        w.begin(Self::TYPE_NAME)?;
        self.config.persist(w)?;

        w.field("pools", self.columns.len())?;
        for column in &self.columns {
            let inputs: Vec<u32> = column.pool().potential_inputs().collect();
            w.record(
                "pool",
                &[column.index().to_string(), join(&inputs), join(&column.pool().sparse_permanences())],
            )?;
        }

        w.field("segment_slots", self.segments.len())?;
        for slot in &self.segments {
            match slot {
                Some(seg) => w.record(
                    "segment",
                    &[
                        seg.parent_cell().to_string(),
                        seg.last_used_iteration().to_string(),
                        seg.ordinal().to_string(),
                        join(seg.synapses()),
                    ],
                )?,
                None => w.field("segment", "-")?,
            }
        }
        w.list("free_flat_indices", &self.free_flat_indices)?;

        w.field("synapse_slots", self.synapses.len())?;
        for data in &self.synapses {
            w.record(
                "synapse",
                &[
                    fmt_opt(data.source_cell),
                    data.segment_index.to_string(),
                    data.synapse_index.to_string(),
                    data.permanence.to_string(),
                    data.destroyed.to_string(),
                ],
            )?;
        }
        w.list("free_synapses", &self.free_synapses)?;

        let receptors: Vec<(usize, &Vec<Synapse>)> =
            self.receptor_synapses.iter().enumerate().filter(|(_, r)| !r.is_empty()).collect();
        w.field("receptor_cells", receptors.len())?;
        for (cell, synapses) in receptors {
            w.record("receptors", &[cell.to_string(), join(synapses)])?;
        }

        w.field("next_segment_ordinal", self.next_segment_ordinal)?;
        w.field("next_synapse_ordinal", self.next_synapse_ordinal)?;
        w.field("tm_iteration", self.tm_iteration)?;

        w.list("active_cells", &self.active_cells)?;
        w.list("winner_cells", &self.winner_cells)?;
        w.list("active_segments", &self.active_segments)?;
        w.list("matching_segments", &self.matching_segments)?;
        w.list("last_active_synapses", &self.last_activity.active_synapses)?;
        w.list("last_potential_synapses", &self.last_activity.potential_synapses)?;

        w.list("overlap_duty_cycles", &self.overlap_duty_cycles)?;
        w.list("active_duty_cycles", &self.active_duty_cycles)?;
        w.list("min_overlap_duty_cycles", &self.min_overlap_duty_cycles)?;
        w.list("min_active_duty_cycles", &self.min_active_duty_cycles)?;
        w.list("boost_factors", &self.boost_factors)?;
        w.list("overlaps", &self.overlaps)?;
        w.list("boosted_overlaps", &self.boosted_overlaps)?;
        w.field("inhibition_radius", self.inhibition_radius)?;
        w.field("sp_iteration_num", self.sp_iteration_num)?;
        w.field("sp_iteration_learn_num", self.sp_iteration_learn_num)?;

        self.random.persist(w)?;
        w.end(Self::TYPE_NAME)
    }

    fn restore<R: BufRead>(r: &mut HtmReader<R>) -> Result<Self> {
        r.expect_begin(Self::TYPE_NAME)?;
        let config = HtmConfig::restore(r)?;
        let mut conn = Connections::new(config)?;

        let pools: usize = r.parse("pools")?;
        if pools != conn.columns.len() {
            return Err(r.error(format!("{pools} pools for {} columns", conn.columns.len())));
        }
        let connected = conn.config.syn_perm_connected;
        for column in &mut conn.columns {
            let parts = r.parse_record("pool")?;
            if parts.len() != 3 {
                return Err(r.error("pool needs column|inputs|permanences"));
            }
            let inputs: Vec<usize> = r.parse_elements(&parts[1])?;
            let perms: Vec<Permanence> = r.parse_elements(&parts[2])?;
            if inputs.len() != perms.len() || inputs.iter().any(|&i| i >= conn.input_topology.num_elements()) {
                return Err(r.error(format!("malformed pool of column {}", column.index())));
            }
            column.create_potential_pool(&inputs);
            column.set_permanences(&perms, connected);
        }

        let segment_slots: usize = r.parse("segment_slots")?;
        let mut live: Vec<DistalDendrite> = Vec::new();
        for flat in 0..segment_slots {
            let parts = r.parse_record("segment")?;
            if parts.len() == 1 && parts[0].trim() == "-" {
                conn.segments.push(None);
                continue;
            }
            if parts.len() != 4 {
                return Err(r.error("segment needs cell|last_used|ordinal|synapses"));
            }
            let cell: CellIdx = r.parse_value(&parts[0])?;
            if cell as usize >= conn.num_cells() {
                return Err(r.error(format!("segment on unknown cell {cell}")));
            }
            let mut segment = DistalDendrite::new(
                cell,
                flat as Segment,
                r.parse_value(&parts[1])?,
                r.parse_value(&parts[2])?,
            );
            segment.synapses = r.parse_elements::<Synapse>(&parts[3])?.into_iter().collect();
            live.push(segment.clone());
            conn.segments.push(Some(segment));
        }
        conn.next_flat_index = segment_slots as Segment;
        conn.free_flat_indices = r.parse_list("free_flat_indices")?;
        for &flat in &conn.free_flat_indices {
            if conn.segments.get(flat as usize).map_or(true, Option::is_some) {
                return Err(r.error(format!("free segment slot {flat} is not a reclaimed slot")));
            }
        }

        // Cells list their segments in creation order.
        live.sort_by_key(DistalDendrite::ordinal);
        for segment in &live {
            conn.cell_mut(segment.parent_cell())?.segments.push(segment.flat_index());
        }

        let synapse_slots: usize = r.parse("synapse_slots")?;
        for _ in 0..synapse_slots {
            let parts = r.parse_record("synapse")?;
            if parts.len() != 5 {
                return Err(r.error("synapse needs source|segment|ordinal|permanence|destroyed"));
            }
            let source: Option<CellIdx> = parse_opt(r, &parts[0])?;
            let mut data = SynapseData::distal(
                source.unwrap_or(0),
                r.parse_value(&parts[1])?,
                r.parse_value(&parts[2])?,
                r.parse_value(&parts[3])?,
            );
            data.source_cell = source;
            data.destroyed = r.parse_value(&parts[4])?;
            if !data.destroyed {
                let known_source = source.is_some_and(|cell| (cell as usize) < conn.num_cells());
                if !known_source || data.segment_index as usize >= segment_slots {
                    return Err(r.error(format!("synapse {} points outside the graph", conn.synapses.len())));
                }
                conn.num_synapses += 1;
            }
            conn.synapses.push(data);
        }
        for segment in &live {
            if let Some(bad) = segment.synapses().iter().find(|&&s| s as usize >= synapse_slots) {
                return Err(r.error(format!("segment {} holds unknown synapse {bad}", segment.flat_index())));
            }
        }
        conn.free_synapses = r.parse_list("free_synapses")?;
        for &synapse in &conn.free_synapses {
            if !conn.synapses.get(synapse as usize).is_some_and(|data| data.destroyed) {
                return Err(r.error(format!("free synapse slot {synapse} is not destroyed")));
            }
        }

        let receptor_cells: usize = r.parse("receptor_cells")?;
        for _ in 0..receptor_cells {
            let parts = r.parse_record("receptors")?;
            if parts.len() != 2 {
                return Err(r.error("receptors needs cell|synapses"));
            }
            let cell: usize = r.parse_value(&parts[0])?;
            let synapses: Vec<Synapse> = r.parse_elements(&parts[1])?;
            if let Some(bad) = synapses.iter().find(|&&s| s as usize >= synapse_slots) {
                return Err(r.error(format!("receptors of cell {cell} hold unknown synapse {bad}")));
            }
            match conn.receptor_synapses.get_mut(cell) {
                Some(slot) => *slot = synapses,
                None => return Err(r.error(format!("receptors of unknown cell {cell}"))),
            }
        }

        conn.next_segment_ordinal = r.parse("next_segment_ordinal")?;
        conn.next_synapse_ordinal = r.parse("next_synapse_ordinal")?;
        conn.tm_iteration = r.parse("tm_iteration")?;

        conn.active_cells = r.parse_list("active_cells")?;
        conn.winner_cells = r.parse_list("winner_cells")?;
        conn.active_segments = r.parse_list("active_segments")?;
        conn.matching_segments = r.parse_list("matching_segments")?;
        let num_cells = conn.num_cells();
        if conn.active_cells.iter().chain(&conn.winner_cells).any(|&cell| cell as usize >= num_cells) {
            return Err(r.error("cycle state names an unknown cell"));
        }
        let is_live = |segment: &Segment| conn.segments.get(*segment as usize).is_some_and(Option::is_some);
        if !conn.active_segments.iter().chain(&conn.matching_segments).all(is_live) {
            return Err(r.error("cycle state names a reclaimed segment"));
        }
        conn.last_activity = SegmentActivity {
            active_synapses: r.parse_list("last_active_synapses")?,
            potential_synapses: r.parse_list("last_potential_synapses")?,
        };

        let overlap_duty_cycles = r.parse_list("overlap_duty_cycles")?;
        conn.set_overlap_duty_cycles(overlap_duty_cycles)?;
        let active_duty_cycles = r.parse_list("active_duty_cycles")?;
        conn.set_active_duty_cycles(active_duty_cycles)?;
        let min_overlap_duty_cycles = r.parse_list("min_overlap_duty_cycles")?;
        conn.set_min_overlap_duty_cycles(min_overlap_duty_cycles)?;
        let min_active_duty_cycles = r.parse_list("min_active_duty_cycles")?;
        conn.set_min_active_duty_cycles(min_active_duty_cycles)?;
        let boost_factors = r.parse_list("boost_factors")?;
        conn.set_boost_factors(boost_factors)?;
        conn.overlaps = r.parse_list("overlaps")?;
        conn.boosted_overlaps = r.parse_list("boosted_overlaps")?;
        conn.inhibition_radius = r.parse("inhibition_radius")?;
        conn.sp_iteration_num = r.parse("sp_iteration_num")?;
        conn.sp_iteration_learn_num = r.parse("sp_iteration_learn_num")?;

        conn.random = Random::restore(r)?;
        r.expect_end(Self::TYPE_NAME)?;

        conn.check_invariants()
            .map_err(|e| r.error(format!("restored graph is inconsistent: {e}")))?;
        Ok(conn)
    }
}

/// Parents of `segments`, deduplicated, in segment order.
///
/// `segments` must be sorted by cell.
pub(crate) fn predictive_cells_of(conn: &Connections, segments: &[Segment]) -> Vec<CellIdx> {
    let mut cells: Vec<CellIdx> = Vec::new();
    for &segment in segments {
        if let Ok(seg) = conn.segment(segment) {
            let cell = seg.parent_cell();
            if cells.last() != Some(&cell) {
                cells.push(cell);
            }
        }
    }
    cells
}
