//! Temporal Memory implementation.
//!
//! The Temporal Memory learns sequences of active-column sets by growing
//! distal segments between cells. Each cycle it activates cells in the
//! columns chosen by the spatial pooler, using the predictions of the previous
//! cycle, and then computes which segments (and therefore which cells) predict
//! the next input.
//!
//! All state lives in [`Connections`]. A cycle has two phases:
//!
//! 1. A read-only planning phase decides, per column, what to do with it
//!    (see [`ColumnPlan`]). This phase runs on the configured executor.
//! 2. The plans are applied in column order on the calling thread, so random
//!    draws and structural changes happen in the same order for every
//!    executor.

use crate::algorithms::connections::SegmentActivity;
use crate::algorithms::execution::{ActivityExecutor, Sequential};
use crate::algorithms::Connections;
use crate::error::{CorticalError, Result};
use crate::types::{CellIdx, ColumnIdx, Permanence, Segment, EPSILON};
use std::collections::BTreeMap;

/// Outcome of one [`TemporalMemory::compute`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeCycle {
    /// Cells activated by this cycle's input, ascending.
    pub active_cells: Vec<CellIdx>,
    /// Cells chosen to represent the input in context, ascending.
    pub winner_cells: Vec<CellIdx>,
    /// Segments that are active for the next cycle.
    pub active_segments: Vec<Segment>,
    /// Segments that are matching for the next cycle.
    pub matching_segments: Vec<Segment>,
    predictive_cells: Vec<CellIdx>,
}

impl ComputeCycle {
    fn capture(conn: &Connections) -> Self {
        Self {
            active_cells: conn.active_cells().to_vec(),
            winner_cells: conn.winner_cells().to_vec(),
            active_segments: conn.active_segments().to_vec(),
            matching_segments: conn.matching_segments().to_vec(),
            predictive_cells: conn.predictive_cells(),
        }
    }

    /// Cells predicted for the next cycle.
    pub fn predictive_cells(&self) -> &[CellIdx] {
        &self.predictive_cells
    }

    /// Columns that contain at least one predictive cell.
    pub fn predictive_columns(&self, cells_per_column: usize) -> Vec<ColumnIdx> {
        let mut columns: Vec<ColumnIdx> = self
            .predictive_cells
            .iter()
            .map(|&cell| (cell as usize / cells_per_column) as ColumnIdx)
            .collect();
        columns.dedup();
        columns
    }
}

/// Everything the previous cycle knows about one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroup {
    /// The column.
    pub column: ColumnIdx,
    /// Whether the column is active in this cycle.
    pub is_active: bool,
    /// Active segments of the column's cells.
    pub active_segments: Vec<Segment>,
    /// Matching segments of the column's cells.
    pub matching_segments: Vec<Segment>,
}

/// What learning will do with a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPlan {
    /// Active column with active segments: their cells fire and learn.
    Predicted {
        /// The active segments, by cell.
        segments: Vec<Segment>,
    },
    /// Unpredicted column whose best matching segment learns.
    BurstMatching {
        /// Matching segment with the largest potential tally.
        best_segment: Segment,
    },
    /// Unpredicted column without matching segments: a new segment is grown on
    /// one of the least used cells.
    BurstUnused {
        /// Cells with the fewest segments.
        candidates: Vec<CellIdx>,
    },
    /// Inactive column whose matching segments are punished.
    Punish {
        /// The matching segments.
        segments: Vec<Segment>,
    },
    /// Nothing to do.
    Idle,
}

/// The Temporal Memory algorithm.
///
/// # Example
///
/// ```rust
/// use cortical::algorithms::{Connections, HtmConfig, TemporalMemory};
///
/// let mut config = HtmConfig::new(&[32], &[64]);
/// config.cells_per_column = 4;
/// config.activation_threshold = 2;
/// config.min_threshold = 2;
/// config.initial_permanence = 0.6;
/// let mut mem = Connections::new(config).unwrap();
/// let tm = TemporalMemory::init(&mut mem).unwrap();
///
/// let a = [1, 5, 9];
/// let b = [20, 30, 40];
/// for _ in 0..3 {
///     tm.compute(&mut mem, &a, true).unwrap();
///     tm.compute(&mut mem, &b, true).unwrap();
///     tm.reset(&mut mem);
/// }
///
/// let cycle = tm.compute(&mut mem, &a, false).unwrap();
/// assert_eq!(cycle.predictive_columns(4), vec![20, 30, 40]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemporalMemory<E: ActivityExecutor = Sequential> {
    executor: E,
}

impl TemporalMemory<Sequential> {
    /// Creates a single-threaded temporal memory for `conn`.
    pub fn init(conn: &mut Connections) -> Result<Self> {
        Self::with_executor(conn, Sequential)
    }
}

impl<E: ActivityExecutor> TemporalMemory<E> {
    /// Validates the temporal-memory parameters of `conn` and clears its cycle
    /// state.
    pub fn with_executor(conn: &mut Connections, executor: E) -> Result<Self> {
        conn.config().validate()?;
        conn.clear_cycle_state();
        log::info!(
            "temporal memory initialized: {} columns x {} cells",
            conn.num_columns(),
            conn.cells_per_column()
        );
        Ok(Self { executor })
    }

    /// The execution strategy.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs one cycle.
    ///
    /// `active_columns` may be unsorted and contain duplicates.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfBounds` for a column outside the column space.
    pub fn compute(&self, conn: &mut Connections, active_columns: &[ColumnIdx], learn: bool) -> Result<ComputeCycle> {
        let mut columns = active_columns.to_vec();
        columns.sort_unstable();
        columns.dedup();
        if let Some(&last) = columns.last() {
            if last as usize >= conn.num_columns() {
                return Err(CorticalError::IndexOutOfBounds {
                    index: last as usize,
                    size: conn.num_columns(),
                });
            }
        }

        self.activate_cells(conn, &columns, learn)?;
        self.activate_dendrites(conn, learn)?;
        Ok(ComputeCycle::capture(conn))
    }

    /// Activates the cells of `active_columns` (sorted, unique) from the
    /// previous cycle's predictions and, when `learn` is set, adapts and grows
    /// segments.
    pub fn activate_cells(&self, conn: &mut Connections, active_columns: &[ColumnIdx], learn: bool) -> Result<()> {
        let mut prev_active = conn.active_cells().to_vec();
        prev_active.sort_unstable();
        let mut prev_winners = conn.winner_cells().to_vec();
        prev_winners.sort_unstable();

        let groups = group_columns(conn, active_columns);
        let plans = self.executor.plan_columns(conn, &groups);

        let mut active_cells = Vec::new();
        let mut winner_cells = Vec::new();

        for (group, plan) in groups.iter().zip(plans) {
            match plan {
                ColumnPlan::Predicted { segments } => {
                    for segment in segments {
                        let cell = conn.segment(segment)?.parent_cell();
                        if active_cells.last() != Some(&cell) {
                            active_cells.push(cell);
                            winner_cells.push(cell);
                        }
                        if learn {
                            reinforce(conn, segment, &prev_active, &prev_winners)?;
                        }
                    }
                }
                ColumnPlan::BurstMatching { best_segment } => {
                    active_cells.extend(conn.cells_of_column(group.column));
                    winner_cells.push(conn.segment(best_segment)?.parent_cell());
                    if learn {
                        reinforce(conn, best_segment, &prev_active, &prev_winners)?;
                    }
                }
                ColumnPlan::BurstUnused { candidates } => {
                    active_cells.extend(conn.cells_of_column(group.column));
                    let pick = conn.random_mut().get_usize(candidates.len());
                    let winner = candidates[pick];
                    winner_cells.push(winner);

                    let max_new = conn.config().max_new_synapse_count as usize;
                    let n_grow = max_new.min(prev_winners.len());
                    if learn && n_grow > 0 {
                        let segment = conn.create_distal_segment(winner)?;
                        grow_synapses(conn, segment, &prev_winners, n_grow)?;
                    }
                }
                ColumnPlan::Punish { segments } => {
                    let decrement = conn.config().predicted_segment_decrement;
                    if learn && decrement > 0.0 {
                        for segment in segments {
                            adapt_segment(conn, segment, &prev_active, -decrement, 0.0)?;
                        }
                    }
                }
                ColumnPlan::Idle => {}
            }
        }

        conn.set_active_cells(active_cells, winner_cells);
        Ok(())
    }

    /// Computes the active and matching segments for the current active
    /// cells. When `learn` is set, active segments are marked as used and
    /// the iteration clock advances.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHandle` if an active segment cannot be recorded.
    pub fn activate_dendrites(&self, conn: &mut Connections, learn: bool) -> Result<()> {
        let config = conn.config();
        let (activation_threshold, min_threshold) = (config.activation_threshold, config.min_threshold);
        let activity = self
            .executor
            .compute_activity(conn, conn.active_cells(), config.connected_permanence);

        let mut active_segments = Vec::new();
        let mut matching_segments = Vec::new();
        for segment in 0..conn.segment_flat_list_len() as Segment {
            if !conn.is_live_segment(segment) {
                continue;
            }
            if activity.active(segment) >= activation_threshold {
                active_segments.push(segment);
            }
            if activity.potential(segment) >= min_threshold {
                matching_segments.push(segment);
            }
        }
        sort_segments(conn, &mut active_segments);
        sort_segments(conn, &mut matching_segments);

        if learn {
            for &segment in &active_segments {
                conn.record_segment_activity(segment)?;
            }
            conn.start_new_iteration();
        }

        log::trace!(
            "{} active cells, {} active and {} matching segments",
            conn.active_cells().len(),
            active_segments.len(),
            matching_segments.len()
        );
        conn.set_segment_state(active_segments, matching_segments, activity);
        Ok(())
    }

    /// Forgets the current sequence: clears active/winner cells and
    /// active/matching segments, keeping every learned synapse.
    pub fn reset(&self, conn: &mut Connections) {
        conn.clear_cycle_state();
    }
}

/// Fraction of active columns that were not predicted.
///
/// Both slices must be sorted. An empty active set scores 0.
pub fn anomaly_score(active_columns: &[ColumnIdx], predictive_columns: &[ColumnIdx]) -> f64 {
    if active_columns.is_empty() {
        return 0.0;
    }
    let predicted = active_columns
        .iter()
        .filter(|c| predictive_columns.binary_search(c).is_ok())
        .count();
    (active_columns.len() - predicted) as f64 / active_columns.len() as f64
}

/// Joins the sorted active columns with the previous cycle's segments.
///
/// Every column that is active or owns a matching segment yields one group,
/// in column order.
fn group_columns(conn: &Connections, active_columns: &[ColumnIdx]) -> Vec<ColumnGroup> {
    let mut groups: BTreeMap<ColumnIdx, ColumnGroup> = BTreeMap::new();

    for &column in active_columns {
        group_of(&mut groups, column).is_active = true;
    }
    for &segment in conn.active_segments() {
        if let Ok(seg) = conn.segment(segment) {
            let column = conn.column_of_cell(seg.parent_cell());
            if active_columns.binary_search(&column).is_ok() {
                group_of(&mut groups, column).active_segments.push(segment);
            }
        }
    }
    for &segment in conn.matching_segments() {
        if let Ok(seg) = conn.segment(segment) {
            let column = conn.column_of_cell(seg.parent_cell());
            group_of(&mut groups, column).matching_segments.push(segment);
        }
    }

    groups.into_values().collect()
}

fn group_of(groups: &mut BTreeMap<ColumnIdx, ColumnGroup>, column: ColumnIdx) -> &mut ColumnGroup {
    groups.entry(column).or_insert_with(|| ColumnGroup {
        column,
        is_active: false,
        active_segments: Vec::new(),
        matching_segments: Vec::new(),
    })
}

/// Decides what learning does with one column. Reads `conn` only.
pub(crate) fn plan_column(conn: &Connections, group: &ColumnGroup) -> ColumnPlan {
    if group.is_active {
        if !group.active_segments.is_empty() {
            return ColumnPlan::Predicted {
                segments: group.active_segments.clone(),
            };
        }
        if let Some(best_segment) = best_matching_segment(conn.last_activity(), &group.matching_segments) {
            return ColumnPlan::BurstMatching { best_segment };
        }
        return ColumnPlan::BurstUnused {
            candidates: least_used_cells(conn, group.column),
        };
    }

    if group.matching_segments.is_empty() {
        ColumnPlan::Idle
    } else {
        ColumnPlan::Punish {
            segments: group.matching_segments.clone(),
        }
    }
}

/// Matching segment with the strictly largest potential tally; the first
/// one wins ties.
fn best_matching_segment(activity: &SegmentActivity, matching: &[Segment]) -> Option<Segment> {
    let mut best: Option<(Segment, u32)> = None;
    for &segment in matching {
        let potential = activity.potential(segment);
        if best.map_or(true, |(_, b)| potential > b) {
            best = Some((segment, potential));
        }
    }
    best.map(|(segment, _)| segment)
}

/// Cells of `column` holding the fewest segments, ascending.
fn least_used_cells(conn: &Connections, column: ColumnIdx) -> Vec<CellIdx> {
    let cells = conn.cells_of_column(column);
    let fewest = cells.clone().map(|c| conn.num_segments_of(c)).min().unwrap_or(0);
    cells.filter(|&c| conn.num_segments_of(c) == fewest).collect()
}

/// Adapts a segment towards the previous active cells and grows it towards
/// the previous winners.
fn reinforce(conn: &mut Connections, segment: Segment, prev_active: &[CellIdx], prev_winners: &[CellIdx]) -> Result<()> {
    let config = conn.config();
    let (inc, dec) = (config.permanence_increment, config.permanence_decrement);
    let max_new = config.max_new_synapse_count;
    let potential = conn.last_activity().potential(segment);

    adapt_segment(conn, segment, prev_active, inc, dec)?;

    if !conn.is_live_segment(segment) {
        return Ok(());
    }
    let n_grow = max_new.saturating_sub(potential) as usize;
    if n_grow > 0 {
        grow_synapses(conn, segment, prev_winners, n_grow)?;
    }
    Ok(())
}

/// Raises the permanence of synapses from `prev_active` (sorted) by
/// `increment` and lowers the rest by `decrement`.
///
/// Synapses that fall below [`EPSILON`] are destroyed, and the segment too
/// once it has no synapses left.
pub fn adapt_segment(
    conn: &mut Connections,
    segment: Segment,
    prev_active: &[CellIdx],
    increment: Permanence,
    decrement: Permanence,
) -> Result<()> {
    let synapses = conn.synapses_of(segment)?.to_vec();
    for synapse in synapses {
        let data = conn.synapse(synapse)?;
        let was_active = data
            .source_cell
            .is_some_and(|cell| prev_active.binary_search(&cell).is_ok());
        let permanence = if was_active {
            data.permanence + increment
        } else {
            data.permanence - decrement
        };

        if permanence < EPSILON {
            conn.destroy_synapse(synapse, segment)?;
        } else {
            conn.update_synapse_permanence(synapse, permanence)?;
        }
    }

    if conn.synapses_of(segment)?.is_empty() {
        log::trace!("destroying segment {segment}: no synapses left");
        conn.destroy_segment(segment)?;
    }
    Ok(())
}

/// Grows up to `n` synapses from randomly chosen `prev_winners` (sorted) that
/// the segment is not yet connected to.
pub fn grow_synapses(conn: &mut Connections, segment: Segment, prev_winners: &[CellIdx], n: usize) -> Result<()> {
    let mut connected = Vec::new();
    for &synapse in conn.synapses_of(segment)? {
        if let Some(cell) = conn.synapse(synapse)?.source_cell {
            connected.push(cell);
        }
    }

    let candidates: Vec<CellIdx> = prev_winners
        .iter()
        .copied()
        .filter(|cell| !connected.contains(cell))
        .collect();
    let n = n.min(candidates.len());
    if n == 0 {
        return Ok(());
    }

    let permanence = conn.config().initial_permanence;
    let chosen = conn.random_mut().sample(candidates, n);
    for cell in chosen {
        conn.create_synapse(segment, cell, permanence)?;
    }
    Ok(())
}

fn sort_segments(conn: &Connections, segments: &mut [Segment]) {
    segments.sort_by_key(|&s| conn.segment(s).map_or((CellIdx::MAX, u64::MAX), |seg| seg.sort_key()));
}
