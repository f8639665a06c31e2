//! Spatial Pooler implementation.
//!
//! The Spatial Pooler turns a binary input vector into a sparse set of active
//! columns. Each column watches a random subset of the input (its potential
//! pool); the columns whose connected synapses see the most active input bits
//! win an inhibition competition. While learning, winners reinforce the
//! synapses that matched the input, duty cycles track how often each column
//! overlaps and fires, and boosting pushes columns that rarely fire back into
//! the competition.
//!
//! All state lives in [`Connections`]; the pooler itself only carries its
//! execution strategy and an optional [`HomeostaticPlasticityController`].

use crate::algorithms::execution::{ColumnExecutor, Sequential};
use crate::algorithms::{Connections, HomeostaticPlasticityController, HtmConfig};
use crate::entities::Column;
use crate::error::{CorticalError, Result};
use crate::persistence::{HtmReader, HtmWriter, Persist};
use crate::types::{ColumnIdx, Permanence, Real};
use crate::utils::{Random, Topology, WrappingMode};
use std::io::{BufRead, Write};
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The Spatial Pooler algorithm.
///
/// # Example
///
/// ```rust
/// use cortical::algorithms::{Connections, HtmConfig, SpatialPooler};
///
/// let mut config = HtmConfig::new(&[100], &[200]);
/// config.potential_radius = -1;
/// config.stimulus_threshold = 1.0;
/// config.num_active_columns_per_inh_area = 10.0;
///
/// let mut mem = Connections::new(config).unwrap();
/// let mut sp = SpatialPooler::init(&mut mem).unwrap();
///
/// let mut input = vec![0u8; 100];
/// for bit in [1, 5, 10, 20, 30, 40, 55, 70, 85, 99] {
///     input[bit] = 1;
/// }
/// let active = sp.compute(&mut mem, &input, true).unwrap();
/// assert!(active.len() <= 10);
/// assert!(active.windows(2).all(|w| w[0] < w[1]));
/// ```
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(bound = ""))]
pub struct SpatialPooler<E: ColumnExecutor = Sequential> {
    #[cfg_attr(feature = "serde", serde(skip))]
    executor: E,
    homeostatic: Option<HomeostaticPlasticityController>,
}

impl SpatialPooler<Sequential> {
    /// Initializes every column of `conn` and returns a single-threaded pooler.
    pub fn init(conn: &mut Connections) -> Result<Self> {
        Self::with_executor(conn, Sequential)
    }
}

impl<E: ColumnExecutor> SpatialPooler<E> {
    /// Initializes every column of `conn`: potential pool, initial permanences
    /// (raised until each column can reach the stimulus threshold) and the
    /// inhibition radius.
    pub fn with_executor(conn: &mut Connections, executor: E) -> Result<Self> {
        conn.config().validate()?;

        let (config, column_topology, input_topology, columns) = conn.column_workspace();
        executor.init_columns(config, column_topology, input_topology, columns)?;

        let sp = Self {
            executor,
            homeostatic: None,
        };
        sp.update_inhibition_radius(conn);

        log::info!(
            "spatial pooler initialized: {} columns over {} inputs, inhibition radius {}",
            conn.num_columns(),
            conn.num_inputs(),
            conn.inhibition_radius()
        );
        Ok(sp)
    }

    /// The execution strategy.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Attaches a controller that watches every subsequent cycle.
    pub fn attach_homeostatic_controller(&mut self, controller: HomeostaticPlasticityController) {
        self.homeostatic = Some(controller);
    }

    /// Removes and returns the attached controller.
    pub fn detach_homeostatic_controller(&mut self) -> Option<HomeostaticPlasticityController> {
        self.homeostatic.take()
    }

    /// The attached controller, if any.
    pub fn homeostatic_controller(&self) -> Option<&HomeostaticPlasticityController> {
        self.homeostatic.as_ref()
    }

    /// Runs one cycle.
    ///
    /// # Arguments
    ///
    /// * `conn` - Network state
    /// * `input` - Dense binary input, one entry per input bit (non-zero is active)
    /// * `learn` - Whether to adapt permanences, duty cycles and boosting
    ///
    /// # Returns
    ///
    /// The indices of the active columns in ascending order.
    pub fn compute(&mut self, conn: &mut Connections, input: &[u8], learn: bool) -> Result<Vec<ColumnIdx>> {
        check_input(conn, input)?;
        conn.update_bookkeeping(learn);

        let overlaps = self
            .executor
            .compute_overlaps(conn.columns(), input, conn.config().stimulus_threshold);

        let boosted: Vec<Real> = if learn {
            overlaps
                .iter()
                .zip(conn.boost_factors())
                .map(|(&o, &b)| f64::from(o) * b)
                .collect()
        } else {
            overlaps.iter().map(|&o| f64::from(o)).collect()
        };

        let active_columns = self.inhibit_columns(conn, &boosted);

        if learn {
            self.adapt_synapses(conn, input, &active_columns)?;
            self.update_duty_cycles(conn, &overlaps, &active_columns);
            self.bump_up_weak_columns(conn)?;
            self.update_boost_factors(conn);

            if conn.sp_iteration_num() % u64::from(conn.config().update_period) == 0 {
                self.update_inhibition_radius(conn);
                self.update_min_duty_cycles(conn);
            }
        }

        conn.set_overlaps(overlaps, boosted);

        if let Some(controller) = self.homeostatic.as_mut() {
            let mut dense = vec![0u8; conn.num_columns()];
            for &column in &active_columns {
                dense[column as usize] = 1;
            }
            controller.compute(conn.config_mut(), input, &dense);
        }

        log::trace!(
            "spatial pooler cycle {}: {} active columns",
            conn.sp_iteration_num(),
            active_columns.len()
        );
        Ok(active_columns)
    }

    // ========================================================================
    // Inhibition
    // ========================================================================

    /// Selects the winning columns for the given (boosted) overlaps.
    ///
    /// Global inhibition runs when it is configured or when the inhibition
    /// radius already spans the column space; otherwise local inhibition.
    pub fn inhibit_columns(&self, conn: &Connections, overlaps: &[Real]) -> Vec<ColumnIdx> {
        let density = inhibition_density(conn);
        let max_dimension = conn.column_topology().dimensions().iter().copied().max().unwrap_or(0);

        if conn.config().global_inhibition || conn.inhibition_radius() > max_dimension {
            self.inhibit_columns_global(conn, overlaps, density)
        } else {
            self.inhibit_columns_local(conn, overlaps, density)
        }
    }

    /// Keeps the `density * num_columns` columns with the largest overlaps,
    /// dropping those below the stimulus threshold.
    ///
    /// Among equal overlaps the higher column index wins.
    pub fn inhibit_columns_global(&self, conn: &Connections, overlaps: &[Real], density: f64) -> Vec<ColumnIdx> {
        let num_active = (density * conn.num_columns() as f64) as usize;
        let stimulus = conn.config().stimulus_threshold;

        let mut ranked: Vec<usize> = (0..overlaps.len()).collect();
        ranked.sort_by(|&a, &b| overlaps[a].total_cmp(&overlaps[b]));

        let mut winners: Vec<ColumnIdx> = ranked[ranked.len().saturating_sub(num_active)..]
            .iter()
            .filter(|&&c| is_eligible(overlaps[c], stimulus))
            .map(|&c| c as ColumnIdx)
            .collect();
        winners.sort_unstable();
        winners
    }

    /// Lets every eligible column compete with its neighborhood.
    ///
    /// A column wins when fewer than `0.5 + density * neighborhood_size` of its
    /// neighbors (itself included) have a larger overlap. Each winner's overlap
    /// is nudged up by a small delta so that later neighbors with an equal
    /// overlap lose the tie.
    pub fn inhibit_columns_local(&self, conn: &Connections, overlaps: &[Real], density: f64) -> Vec<ColumnIdx> {
        let config = conn.config();
        let max_overlap = overlaps.iter().copied().fold(0.0, f64::max);
        let winner_delta = if max_overlap > 0.0 { max_overlap / 1000.0 } else { 0.001 };
        let wrap = WrappingMode::from(config.wrap_around);
        let radius = conn.inhibition_radius();

        let mut tie_broken = overlaps.to_vec();
        let mut winners = Vec::new();

        for (column, &overlap) in overlaps.iter().enumerate() {
            if !is_eligible(overlap, config.stimulus_threshold) {
                continue;
            }

            let neighborhood = conn.column_topology().neighborhood(column, radius, wrap);
            let num_bigger = neighborhood.iter().filter(|&&n| tie_broken[n] > overlap).count();
            let num_active = (0.5 + density * neighborhood.len() as f64) as usize;

            if num_bigger < num_active {
                winners.push(column as ColumnIdx);
                tie_broken[column] += winner_delta;
            }
        }

        winners
    }

    // ========================================================================
    // Learning
    // ========================================================================

    /// Reinforces the pools of the active columns: synapses onto active input
    /// bits gain `syn_perm_active_inc`, all others lose `syn_perm_inactive_dec`.
    pub fn adapt_synapses(&self, conn: &mut Connections, input: &[u8], active_columns: &[ColumnIdx]) -> Result<()> {
        self.adapt_column_range(conn, 0..conn.num_columns(), input, active_columns)
    }

    /// Moves the overlap and active duty cycles one step towards this cycle's
    /// values.
    pub fn update_duty_cycles(&self, conn: &mut Connections, overlaps: &[u32], active_columns: &[ColumnIdx]) {
        let period = u64::from(conn.config().duty_cycle_period)
            .min(conn.sp_iteration_num())
            .max(1) as f64;

        let mut active = vec![false; conn.num_columns()];
        for &column in active_columns {
            active[column as usize] = true;
        }

        for (dc, &overlap) in conn.overlap_duty_cycles.iter_mut().zip(overlaps) {
            *dc = moving_duty_cycle(*dc, overlap > 0, period);
        }
        for (dc, &is_active) in conn.active_duty_cycles.iter_mut().zip(&active) {
            *dc = moving_duty_cycle(*dc, is_active, period);
        }
    }

    /// Raises every permanence of columns whose overlap duty cycle fell below
    /// their minimum.
    pub fn bump_up_weak_columns(&self, conn: &mut Connections) -> Result<()> {
        let weak: Vec<usize> = conn
            .overlap_duty_cycles()
            .iter()
            .zip(conn.min_overlap_duty_cycles())
            .enumerate()
            .filter(|(_, (dc, min))| dc < min)
            .map(|(column, _)| column)
            .collect();

        let (config, _, _, columns) = conn.column_workspace();
        for column in weak {
            let column = &mut columns[column];
            let mut perms = column.pool().sparse_permanences();
            for perm in &mut perms {
                *perm += config.syn_perm_below_stimulus_inc;
            }
            column.update_permanences(&mut perms, config, true)?;
        }
        Ok(())
    }

    /// Recomputes the boost factors from the active duty cycles.
    ///
    /// A column at or above its minimum active duty cycle gets 1.0; below it
    /// the factor falls linearly from `max_boost` (never active) towards 1.0.
    /// With every minimum at zero no column is boosted.
    pub fn update_boost_factors(&self, conn: &mut Connections) {
        let max_boost = conn.config().max_boost;
        let factors: Vec<Real> = conn
            .active_duty_cycles()
            .iter()
            .zip(conn.min_active_duty_cycles())
            .map(|(&active, &min)| {
                if active >= min {
                    1.0
                } else {
                    (1.0 - max_boost) / min * active + max_boost
                }
            })
            .collect();
        conn.boost_factors = factors;
    }

    /// Recomputes the inhibition radius from the average connected span of
    /// the columns.
    pub fn update_inhibition_radius(&self, conn: &mut Connections) {
        let radius = if conn.config().global_inhibition {
            conn.column_topology().dimensions().iter().copied().max().unwrap_or(0)
        } else {
            let inputs = conn.input_topology();
            let total_span: f64 = conn.columns().iter().map(|c| c.connected_span(inputs)).sum();
            let avg_span = total_span / conn.num_columns() as f64;

            let diameter = avg_span * avg_columns_per_input(conn.column_topology(), inputs);
            let radius = ((diameter - 1.0) / 2.0).max(1.0);
            (radius + 0.5) as usize
        };

        if radius != conn.inhibition_radius() {
            log::debug!("inhibition radius {} -> {radius}", conn.inhibition_radius());
        }
        conn.set_inhibition_radius(radius);
    }

    /// Refreshes the minimum duty cycles as a percentage of the largest duty
    /// cycle, over the whole region or each column's neighborhood.
    pub fn update_min_duty_cycles(&self, conn: &mut Connections) {
        let config = conn.config();
        let (pct_overlap, pct_active) = (config.min_pct_overlap_duty_cycles, config.min_pct_active_duty_cycles);

        if config.global_inhibition || conn.inhibition_radius() > conn.num_inputs() {
            let max_overlap = conn.overlap_duty_cycles().iter().copied().fold(0.0, f64::max);
            let max_active = conn.active_duty_cycles().iter().copied().fold(0.0, f64::max);
            let n = conn.num_columns();
            conn.min_overlap_duty_cycles = vec![pct_overlap * max_overlap; n];
            conn.min_active_duty_cycles = vec![pct_active * max_active; n];
        } else {
            let topology = conn.column_topology();
            let radius = conn.inhibition_radius();
            let wrap = WrappingMode::from(config.wrap_around);
            let min_overlap =
                self.executor
                    .local_min_duty_cycles(topology, radius, wrap, conn.overlap_duty_cycles(), pct_overlap);
            let min_active =
                self.executor
                    .local_min_duty_cycles(topology, radius, wrap, conn.active_duty_cycles(), pct_active);
            conn.min_overlap_duty_cycles = min_overlap;
            conn.min_active_duty_cycles = min_active;
        }

        log::debug!("minimum duty cycles refreshed at iteration {}", conn.sp_iteration_num());
    }

    // ========================================================================
    // Column ranges
    // ========================================================================

    /// Overlaps of the columns in `range`, exactly as a full cycle computes
    /// them.
    pub fn compute_overlaps_for_range(&self, conn: &Connections, range: Range<usize>, input: &[u8]) -> Result<Vec<u32>> {
        check_input(conn, input)?;
        let columns = column_range(conn.columns(), &range)?;
        Ok(self
            .executor
            .compute_overlaps(columns, input, conn.config().stimulus_threshold))
    }

    /// Adapts the columns in `range` that appear in `active_columns`, exactly
    /// as a full learning cycle does.
    pub fn adapt_column_range(
        &self,
        conn: &mut Connections,
        range: Range<usize>,
        input: &[u8],
        active_columns: &[ColumnIdx],
    ) -> Result<()> {
        check_input(conn, input)?;
        column_range(conn.columns(), &range)?;

        let mut mask = vec![false; range.len()];
        for &column in active_columns {
            if range.contains(&(column as usize)) {
                mask[column as usize - range.start] = true;
            }
        }

        let (config, _, _, columns) = conn.column_workspace();
        self.executor.adapt_synapses(config, &mut columns[range], input, &mask)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of connected proximal synapses of every column.
    pub fn connected_counts(&self, conn: &Connections) -> Vec<usize> {
        conn.columns().iter().map(Column::connected_count).collect()
    }

    /// Permanences of a column over the whole input space (zero outside its pool).
    pub fn permanences_of(&self, conn: &Connections, column: ColumnIdx) -> Result<Vec<Permanence>> {
        Ok(conn.column(column)?.pool().dense_permanences(conn.num_inputs()))
    }
}

// ============================================================================
// Per-column work, shared by every execution strategy
// ============================================================================

/// Builds the pool and initial permanences of one column from the column's
/// own random stream.
pub(crate) fn init_column(
    config: &HtmConfig,
    column_topology: &Topology,
    input_topology: &Topology,
    column: &mut Column,
) -> Result<()> {
    let mut random = Random::with_stream(config.random_seed, u64::from(column.index()) + 1);

    let inputs = map_potential(config, column_topology, input_topology, column.index() as usize, &mut random);
    column.create_potential_pool(&inputs);

    let mut perms = init_permanences(config, inputs.len(), &mut random);
    column.update_permanences(&mut perms, config, true)
}

/// Samples the potential pool of a column: `round(potential_pct * n)` inputs
/// out of the `n` inputs within `potential_radius` of the column's natural
/// center. Returned in ascending order.
pub fn map_potential(
    config: &HtmConfig,
    column_topology: &Topology,
    input_topology: &Topology,
    column: usize,
    random: &mut Random,
) -> Vec<usize> {
    let center = Topology::map_column(column, column_topology, input_topology);
    let radius = usize::try_from(config.potential_radius).unwrap_or_else(|_| input_topology.num_elements());
    let field = input_topology.neighborhood(center, radius, config.wrap_around.into());

    let num_potential = (field.len() as f64 * config.potential_pct + 0.5) as usize;
    let mut pool = random.sample(field, num_potential);
    pool.sort_unstable();
    pool
}

/// Draws initial permanences for a pool of `len` synapses.
///
/// With probability `initial_synapse_conns_pct` a synapse starts connected,
/// uniformly in `[syn_perm_connected, syn_perm_max)`; otherwise uniformly in
/// `[0, syn_perm_connected)`. Values are truncated to five decimals and
/// zeroed below the trim threshold.
pub fn init_permanences(config: &HtmConfig, len: usize, random: &mut Random) -> Vec<Permanence> {
    (0..len)
        .map(|_| {
            let perm = if random.get_real64() <= config.initial_synapse_conns_pct {
                config.syn_perm_connected + (config.syn_perm_max - config.syn_perm_connected) * random.get_real64()
            } else {
                config.syn_perm_connected * random.get_real64()
            };
            let perm = ((perm * 100_000.0) as i64) as f64 / 100_000.0;
            if perm < config.syn_perm_trim_threshold {
                0.0
            } else {
                perm
            }
        })
        .collect()
}

/// One learning step of a single active column.
pub(crate) fn adapt_column(config: &HtmConfig, column: &mut Column, input: &[u8]) -> Result<()> {
    let mut perms = column.pool().sparse_permanences();
    for (perm, bit) in perms.iter_mut().zip(column.pool().potential_inputs()) {
        if input.get(bit as usize).is_some_and(|&b| b != 0) {
            *perm += config.syn_perm_active_inc;
        } else {
            *perm -= config.syn_perm_inactive_dec;
        }
    }
    column.update_permanences(&mut perms, config, true)
}

/// `pct` times the largest duty cycle in the neighborhood of `column`.
pub(crate) fn local_min_duty_cycle(
    topology: &Topology,
    column: usize,
    radius: usize,
    wrap: WrappingMode,
    duty_cycles: &[Real],
    pct: f64,
) -> Real {
    let max = topology
        .neighborhood(column, radius, wrap)
        .into_iter()
        .map(|n| duty_cycles[n])
        .fold(0.0, f64::max);
    pct * max
}

/// Target fraction of active columns inside one inhibition area.
pub fn inhibition_density(conn: &Connections) -> f64 {
    let config = conn.config();
    if config.local_area_density > 0.0 {
        return config.local_area_density;
    }

    let diameter = 2 * conn.inhibition_radius() + 1;
    let area = (0..conn.column_topology().num_dimensions())
        .try_fold(1usize, |area, _| area.checked_mul(diameter))
        .map_or(conn.num_columns(), |area| area.min(conn.num_columns()));

    (config.num_active_columns_per_inh_area / area as f64).min(config.max_inhibition_density)
}

/// Average over dimensions of columns per input bit.
fn avg_columns_per_input(columns: &Topology, inputs: &Topology) -> f64 {
    let ratios: Vec<f64> = columns
        .dimensions()
        .iter()
        .zip(inputs.dimensions())
        .map(|(&c, &i)| c as f64 / i as f64)
        .collect();
    if ratios.is_empty() {
        return 0.0;
    }
    ratios.iter().sum::<f64>() / ratios.len() as f64
}

fn moving_duty_cycle(duty_cycle: Real, value: bool, period: f64) -> Real {
    (duty_cycle * (period - 1.0) + if value { 1.0 } else { 0.0 }) / period
}

fn is_eligible(overlap: Real, stimulus_threshold: f64) -> bool {
    overlap >= stimulus_threshold && overlap > 0.0
}

fn check_input(conn: &Connections, input: &[u8]) -> Result<()> {
    if input.len() == conn.num_inputs() {
        Ok(())
    } else {
        Err(CorticalError::InputSizeMismatch {
            expected: conn.num_inputs(),
            actual: input.len(),
        })
    }
}

fn column_range<'a>(columns: &'a [Column], range: &Range<usize>) -> Result<&'a [Column]> {
    columns.get(range.clone()).ok_or(CorticalError::IndexOutOfBounds {
        index: range.end,
        size: columns.len(),
    })
}

impl<E: ColumnExecutor> Persist for SpatialPooler<E> {
    const TYPE_NAME: &'static str = "SpatialPooler";

    fn persist<W: Write>(&self, w: &mut HtmWriter<W>) -> Result<()> {
        w.begin(Self::TYPE_NAME)?;
        w.field("homeostatic", self.homeostatic.is_some())?;
        if let Some(controller) = &self.homeostatic {
            controller.persist(w)?;
        }
        w.end(Self::TYPE_NAME)
    }

    fn restore<R: BufRead>(r: &mut HtmReader<R>) -> Result<Self> {
        r.expect_begin(Self::TYPE_NAME)?;
        let homeostatic = if r.parse::<bool>("homeostatic")? {
            Some(HomeostaticPlasticityController::restore(r)?)
        } else {
            None
        };
        r.expect_end(Self::TYPE_NAME)?;
        Ok(Self {
            executor: E::default(),
            homeostatic,
        })
    }
}
