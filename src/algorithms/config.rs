//! Configuration block shared by every HTM algorithm.

use crate::error::{CorticalError, Result};
use crate::persistence::{HtmReader, HtmWriter, Persist};
use crate::types::Permanence;
use std::io::{BufRead, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All parameters of a network: dimensions, spatial-pooler learning rates and
/// inhibition settings, temporal-memory thresholds and capacity limits.
///
/// Fields are public; call [`HtmConfig::validate`] (done by
/// [`Connections::new`](crate::algorithms::Connections::new)) after editing.
///
/// # Example
///
/// ```rust
/// use cortical::algorithms::HtmConfig;
///
/// let mut config = HtmConfig::new(&[32, 32], &[64, 64]);
/// config.global_inhibition = false;
/// config.set_syn_perm_connected(0.2);
/// assert!((config.syn_perm_below_stimulus_inc - 0.02).abs() < 1e-12);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HtmConfig {
    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------
    /// Shape of the input space.
    pub input_dimensions: Vec<usize>,

    /// Shape of the column space.
    pub column_dimensions: Vec<usize>,

    /// If true, the first coordinate varies fastest in flat indices.
    pub is_column_major: bool,

    /// Whether neighborhoods wrap around the borders.
    pub wrap_around: bool,

    // ------------------------------------------------------------------
    // Spatial pooler
    // ------------------------------------------------------------------
    /// Receptive-field radius around a column's mapped input; -1 covers the whole input.
    pub potential_radius: i32,

    /// Fraction of the receptive field sampled into the potential pool.
    pub potential_pct: f64,

    /// Whether all columns compete in one global inhibition area.
    pub global_inhibition: bool,

    /// Target density of active columns; used when positive.
    pub local_area_density: f64,

    /// Target number of active columns per inhibition area; used when
    /// `local_area_density` is not positive.
    pub num_active_columns_per_inh_area: f64,

    /// Upper bound for the density derived from `num_active_columns_per_inh_area`.
    pub max_inhibition_density: f64,

    /// Minimum overlap for a column to take part in inhibition.
    pub stimulus_threshold: f64,

    /// Permanence decrement for synapses onto inactive inputs.
    pub syn_perm_inactive_dec: Permanence,

    /// Permanence increment for synapses onto active inputs.
    pub syn_perm_active_inc: Permanence,

    /// Permanence at which a proximal synapse is connected.
    pub syn_perm_connected: Permanence,

    /// Increment applied to weak columns and while raising to the stimulus threshold.
    pub syn_perm_below_stimulus_inc: Permanence,

    /// Permanences at or below this value are set to zero.
    pub syn_perm_trim_threshold: Permanence,

    /// Lower permanence bound.
    pub syn_perm_min: Permanence,

    /// Upper permanence bound.
    pub syn_perm_max: Permanence,

    /// Probability that an initial proximal synapse starts connected.
    pub initial_synapse_conns_pct: f64,

    /// Minimum overlap duty cycle as a fraction of the neighborhood maximum.
    pub min_pct_overlap_duty_cycles: f64,

    /// Minimum active duty cycle as a fraction of the neighborhood maximum.
    pub min_pct_active_duty_cycles: f64,

    /// Window length of the duty-cycle moving averages.
    pub duty_cycle_period: u32,

    /// Boost factor of a column that never fires.
    pub max_boost: f64,

    /// Iterations between inhibition-radius and min-duty-cycle refreshes.
    pub update_period: u32,

    // ------------------------------------------------------------------
    // Temporal memory
    // ------------------------------------------------------------------
    /// Cells in each column.
    pub cells_per_column: usize,

    /// Active connected synapses for a segment to be active.
    pub activation_threshold: u32,

    /// Active potential synapses for a segment to be matching.
    pub min_threshold: u32,

    /// Upper bound of synapses grown onto a segment per cycle.
    pub max_new_synapse_count: u32,

    /// Capacity of a distal segment.
    pub max_synapses_per_segment: usize,

    /// Capacity of a cell.
    pub max_segments_per_cell: usize,

    /// Permanence of newly grown distal synapses.
    pub initial_permanence: Permanence,

    /// Permanence at which a distal synapse is connected.
    pub connected_permanence: Permanence,

    /// Distal permanence increment.
    pub permanence_increment: Permanence,

    /// Distal permanence decrement.
    pub permanence_decrement: Permanence,

    /// Punishment applied to matching segments in inactive columns.
    pub predicted_segment_decrement: Permanence,

    /// Seed of the network's random generator; negative seeds are drawn from the OS.
    pub random_seed: i64,
}

impl Default for HtmConfig {
    fn default() -> Self {
        Self {
            input_dimensions: vec![100],
            column_dimensions: vec![2048],
            is_column_major: false,
            wrap_around: true,

            potential_radius: 15,
            potential_pct: 0.75,
            global_inhibition: true,
            local_area_density: -1.0,
            num_active_columns_per_inh_area: 0.02 * 2048.0,
            max_inhibition_density: 0.5,
            stimulus_threshold: 5.0,
            syn_perm_inactive_dec: 0.008,
            syn_perm_active_inc: 0.05,
            syn_perm_connected: 0.1,
            syn_perm_below_stimulus_inc: 0.01,
            syn_perm_trim_threshold: 0.05,
            syn_perm_min: 0.0,
            syn_perm_max: 1.0,
            initial_synapse_conns_pct: 0.5,
            min_pct_overlap_duty_cycles: 0.001,
            min_pct_active_duty_cycles: 0.001,
            duty_cycle_period: 1000,
            max_boost: 10.0,
            update_period: 50,

            cells_per_column: 32,
            activation_threshold: 10,
            min_threshold: 9,
            max_new_synapse_count: 20,
            max_synapses_per_segment: 225,
            max_segments_per_cell: 225,
            initial_permanence: 0.21,
            connected_permanence: 0.5,
            permanence_increment: 0.1,
            permanence_decrement: 0.1,
            predicted_segment_decrement: 0.1,
            random_seed: 42,
        }
    }
}

impl HtmConfig {
    /// Default configuration for the given input and column shapes.
    pub fn new(input_dimensions: &[usize], column_dimensions: &[usize]) -> Self {
        Self {
            input_dimensions: input_dimensions.to_vec(),
            column_dimensions: column_dimensions.to_vec(),
            ..Self::default()
        }
    }

    /// Total number of input bits.
    pub fn num_inputs(&self) -> usize {
        self.input_dimensions.iter().product()
    }

    /// Total number of columns.
    pub fn num_columns(&self) -> usize {
        self.column_dimensions.iter().product()
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> usize {
        self.num_columns() * self.cells_per_column
    }

    /// Sets the active increment together with the trim threshold (half of it).
    pub fn set_syn_perm_active_inc(&mut self, increment: Permanence) {
        self.syn_perm_active_inc = increment;
        self.syn_perm_trim_threshold = increment / 2.0;
    }

    /// Sets the connected threshold together with the below-stimulus increment
    /// (a tenth of it).
    pub fn set_syn_perm_connected(&mut self, connected: Permanence) {
        self.syn_perm_connected = connected;
        self.syn_perm_below_stimulus_inc = connected / 10.0;
    }

    /// Checks every parameter and reports the first invalid one.
    pub fn validate(&self) -> Result<()> {
        check_dimensions("input_dimensions", &self.input_dimensions)?;
        check_dimensions("column_dimensions", &self.column_dimensions)?;

        if self.cells_per_column == 0 {
            return Err(invalid("cells_per_column", "Must be greater than 0"));
        }
        if self.potential_radius < -1 {
            return Err(invalid("potential_radius", "Must be -1 (whole input) or non-negative"));
        }
        if !(self.potential_pct > 0.0 && self.potential_pct <= 1.0) {
            return Err(invalid("potential_pct", "Must be in range (0, 1]"));
        }
        if self.num_active_columns_per_inh_area <= 0.0
            && !(self.local_area_density > 0.0 && self.local_area_density <= 0.5)
        {
            return Err(invalid(
                "local_area_density",
                "Either num_active_columns_per_inh_area > 0 or local_area_density in (0, 0.5] is required",
            ));
        }
        if self.max_inhibition_density <= 0.0 {
            return Err(invalid("max_inhibition_density", "Must be greater than 0"));
        }
        if self.stimulus_threshold < 0.0 {
            return Err(invalid("stimulus_threshold", "Must be non-negative"));
        }
        if self.syn_perm_min >= self.syn_perm_max {
            return Err(invalid("syn_perm_min", "Must be less than syn_perm_max"));
        }
        if self.syn_perm_connected < self.syn_perm_min || self.syn_perm_connected > self.syn_perm_max {
            return Err(invalid("syn_perm_connected", "Must lie within [syn_perm_min, syn_perm_max]"));
        }
        if self.syn_perm_trim_threshold >= self.syn_perm_connected {
            return Err(invalid("syn_perm_trim_threshold", "Must be below syn_perm_connected"));
        }
        if self.syn_perm_below_stimulus_inc <= 0.0 {
            return Err(invalid("syn_perm_below_stimulus_inc", "Must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.initial_synapse_conns_pct) {
            return Err(invalid("initial_synapse_conns_pct", "Must be in range [0, 1]"));
        }
        if self.duty_cycle_period == 0 {
            return Err(invalid("duty_cycle_period", "Must be greater than 0"));
        }
        if self.update_period == 0 {
            return Err(invalid("update_period", "Must be greater than 0"));
        }
        if self.max_segments_per_cell == 0 {
            return Err(invalid("max_segments_per_cell", "Must be greater than 0"));
        }
        if self.max_synapses_per_segment == 0 {
            return Err(invalid("max_synapses_per_segment", "Must be greater than 0"));
        }
        if self.min_threshold > self.activation_threshold {
            return Err(invalid("min_threshold", "Must not exceed activation_threshold"));
        }
        for (name, value) in [
            ("initial_permanence", self.initial_permanence),
            ("connected_permanence", self.connected_permanence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, "Must be in range [0, 1]"));
            }
        }

        Ok(())
    }
}

fn check_dimensions(name: &'static str, dims: &[usize]) -> Result<()> {
    if dims.is_empty() {
        return Err(CorticalError::InvalidDimensions(format!("{name} cannot be empty")));
    }
    if dims.iter().any(|&d| d == 0) {
        return Err(CorticalError::InvalidDimensions(format!(
            "{name} {dims:?} contains a zero-sized dimension"
        )));
    }
    Ok(())
}

fn invalid(name: &'static str, message: &str) -> CorticalError {
    CorticalError::InvalidParameter {
        name,
        message: message.to_string(),
    }
}

impl Persist for HtmConfig {
    const TYPE_NAME: &'static str = "HtmConfig";

    fn persist<W: Write>(&self, w: &mut HtmWriter<W>) -> Result<()> {
        w.begin(Self::TYPE_NAME)?;
        w.list("input_dimensions", &self.input_dimensions)?;
        w.list("column_dimensions", &self.column_dimensions)?;
        w.field("is_column_major", self.is_column_major)?;
        w.field("wrap_around", self.wrap_around)?;

        w.field("potential_radius", self.potential_radius)?;
        w.field("potential_pct", self.potential_pct)?;
        w.field("global_inhibition", self.global_inhibition)?;
        w.field("local_area_density", self.local_area_density)?;
        w.field("num_active_columns_per_inh_area", self.num_active_columns_per_inh_area)?;
        w.field("max_inhibition_density", self.max_inhibition_density)?;
        w.field("stimulus_threshold", self.stimulus_threshold)?;
        w.field("syn_perm_inactive_dec", self.syn_perm_inactive_dec)?;
        w.field("syn_perm_active_inc", self.syn_perm_active_inc)?;
        w.field("syn_perm_connected", self.syn_perm_connected)?;
        w.field("syn_perm_below_stimulus_inc", self.syn_perm_below_stimulus_inc)?;
        w.field("syn_perm_trim_threshold", self.syn_perm_trim_threshold)?;
        w.field("syn_perm_min", self.syn_perm_min)?;
        w.field("syn_perm_max", self.syn_perm_max)?;
        w.field("initial_synapse_conns_pct", self.initial_synapse_conns_pct)?;
        w.field("min_pct_overlap_duty_cycles", self.min_pct_overlap_duty_cycles)?;
        w.field("min_pct_active_duty_cycles", self.min_pct_active_duty_cycles)?;
        w.field("duty_cycle_period", self.duty_cycle_period)?;
        w.field("max_boost", self.max_boost)?;
        w.field("update_period", self.update_period)?;

        w.field("cells_per_column", self.cells_per_column)?;
        w.field("activation_threshold", self.activation_threshold)?;
        w.field("min_threshold", self.min_threshold)?;
        w.field("max_new_synapse_count", self.max_new_synapse_count)?;
        w.field("max_synapses_per_segment", self.max_synapses_per_segment)?;
        w.field("max_segments_per_cell", self.max_segments_per_cell)?;
        w.field("initial_permanence", self.initial_permanence)?;
        w.field("connected_permanence", self.connected_permanence)?;
        w.field("permanence_increment", self.permanence_increment)?;
        w.field("permanence_decrement", self.permanence_decrement)?;
        w.field("predicted_segment_decrement", self.predicted_segment_decrement)?;
        w.field("random_seed", self.random_seed)?;
        w.end(Self::TYPE_NAME)
    }

    fn restore<R: BufRead>(r: &mut HtmReader<R>) -> Result<Self> {
        r.expect_begin(Self::TYPE_NAME)?;
        let config = Self {
            input_dimensions: r.parse_list("input_dimensions")?,
            column_dimensions: r.parse_list("column_dimensions")?,
            is_column_major: r.parse("is_column_major")?,
            wrap_around: r.parse("wrap_around")?,

            potential_radius: r.parse("potential_radius")?,
            potential_pct: r.parse("potential_pct")?,
            global_inhibition: r.parse("global_inhibition")?,
            local_area_density: r.parse("local_area_density")?,
            num_active_columns_per_inh_area: r.parse("num_active_columns_per_inh_area")?,
            max_inhibition_density: r.parse("max_inhibition_density")?,
            stimulus_threshold: r.parse("stimulus_threshold")?,
            syn_perm_inactive_dec: r.parse("syn_perm_inactive_dec")?,
            syn_perm_active_inc: r.parse("syn_perm_active_inc")?,
            syn_perm_connected: r.parse("syn_perm_connected")?,
            syn_perm_below_stimulus_inc: r.parse("syn_perm_below_stimulus_inc")?,
            syn_perm_trim_threshold: r.parse("syn_perm_trim_threshold")?,
            syn_perm_min: r.parse("syn_perm_min")?,
            syn_perm_max: r.parse("syn_perm_max")?,
            initial_synapse_conns_pct: r.parse("initial_synapse_conns_pct")?,
            min_pct_overlap_duty_cycles: r.parse("min_pct_overlap_duty_cycles")?,
            min_pct_active_duty_cycles: r.parse("min_pct_active_duty_cycles")?,
            duty_cycle_period: r.parse("duty_cycle_period")?,
            max_boost: r.parse("max_boost")?,
            update_period: r.parse("update_period")?,

            cells_per_column: r.parse("cells_per_column")?,
            activation_threshold: r.parse("activation_threshold")?,
            min_threshold: r.parse("min_threshold")?,
            max_new_synapse_count: r.parse("max_new_synapse_count")?,
            max_synapses_per_segment: r.parse("max_synapses_per_segment")?,
            max_segments_per_cell: r.parse("max_segments_per_cell")?,
            initial_permanence: r.parse("initial_permanence")?,
            connected_permanence: r.parse("connected_permanence")?,
            permanence_increment: r.parse("permanence_increment")?,
            permanence_decrement: r.parse("permanence_decrement")?,
            predicted_segment_decrement: r.parse("predicted_segment_decrement")?,
            random_seed: r.parse("random_seed")?,
        };
        r.expect_end(Self::TYPE_NAME)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(HtmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_sizes() {
        let config = HtmConfig::new(&[10, 10], &[8, 4]);
        assert_eq!(config.num_inputs(), 100);
        assert_eq!(config.num_columns(), 32);
        assert_eq!(config.num_cells(), 32 * 32);
    }

    #[test]
    fn test_derived_setters() {
        let mut config = HtmConfig::default();
        config.set_syn_perm_active_inc(0.1);
        assert!((config.syn_perm_trim_threshold - 0.05).abs() < 1e-12);

        config.set_syn_perm_connected(0.3);
        assert!((config.syn_perm_below_stimulus_inc - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(HtmConfig::new(&[], &[10]).validate().is_err());
        assert!(HtmConfig::new(&[10], &[0]).validate().is_err());
    }

    #[test]
    fn test_density_both_unset() {
        let mut config = HtmConfig::default();
        config.num_active_columns_per_inh_area = 0.0;
        config.local_area_density = -1.0;
        assert!(config.validate().is_err());

        config.local_area_density = 0.7;
        assert!(config.validate().is_err());

        config.local_area_density = 0.02;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_parameters() {
        let mut config = HtmConfig::default();
        config.potential_pct = 1.5;
        assert!(config.validate().is_err());

        let mut config = HtmConfig::default();
        config.potential_radius = -2;
        assert!(config.validate().is_err());

        let mut config = HtmConfig::default();
        config.min_threshold = config.activation_threshold + 1;
        assert!(config.validate().is_err());

        let mut config = HtmConfig::default();
        config.syn_perm_trim_threshold = config.syn_perm_connected;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_persist_round_trip() {
        let mut config = HtmConfig::new(&[7, 9], &[3, 5]);
        config.potential_pct = 1.0 / 3.0;
        config.random_seed = -1;
        config.wrap_around = false;

        let restored = HtmConfig::from_text(&config.to_text().unwrap()).unwrap();
        assert_eq!(restored, config);
    }
}
