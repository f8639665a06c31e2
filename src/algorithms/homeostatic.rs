//! Homeostatic Plasticity Controller.
//!
//! Boosting keeps rarely active columns in the game while the spatial pooler
//! learns, but it also keeps outputs moving. The controller watches the pooler
//! cycle by cycle: once every known input has produced the same output (within
//! a similarity threshold) with a constant number of active columns for long
//! enough, the pooler is declared stable. After a warm-up period the
//! controller also switches boosting off for good.

use crate::algorithms::HtmConfig;
use crate::error::{CorticalError, Result};
use crate::persistence::{join, HtmReader, HtmWriter, Persist};
use ahash::AHashMap;
use std::fmt;
use std::fmt::Write as _;
use std::io::{BufRead, Write};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default number of stable cycles every input needs.
pub const DEFAULT_REQUIRED_STABLE_CYCLES: usize = 50;

/// Default output similarity for two cycles to count as the same.
pub const DEFAULT_REQUIRED_SIMILARITY: f64 = 0.97;

/// Default length of the active-column-count window.
pub const DEFAULT_WINDOW: usize = 5;

/// Payload of a stability transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityEvent {
    /// The new state.
    pub is_stable: bool,
    /// Number of distinct inputs seen so far.
    pub num_patterns: usize,
    /// Average absolute change of the active column count over the window,
    /// `-1` when the transition was caused by a dissimilar output.
    pub avg_derivation: f64,
    /// Controller cycle at which the transition happened.
    pub cycle: u64,
}

/// Callback invoked on every stability transition.
pub type StabilityCallback = Box<dyn FnMut(StabilityEvent) + Send>;

/// What the controller remembers about one input.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct InputTrace {
    /// Active column indices of the last output.
    output: Vec<u32>,
    /// Active column counts, newest first.
    active_counts: Vec<usize>,
    stable_cycles: usize,
}

/// Detects when the spatial pooler has settled.
///
/// # Example
///
/// ```rust
/// use cortical::algorithms::{HomeostaticPlasticityController, HtmConfig};
/// use std::sync::{Arc, Mutex};
///
/// let events = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&events);
/// let mut hpc = HomeostaticPlasticityController::new(0, move |e| sink.lock().unwrap().push(e))
///     .with_required_stable_cycles(2)
///     .unwrap();
///
/// let mut config = HtmConfig::default();
/// let input = [1u8, 0, 1];
/// let output = [0u8, 1, 1, 0];
/// for _ in 0..10 {
///     hpc.compute(&mut config, &input, &output);
/// }
/// assert!(hpc.is_stable());
/// assert_eq!(events.lock().unwrap().len(), 1);
/// assert_eq!(config.max_boost, 0.0);
/// ```
///
/// With the `serde` feature the controller is serializable; the callback is
/// not part of the snapshot and has to be attached again with
/// [`set_callback`](Self::set_callback).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HomeostaticPlasticityController {
    min_cycles: u64,
    required_stable_cycles: usize,
    required_similarity: f64,
    window: usize,
    cycle: u64,
    is_stable: bool,
    inputs: AHashMap<u64, InputTrace>,
    #[cfg_attr(feature = "serde", serde(skip))]
    callback: Option<StabilityCallback>,
}

impl HomeostaticPlasticityController {
    /// Creates a controller.
    ///
    /// # Arguments
    ///
    /// * `min_cycles` - Warm-up cycles before stability can be declared and
    ///   boosting is switched off
    /// * `callback` - Called on every stability transition
    pub fn new(min_cycles: u64, callback: impl FnMut(StabilityEvent) + Send + 'static) -> Self {
        let mut controller = Self::detached(min_cycles);
        controller.callback = Some(Box::new(callback));
        controller
    }

    /// Creates a controller without a callback.
    pub fn detached(min_cycles: u64) -> Self {
        Self {
            min_cycles,
            required_stable_cycles: DEFAULT_REQUIRED_STABLE_CYCLES,
            required_similarity: DEFAULT_REQUIRED_SIMILARITY,
            window: DEFAULT_WINDOW,
            cycle: 0,
            is_stable: false,
            inputs: AHashMap::new(),
            callback: None,
        }
    }

    /// Sets how many stable cycles every input needs.
    pub fn with_required_stable_cycles(mut self, cycles: usize) -> Result<Self> {
        if cycles == 0 {
            return Err(CorticalError::InvalidParameter {
                name: "required_stable_cycles",
                message: "Must be greater than 0".to_string(),
            });
        }
        self.required_stable_cycles = cycles;
        Ok(self)
    }

    /// Sets the output similarity two cycles need to count as the same.
    pub fn with_required_similarity(mut self, similarity: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&similarity) {
            return Err(CorticalError::InvalidParameter {
                name: "required_similarity",
                message: "Must be in range [0, 1]".to_string(),
            });
        }
        self.required_similarity = similarity;
        Ok(self)
    }

    /// Sets the length of the active-column-count window.
    pub fn with_window(mut self, window: usize) -> Result<Self> {
        if window == 0 {
            return Err(CorticalError::InvalidParameter {
                name: "window",
                message: "Must be greater than 0".to_string(),
            });
        }
        self.window = window;
        Ok(self)
    }

    /// Replaces the transition callback.
    pub fn set_callback(&mut self, callback: impl FnMut(StabilityEvent) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Whether the pooler is currently considered stable.
    pub fn is_stable(&self) -> bool {
        self.is_stable
    }

    /// Cycles observed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Number of distinct inputs seen.
    pub fn num_patterns(&self) -> usize {
        self.inputs.len()
    }

    /// Stable cycles of an input, `None` for unseen inputs.
    pub fn stable_cycles_of(&self, input: &[u8]) -> Option<usize> {
        self.inputs.get(&input_key(input)).map(|t| t.stable_cycles)
    }

    /// Observes one pooler cycle.
    ///
    /// The first sighting of an input only registers it. Later sightings
    /// compare the output with the previous one for that input; a similar
    /// output with an unchanged active column count over the whole window
    /// adds a stable cycle, anything else resets the input's count. Once
    /// `min_cycles` have passed, boosting is switched off in `config` and the
    /// pooler becomes stable as soon as every input has enough stable cycles.
    ///
    /// # Returns
    ///
    /// Whether the pooler is stable after this cycle.
    pub fn compute(&mut self, config: &mut HtmConfig, input: &[u8], output: &[u8]) -> bool {
        let key = input_key(input);
        let active: Vec<u32> = output
            .iter()
            .enumerate()
            .filter(|(_, &bit)| bit == 1)
            .map(|(i, _)| i as u32)
            .collect();

        let mut stable = false;
        let warmed_up = self.cycle >= self.min_cycles;

        let Some(trace) = self.inputs.get_mut(&key) else {
            self.inputs.insert(
                key,
                InputTrace {
                    output: active,
                    active_counts: vec![0; self.window],
                    stable_cycles: 0,
                },
            );
            self.cycle += 1;
            return false;
        };

        push_front(&mut trace.active_counts, active.len());
        let similar = similarity(&trace.output, &active) >= self.required_similarity;
        trace.output = active;
        let avg = avg_delta(&trace.active_counts);
        if similar && avg == 0.0 {
            trace.stable_cycles += 1;
        } else {
            trace.stable_cycles = 0;
        }
        let stable_cycles = trace.stable_cycles;

        if warmed_up {
            disable_boosting(config);
        }

        if similar {
            if warmed_up
                && stable_cycles > self.required_stable_cycles
                && self.inputs.values().all(|t| t.stable_cycles >= self.required_stable_cycles)
            {
                if !self.is_stable {
                    self.notify(true, avg);
                }
                self.is_stable = true;
                stable = true;
            }
        } else if self.is_stable {
            self.is_stable = false;
            self.notify(false, -1.0);
        }

        self.cycle += 1;
        stable
    }

    fn notify(&mut self, is_stable: bool, avg_derivation: f64) {
        let event = StabilityEvent {
            is_stable,
            num_patterns: self.inputs.len(),
            avg_derivation,
            cycle: self.cycle,
        };
        log::debug!(
            "spatial pooler {} after {} cycles ({} patterns)",
            if is_stable { "became stable" } else { "lost stability" },
            event.cycle,
            event.num_patterns
        );
        if let Some(callback) = self.callback.as_mut() {
            callback(event);
        }
    }

    /// Human-readable summary of every input: stable cycles, output size and
    /// active columns, followed by the least stable input.
    pub fn trace_state(&self) -> String {
        let mut out = String::new();
        let mut keys: Vec<&u64> = self.inputs.keys().collect();
        keys.sort_unstable();

        for (i, key) in keys.iter().enumerate() {
            let trace = &self.inputs[*key];
            let _ = writeln!(
                out,
                "[{i} - stable cycles: {}, len = {}] \t {}",
                trace.stable_cycles,
                trace.output.len(),
                join(&trace.output)
            );
        }

        if let Some((key, trace)) = self.inputs.iter().min_by_key(|(k, t)| (t.stable_cycles, **k)) {
            let _ = writeln!(out, "min key = {key:016x}, min stable cycles = {}", trace.stable_cycles);
        }
        out
    }
}

/// 64-bit FNV-1a hash of an input vector.
pub fn input_key(input: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

    input.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Shared active indices over the size of the larger set, `-1` when either
/// set is empty.
pub fn similarity(previous: &[u32], current: &[u32]) -> f64 {
    if previous.is_empty() || current.is_empty() {
        return -1.0;
    }
    let shared = current.iter().filter(|c| previous.contains(c)).count();
    shared as f64 / previous.len().max(current.len()) as f64
}

/// Sum of absolute differences of neighbors, divided by the length.
pub fn avg_delta(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: usize = values.windows(2).map(|w| w[0].abs_diff(w[1])).sum();
    sum as f64 / values.len() as f64
}

fn push_front(window: &mut [usize], value: usize) {
    if window.is_empty() {
        return;
    }
    window.rotate_right(1);
    window[0] = value;
}

fn disable_boosting(config: &mut HtmConfig) {
    if config.max_boost != 0.0 || config.min_pct_overlap_duty_cycles != 0.0 || config.min_pct_active_duty_cycles != 0.0 {
        log::warn!("homeostatic plasticity controller switched boosting off");
    }
    config.max_boost = 0.0;
    config.min_pct_overlap_duty_cycles = 0.0;
    config.min_pct_active_duty_cycles = 0.0;
}

impl fmt::Debug for HomeostaticPlasticityController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeostaticPlasticityController")
            .field("min_cycles", &self.min_cycles)
            .field("required_stable_cycles", &self.required_stable_cycles)
            .field("required_similarity", &self.required_similarity)
            .field("cycle", &self.cycle)
            .field("is_stable", &self.is_stable)
            .field("num_patterns", &self.inputs.len())
            .finish_non_exhaustive()
    }
}

/// Compares settings and learned state; the callback is ignored.
impl PartialEq for HomeostaticPlasticityController {
    fn eq(&self, other: &Self) -> bool {
        self.min_cycles == other.min_cycles
            && self.required_stable_cycles == other.required_stable_cycles
            && self.required_similarity == other.required_similarity
            && self.window == other.window
            && self.cycle == other.cycle
            && self.is_stable == other.is_stable
            && self.inputs == other.inputs
    }
}

impl Persist for HomeostaticPlasticityController {
    const TYPE_NAME: &'static str = "HomeostaticPlasticityController";

    fn persist<W: Write>(&self, w: &mut HtmWriter<W>) -> Result<()> {
        w.begin(Self::TYPE_NAME)?;
        w.field("min_cycles", self.min_cycles)?;
        w.field("required_stable_cycles", self.required_stable_cycles)?;
        w.field("required_similarity", self.required_similarity)?;
        w.field("window", self.window)?;
        w.field("cycle", self.cycle)?;
        w.field("is_stable", self.is_stable)?;

        let mut keys: Vec<&u64> = self.inputs.keys().collect();
        keys.sort_unstable();
        w.field("inputs", keys.len())?;
        for key in keys {
            let trace = &self.inputs[key];
            w.record(
                "input",
                &[
                    key.to_string(),
                    trace.stable_cycles.to_string(),
                    join(&trace.active_counts),
                    join(&trace.output),
                ],
            )?;
        }
        w.end(Self::TYPE_NAME)
    }

    fn restore<R: BufRead>(r: &mut HtmReader<R>) -> Result<Self> {
        r.expect_begin(Self::TYPE_NAME)?;
        let mut controller = Self::detached(r.parse("min_cycles")?);
        controller.required_stable_cycles = r.parse("required_stable_cycles")?;
        controller.required_similarity = r.parse("required_similarity")?;
        controller.window = r.parse("window")?;
        controller.cycle = r.parse("cycle")?;
        controller.is_stable = r.parse("is_stable")?;

        let count: usize = r.parse("inputs")?;
        for _ in 0..count {
            let parts = r.parse_record("input")?;
            if parts.len() != 4 {
                return Err(r.error("input needs key|stable_cycles|counts|output"));
            }
            let active_counts: Vec<usize> = r.parse_elements(&parts[2])?;
            if active_counts.len() != controller.window {
                return Err(r.error(format!("window of {} counts expected", controller.window)));
            }
            controller.inputs.insert(
                r.parse_value(&parts[0])?,
                InputTrace {
                    output: r.parse_elements(&parts[3])?,
                    active_counts,
                    stable_cycles: r.parse_value(&parts[1])?,
                },
            );
        }
        r.expect_end(Self::TYPE_NAME)?;
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(min_cycles: u64) -> (HomeostaticPlasticityController, Arc<Mutex<Vec<StabilityEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let hpc = HomeostaticPlasticityController::new(min_cycles, move |e| sink.lock().unwrap().push(e))
            .with_required_stable_cycles(3)
            .unwrap();
        (hpc, events)
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(input_key(&[]), 0xcbf2_9ce4_8422_2325);
        assert_eq!(input_key(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_ne!(input_key(&[0, 1]), input_key(&[1, 0]));
    }

    #[test]
    fn test_similarity() {
        assert_eq!(similarity(&[1, 2, 3, 4], &[1, 2, 3, 4]), 1.0);
        assert_eq!(similarity(&[1, 2, 3, 4], &[1, 2]), 0.5);
        assert_eq!(similarity(&[1, 2], &[2, 9, 10, 11]), 0.25);
        assert_eq!(similarity(&[], &[1]), -1.0);
        assert_eq!(similarity(&[1], &[]), -1.0);
    }

    #[test]
    fn test_avg_delta() {
        assert_eq!(avg_delta(&[4, 4, 4, 4, 4]), 0.0);
        assert_eq!(avg_delta(&[4, 0, 0, 0, 0]), 0.8);
        assert_eq!(avg_delta(&[1, 3, 2, 2, 2]), 0.6);
    }

    #[test]
    fn test_window_shifts_newest_first() {
        let mut window = vec![0; 5];
        push_front(&mut window, 3);
        push_front(&mut window, 7);
        assert_eq!(window, vec![7, 3, 0, 0, 0]);
    }

    #[test]
    fn test_first_sighting_registers_only() {
        let (mut hpc, events) = recording(0);
        let mut config = HtmConfig::default();

        assert!(!hpc.compute(&mut config, &[1, 0], &[1, 1, 0]));
        assert_eq!(hpc.num_patterns(), 1);
        assert_eq!(hpc.stable_cycles_of(&[1, 0]), Some(0));
        assert_eq!(hpc.stable_cycles_of(&[0, 1]), None);
        assert_eq!(hpc.cycle(), 1);
        // boosting is only touched on repeated inputs
        assert_eq!(config.max_boost, 10.0);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_becomes_stable_once() {
        let (mut hpc, events) = recording(0);
        let mut config = HtmConfig::default();
        let patterns: [(&[u8], &[u8]); 2] = [(&[1, 0, 0], &[1, 1, 0, 0]), (&[0, 1, 1], &[0, 0, 1, 1])];

        let mut stable_at = None;
        for round in 0..20 {
            for (input, output) in patterns {
                if hpc.compute(&mut config, input, output) && stable_at.is_none() {
                    stable_at = Some(round);
                }
            }
        }

        // the window settles on the 5th repeat, the 8th passes 3 stable cycles
        assert_eq!(stable_at, Some(8));
        assert!(hpc.is_stable());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_stable);
        assert_eq!(events[0].num_patterns, 2);
        assert_eq!(events[0].avg_derivation, 0.0);
        assert_eq!(config.max_boost, 0.0);
        assert_eq!(config.min_pct_active_duty_cycles, 0.0);
    }

    #[test]
    fn test_dissimilar_output_breaks_stability() {
        let (mut hpc, events) = recording(0);
        let mut config = HtmConfig::default();
        for _ in 0..12 {
            hpc.compute(&mut config, &[1], &[1, 1, 0, 0]);
        }
        assert!(hpc.is_stable());

        assert!(!hpc.compute(&mut config, &[1], &[0, 0, 1, 1]));
        assert!(!hpc.is_stable());
        assert_eq!(hpc.stable_cycles_of(&[1]), Some(0));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(!events[1].is_stable);
        assert_eq!(events[1].avg_derivation, -1.0);
    }

    #[test]
    fn test_warm_up_delays_stability() {
        let (mut hpc, _) = recording(30);
        let mut config = HtmConfig::default();
        for _ in 0..30 {
            assert!(!hpc.compute(&mut config, &[1], &[1, 0]));
        }
        assert_eq!(config.max_boost, 10.0);
        assert!(hpc.compute(&mut config, &[1], &[1, 0]));
        assert_eq!(config.max_boost, 0.0);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(HomeostaticPlasticityController::detached(0).with_required_stable_cycles(0).is_err());
        assert!(HomeostaticPlasticityController::detached(0).with_window(0).is_err());
        assert!(HomeostaticPlasticityController::detached(0).with_required_similarity(1.5).is_err());
    }

    #[test]
    fn test_trace_state() {
        let (mut hpc, _) = recording(0);
        let mut config = HtmConfig::default();
        hpc.compute(&mut config, &[1], &[0, 1, 1]);
        let state = hpc.trace_state();
        assert!(state.contains("stable cycles: 0, len = 2"));
        assert!(state.contains("1,2"));
        assert!(state.contains("min stable cycles = 0"));
    }

    #[test]
    fn test_persist_round_trip() {
        let (mut hpc, _) = recording(2);
        let mut config = HtmConfig::default();
        for i in 0..9u8 {
            hpc.compute(&mut config, &[i % 3], &[1, 0, i % 2]);
        }

        let restored = HomeostaticPlasticityController::from_text(&hpc.to_text().unwrap()).unwrap();
        assert_eq!(restored, hpc);
        assert_eq!(restored.trace_state(), hpc.trace_state());
    }
}
