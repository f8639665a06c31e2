//! Receptive field of a proximal dendrite.

use super::SynapseData;
use crate::types::Permanence;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The realized receptive field of a column.
///
/// Maps each potential input bit to its synapse and keeps the subset of inputs
/// whose synapse is currently connected. Iteration is always in ascending input
/// order, which makes permanence vectors positional and reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pool {
    synapses: BTreeMap<u32, SynapseData>,
    connected: BTreeSet<u32>,
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of potential synapses.
    #[inline]
    pub fn len(&self) -> usize {
        self.synapses.len()
    }

    /// Returns whether the pool has no potential synapses.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.synapses.is_empty()
    }

    /// Adds (or replaces) the synapse for its input bit.
    pub fn add_synapse(&mut self, synapse: SynapseData) {
        self.connected.remove(&synapse.input_index);
        self.synapses.insert(synapse.input_index, synapse);
    }

    /// Returns the synapse onto `input`, if it is in the pool.
    pub fn synapse(&self, input: u32) -> Option<&SynapseData> {
        self.synapses.get(&input)
    }

    /// Iterates over all potential synapses in input order.
    pub fn synapses(&self) -> impl Iterator<Item = &SynapseData> {
        self.synapses.values()
    }

    /// Potential input indices in ascending order.
    pub fn potential_inputs(&self) -> impl Iterator<Item = u32> + '_ {
        self.synapses.keys().copied()
    }

    /// Inputs whose synapse is connected.
    pub fn connected_inputs(&self) -> &BTreeSet<u32> {
        &self.connected
    }

    /// Permanences in input order.
    pub fn sparse_permanences(&self) -> Vec<Permanence> {
        self.synapses.values().map(|s| s.permanence).collect()
    }

    /// Permanences laid out over the whole input space, zero outside the pool.
    pub fn dense_permanences(&self, num_inputs: usize) -> Vec<Permanence> {
        let mut dense = vec![0.0; num_inputs];
        for (&input, synapse) in &self.synapses {
            if let Some(slot) = dense.get_mut(input as usize) {
                *slot = synapse.permanence;
            }
        }
        dense
    }

    /// Overwrites permanences positionally (input order) and refreshes the
    /// connected subset. Calls `on_connected` for every connected input.
    pub(crate) fn set_permanences(
        &mut self,
        permanences: &[Permanence],
        connected_threshold: Permanence,
        mut on_connected: impl FnMut(u32),
    ) {
        self.connected.clear();
        for (synapse, &perm) in self.synapses.values_mut().zip(permanences) {
            synapse.permanence = perm;
            if perm >= connected_threshold {
                self.connected.insert(synapse.input_index);
                on_connected(synapse.input_index);
            }
        }
    }

    /// Connected subset is a subset of the potential keys.
    pub fn is_consistent(&self) -> bool {
        self.connected.iter().all(|input| self.synapses.contains_key(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(inputs: &[u32]) -> Pool {
        let mut pool = Pool::new();
        for (i, &input) in inputs.iter().enumerate() {
            pool.add_synapse(SynapseData::proximal(0, i as u64, input, 0.0));
        }
        pool
    }

    #[test]
    fn test_set_permanences_tracks_connected() {
        let mut p = pool(&[9, 2, 5]);
        let mut seen = Vec::new();
        // input order is 2, 5, 9
        p.set_permanences(&[0.3, 0.05, 0.1], 0.1, |i| seen.push(i));

        assert_eq!(seen, vec![2, 9]);
        assert_eq!(p.connected_inputs().iter().copied().collect::<Vec<_>>(), vec![2, 9]);
        assert!(p.is_consistent());
        assert_eq!(p.sparse_permanences(), vec![0.3, 0.05, 0.1]);
    }

    #[test]
    fn test_dense_permanences() {
        let mut p = pool(&[1, 3]);
        p.set_permanences(&[0.5, 0.25], 0.2, |_| {});
        assert_eq!(p.dense_permanences(5), vec![0.0, 0.5, 0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_empty_pool() {
        let p = Pool::new();
        assert!(p.is_empty());
        assert!(p.connected_inputs().is_empty());
        assert!(p.is_consistent());
    }
}
