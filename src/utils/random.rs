//! Deterministic, seedable random number generator.
//!
//! Every random decision of the engine (potential pool sampling, initial
//! permanences, winner-cell tie-breaks, synapse growth) goes through [`Random`],
//! so a fixed seed yields a fixed network.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// A seeded pseudo-random number generator.
///
/// Uses ChaCha20 for high-quality randomness with deterministic behavior
/// when seeded. Independent streams can be derived from the same seed with
/// [`Random::with_stream`], which lets per-column work draw reproducible
/// numbers regardless of the order (or thread) in which columns are processed.
///
/// # Example
///
/// ```rust
/// use cortical::utils::Random;
///
/// let mut rng = Random::new(42);
///
/// let f = rng.get_real64();
/// assert!((0.0..1.0).contains(&f));
///
/// let idx = rng.get_usize(100);
/// assert!(idx < 100);
///
/// let mut items: Vec<u32> = (0..10).collect();
/// rng.shuffle(&mut items);
/// ```
pub struct Random {
    rng: ChaCha20Rng,
    seed: u64,
}

// Serialized as (seed, stream, word position) so a restored generator continues
// exactly where the saved one stopped.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct RandomState {
        seed: u64,
        stream: u64,
        word_pos: u128,
    }

    impl Serialize for Random {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let (seed, stream, word_pos) = self.state();
            RandomState {
                seed,
                stream,
                word_pos,
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Random {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = RandomState::deserialize(deserializer)?;
            Ok(Random::from_state(state.seed, state.stream, state.word_pos))
        }
    }
}

impl Random {
    /// Creates a new random number generator with the given seed.
    ///
    /// A negative seed draws a seed from the operating system.
    #[must_use]
    pub fn new(seed: i64) -> Self {
        let actual_seed = if seed < 0 {
            rand::thread_rng().gen()
        } else {
            seed as u64
        };

        Self {
            rng: ChaCha20Rng::seed_from_u64(actual_seed),
            seed: actual_seed,
        }
    }

    /// Creates a generator on an independent stream of the given seed.
    ///
    /// Two generators with the same seed and stream produce the same sequence;
    /// different streams never overlap.
    #[must_use]
    pub fn with_stream(seed: i64, stream: u64) -> Self {
        let mut random = Self::new(seed);
        random.rng.set_stream(stream);
        random
    }

    /// Rebuilds a generator from a captured [`Random::state`].
    #[must_use]
    pub fn from_state(seed: u64, stream: u64, word_pos: u128) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        rng.set_word_pos(word_pos);
        Self { rng, seed }
    }

    /// Returns `(seed, stream, word position)`, enough to resume the sequence.
    #[must_use]
    pub fn state(&self) -> (u64, u64, u128) {
        (self.seed, self.rng.get_stream(), self.rng.get_word_pos())
    }

    /// Returns the seed used for this generator.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates a random u32.
    pub fn get_uint32(&mut self) -> u32 {
        self.rng.gen()
    }

    /// Generates a random usize in the range [0, n).
    pub fn get_usize(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.gen_range(0..n)
    }

    /// Generates a random f64 in [0, 1).
    pub fn get_real64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Shuffles a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        if n <= 1 {
            return;
        }

        for i in (1..n).rev() {
            let j = self.get_usize(i + 1);
            slice.swap(i, j);
        }
    }

    /// Samples `k` unique items from a collection without replacement.
    ///
    /// If `k >= items.len()`, returns a shuffled copy of all items.
    pub fn sample<T>(&mut self, mut items: Vec<T>, k: usize) -> Vec<T> {
        let n = items.len();
        if k >= n {
            self.shuffle(&mut items);
            return items;
        }

        // Partial Fisher-Yates
        for i in 0..k {
            let j = self.get_usize(n - i) + i;
            items.swap(i, j);
        }

        items.truncate(k);
        items
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clone for Random {
    fn clone(&self) -> Self {
        Self {
            rng: self.rng.clone(),
            seed: self.seed,
        }
    }
}

impl PartialEq for Random {
    fn eq(&self, other: &Self) -> bool {
        self.state() == other.state()
    }
}

impl std::fmt::Debug for Random {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Random")
            .field("seed", &self.seed)
            .field("stream", &self.rng.get_stream())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let mut rng1 = Random::new(42);
        let mut rng2 = Random::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.get_uint32(), rng2.get_uint32());
        }
    }

    #[test]
    fn test_different_seeds() {
        let mut rng1 = Random::new(42);
        let mut rng2 = Random::new(43);

        let same = (0..100).all(|_| rng1.get_uint32() == rng2.get_uint32());
        assert!(!same);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut a = Random::with_stream(42, 1);
        let mut b = Random::with_stream(42, 2);
        let mut a2 = Random::with_stream(42, 1);

        let seq_a: Vec<u32> = (0..16).map(|_| a.get_uint32()).collect();
        let seq_b: Vec<u32> = (0..16).map(|_| b.get_uint32()).collect();
        let seq_a2: Vec<u32> = (0..16).map(|_| a2.get_uint32()).collect();

        assert_ne!(seq_a, seq_b);
        assert_eq!(seq_a, seq_a2);
    }

    #[test]
    fn test_state_resume() {
        let mut rng = Random::with_stream(7, 3);
        for _ in 0..37 {
            rng.get_real64();
        }

        let (seed, stream, pos) = rng.state();
        let mut resumed = Random::from_state(seed, stream, pos);

        for _ in 0..50 {
            assert_eq!(rng.get_uint32(), resumed.get_uint32());
        }
        assert_eq!(rng, resumed);
    }

    #[test]
    fn test_range() {
        let mut rng = Random::new(42);

        for _ in 0..1000 {
            assert!(rng.get_usize(10) < 10);
            assert!((0.0..1.0).contains(&rng.get_real64()));
        }
        assert_eq!(rng.get_usize(0), 0);
    }

    #[test]
    fn test_shuffle() {
        let mut rng = Random::new(42);
        let original: Vec<u32> = (0..100).collect();
        let mut shuffled = original.clone();
        rng.shuffle(&mut shuffled);

        assert_ne!(original, shuffled);

        let mut sorted = shuffled.clone();
        sorted.sort_unstable();
        assert_eq!(original, sorted);
    }

    #[test]
    fn test_sample() {
        let mut rng = Random::new(42);
        let items: Vec<u32> = (0..100).collect();
        let sampled = rng.sample(items.clone(), 10);

        assert_eq!(sampled.len(), 10);

        let mut unique = sampled.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 10);
        assert!(sampled.iter().all(|item| items.contains(item)));

        // More than available
        let all = rng.sample((0..5).collect::<Vec<u32>>(), 10);
        assert_eq!(all.len(), 5);
    }
}
