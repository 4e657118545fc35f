//! Shared deterministic randomness
//!
//! Replicas never exchange the results of random draws, only the moves that
//! caused them. Every replica therefore owns a [`RandomSource`] seeded
//! identically, and draws from it only while applying moves, so the n-th draw
//! yields the same value everywhere.

use uuid::Uuid;

/// Randomness available to move handlers
pub trait RandomSource {
    /// Shuffles the slice in place
    fn shuffle<T>(&mut self, items: &mut [T]);

    /// Draws a random (version 4 layout) UUID
    fn uuid(&mut self) -> Uuid;
}

/// A [`RandomSource`] backed by a seeded `fastrand` generator
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: fastrand::Rng,
    seed: u64,
}

impl SeededRandom {
    /// Creates a source that every replica seeded with `seed` will reproduce
    pub fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            seed,
        }
    }

    /// The seed this source started from
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn shuffle<T>(&mut self, items: &mut [T]) {
        self.rng.shuffle(items);
    }

    fn uuid(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.u128(..).to_le_bytes()).into_uuid()
    }
}
