//! Seeded random source shared by every exploration strategy.
//!
//! The generator is `Pcg64Mcg`, whose output is fixed by its seed on every
//! platform. Integer choices use `next() % bound`, which is biased for
//! bounds that are not powers of two. The bias is kept so that a seed
//! captured from an earlier run keeps replaying the same choices.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct DetRng {
    rng: Pcg64Mcg,
}

impl DetRng {
    pub fn new(seed: u64) -> Self {
        DetRng {
            rng: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Reinitialize the stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Pcg64Mcg::seed_from_u64(seed);
    }

    pub fn next(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn next_boolean(&mut self) -> bool {
        self.next() & 1 == 0
    }

    /// Value in `[0, bound)`; 0 when `bound` is 0.
    pub fn next_integer(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next() % bound
    }

    /// Index into a slice of length `len`.
    pub fn next_index(&mut self, len: usize) -> usize {
        self.next_integer(len as u64) as usize
    }
}

impl std::fmt::Debug for DetRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetRng").finish_non_exhaustive()
    }
}
