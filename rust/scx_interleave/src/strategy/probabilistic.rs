//! Random exploration that sticks to the previously scheduled operation.
//!
//! While the previous operation stays enabled, `difficulty` fair coins are
//! flipped and the strategy only switches away when every coin says so. The
//! chance of switching at a decision is therefore `2^-difficulty`, and
//! higher difficulties produce longer uninterrupted runs of one operation.
//!
//! A switch picks uniformly among the enabled operations other than the
//! previous one, so a forced switch always changes operation. Seeds recorded
//! by engines that draw from the whole enabled set do not replay here.

use crate::random::DetRng;
use crate::types::OperationId;

#[derive(Debug)]
pub struct ProbabilisticStrategy {
    rng: DetRng,
    iteration_seed: u64,
    difficulty: u32,
}

impl ProbabilisticStrategy {
    pub fn new(seed: u64, difficulty: u32) -> Self {
        ProbabilisticStrategy {
            rng: DetRng::new(seed),
            iteration_seed: seed,
            difficulty,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn next_operation(
        &mut self,
        enabled: &[OperationId],
        previous: Option<OperationId>,
    ) -> OperationId {
        let prev = match previous.filter(|p| enabled.contains(p)) {
            Some(prev) => prev,
            None => return enabled[self.rng.next_index(enabled.len())],
        };

        // Any "stay" coin keeps the previous operation.
        for _ in 0..self.difficulty {
            if self.rng.next_boolean() {
                return prev;
            }
        }

        if enabled.len() == 1 {
            return prev;
        }
        let others: Vec<OperationId> = enabled.iter().copied().filter(|&o| o != prev).collect();
        others[self.rng.next_index(others.len())]
    }

    pub fn next_boolean(&mut self) -> bool {
        self.rng.next_boolean()
    }

    pub fn next_integer(&mut self, max: u64) -> u64 {
        self.rng.next_integer(max)
    }

    pub fn random_seed(&self) -> u64 {
        self.iteration_seed
    }

    pub fn prepare_next_iteration(&mut self) {
        self.iteration_seed = self.iteration_seed.wrapping_add(1);
        self.rng.reseed(self.iteration_seed);
    }
}
