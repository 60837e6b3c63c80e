//! Uniform random exploration.

use crate::random::DetRng;
use crate::types::OperationId;

#[derive(Debug)]
pub struct RandomStrategy {
    rng: DetRng,
    iteration_seed: u64,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        RandomStrategy {
            rng: DetRng::new(seed),
            iteration_seed: seed,
        }
    }

    pub fn next_operation(&mut self, enabled: &[OperationId]) -> OperationId {
        enabled[self.rng.next_index(enabled.len())]
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
