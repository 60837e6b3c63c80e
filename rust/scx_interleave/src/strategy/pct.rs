//! Priority-based exploration (PCT).
//!
//! Every operation gets a distinct priority the first time it is seen
//! enabled, and each decision runs the highest-priority enabled operation.
//! At `switch_points` step indices drawn at the start of the iteration, the
//! operation just chosen is demoted below every other, which forces a
//! switch at the next decision if anything else is enabled. Bounding the
//! number of demotions to `d` gives a probabilistic guarantee of hitting any
//! bug that needs at most `d` forced reorderings.
//!
//! All per-iteration state (priorities and change points) comes from the
//! iteration seed, so an iteration replays from its seed alone.

use std::collections::BTreeSet;

use tracing::trace;

use crate::random::DetRng;
use crate::types::OperationId;

#[derive(Debug)]
pub struct PctStrategy {
    rng: DetRng,
    iteration_seed: u64,
    switch_points: u32,
    schedule_length: usize,
    /// Decisions taken so far in this iteration.
    scheduled_steps: usize,
    /// Operations in descending priority; index 0 runs first.
    prioritized: Vec<OperationId>,
    change_points: BTreeSet<usize>,
    demotions: u32,
}

impl PctStrategy {
    pub fn new(seed: u64, switch_points: u32, schedule_length: usize) -> Self {
        let mut strategy = PctStrategy {
            rng: DetRng::new(seed),
            iteration_seed: seed,
            switch_points,
            schedule_length,
            scheduled_steps: 0,
            prioritized: Vec::new(),
            change_points: BTreeSet::new(),
            demotions: 0,
        };
        strategy.draw_change_points();
        strategy
    }

    /// Pick `switch_points` distinct step indices below the schedule-length
    /// estimate.
    fn draw_change_points(&mut self) {
        let count = (self.switch_points as usize).min(self.schedule_length);
        while self.change_points.len() < count {
            let step = self.rng.next_index(self.schedule_length);
            self.change_points.insert(step);
        }
        trace!(
            seed = self.iteration_seed,
            "pct change points {:?}",
            self.change_points
        );
    }

    /// Give unseen operations a rank: each lands at a random position of the
    /// priority list, i.e. draws a random unused rank.
    fn assign_priorities(&mut self, enabled: &[OperationId]) {
        for &op in enabled {
            if !self.prioritized.contains(&op) {
                let pos = self.rng.next_index(self.prioritized.len() + 1);
                self.prioritized.insert(pos, op);
            }
        }
    }

    pub fn next_operation(&mut self, enabled: &[OperationId]) -> OperationId {
        self.assign_priorities(enabled);

        let chosen = self
            .prioritized
            .iter()
            .copied()
            .find(|op| enabled.contains(op))
            .unwrap_or(enabled[0]);

        if self.change_points.remove(&self.scheduled_steps) {
            self.demote(chosen);
        }
        self.scheduled_steps += 1;
        chosen
    }

    fn demote(&mut self, op: OperationId) {
        if let Some(pos) = self.prioritized.iter().position(|&o| o == op) {
            self.prioritized.remove(pos);
            self.prioritized.push(op);
            self.demotions += 1;
            trace!(
                step = self.scheduled_steps,
                "pct demoted {op} to lowest priority"
            );
        }
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

    /// Priority demotions performed in the current iteration.
    pub fn demotions(&self) -> u32 {
        self.demotions
    }

    /// Current priority order, highest first.
    pub fn priorities(&self) -> &[OperationId] {
        &self.prioritized
    }

    pub fn prepare_next_iteration(&mut self) {
        self.iteration_seed = self.iteration_seed.wrapping_add(1);
        self.rng.reseed(self.iteration_seed);
        self.scheduled_steps = 0;
        self.prioritized.clear();
        self.change_points.clear();
        self.demotions = 0;
        self.draw_change_points();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(n: u64) -> Vec<OperationId> {
        (1..=n).map(OperationId).collect()
    }

    #[test]
    fn test_no_switch_points_runs_one_operation() {
        let enabled = ops(3);
        let mut strategy = PctStrategy::new(9, 0, 100);
        let first = strategy.next_operation(&enabled);
        for _ in 0..100 {
            assert_eq!(strategy.next_operation(&enabled), first);
        }
        assert_eq!(strategy.demotions(), 0);
    }

    #[test]
    fn test_demotions_bounded_by_switch_points() {
        for seed in 0..50 {
            let mut strategy = PctStrategy::new(seed, 3, 20);
            let enabled = ops(4);
            for _ in 0..60 {
                strategy.next_operation(&enabled);
            }
            assert!(
                strategy.demotions() <= 3,
                "seed {seed}: {} demotions",
                strategy.demotions()
            );
            strategy.prepare_next_iteration();
            assert_eq!(strategy.demotions(), 0);
        }
    }

    #[test]
    fn test_all_change_points_fire_within_estimate() {
        let mut strategy = PctStrategy::new(3, 3, 10);
        let enabled = ops(3);
        for _ in 0..10 {
            strategy.next_operation(&enabled);
        }
        assert_eq!(strategy.demotions(), 3);
    }

    #[test]
    fn test_demotion_forces_switch() {
        // Find a seed with a change point at step 0.
        let seed = (0..1_000)
            .find(|&s| PctStrategy::new(s, 1, 4).change_points.contains(&0))
            .expect("no seed with a change point at step 0");
        let mut strategy = PctStrategy::new(seed, 1, 4);
        let enabled = ops(2);
        let first = strategy.next_operation(&enabled);
        let second = strategy.next_operation(&enabled);
        assert_ne!(first, second, "demoted operation kept running");
        assert_eq!(strategy.priorities().last(), Some(&first));
    }

    #[test]
    fn test_priorities_unique_and_lazy() {
        let mut strategy = PctStrategy::new(11, 2, 50);
        strategy.next_operation(&ops(2));
        assert_eq!(strategy.priorities().len(), 2);
        strategy.next_operation(&ops(5));
        let prios = strategy.priorities();
        assert_eq!(prios.len(), 5);
        let unique: BTreeSet<_> = prios.iter().collect();
        assert_eq!(unique.len(), 5, "duplicate ranks: {prios:?}");
    }

    #[test]
    fn test_highest_priority_enabled_wins() {
        let mut strategy = PctStrategy::new(4, 0, 10);
        strategy.next_operation(&ops(3));
        let order = strategy.priorities().to_vec();
        // Drop the top operation from the enabled set: the runner-up wins.
        let mut enabled: Vec<_> = order[1..].to_vec();
        enabled.sort();
        assert_eq!(strategy.next_operation(&enabled), order[1]);
    }

    #[test]
    fn test_iteration_replays_from_seed() {
        let enabled = ops(4);
        let mut strategy = PctStrategy::new(50, 2, 16);
        strategy.prepare_next_iteration();
        let run: Vec<_> = (0..30).map(|_| strategy.next_operation(&enabled)).collect();

        let mut fresh = PctStrategy::new(strategy.random_seed(), 2, 16);
        let replay: Vec<_> = (0..30).map(|_| fresh.next_operation(&enabled)).collect();
        assert_eq!(run, replay);
    }
}
