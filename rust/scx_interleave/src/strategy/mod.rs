//! Exploration strategies.
//!
//! A strategy decides which enabled operation runs next and supplies the
//! controlled booleans and integers the tested program branches on. The
//! variant set is closed: random, probabilistic, PCT and exhaustive DFS.
//! Strategies are only ever driven under the scheduler lock and need no
//! synchronization of their own.

mod dfs;
mod pct;
mod probabilistic;
mod random;

pub use dfs::DfsStrategy;
pub use pct::PctStrategy;
pub use probabilistic::ProbabilisticStrategy;
pub use random::RandomStrategy;

use crate::config::{Configuration, StrategyKind};
use crate::types::OperationId;

#[derive(Debug)]
pub enum Strategy {
    Random(RandomStrategy),
    Probabilistic(ProbabilisticStrategy),
    Pct(PctStrategy),
    Dfs(DfsStrategy),
}

impl Strategy {
    pub fn new(config: &Configuration) -> Self {
        match config.strategy {
            StrategyKind::Random => Strategy::Random(RandomStrategy::new(config.seed)),
            StrategyKind::Probabilistic => Strategy::Probabilistic(ProbabilisticStrategy::new(
                config.seed,
                config.difficulty(),
            )),
            StrategyKind::Pct => Strategy::Pct(PctStrategy::new(
                config.seed,
                config.switch_points(),
                config.schedule_length,
            )),
            StrategyKind::Dfs => Strategy::Dfs(DfsStrategy::new()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Random(_) => StrategyKind::Random,
            Strategy::Probabilistic(_) => StrategyKind::Probabilistic,
            Strategy::Pct(_) => StrategyKind::Pct,
            Strategy::Dfs(_) => StrategyKind::Dfs,
        }
    }

    /// Choose the next operation to run.
    ///
    /// `enabled` must be non-empty; an empty enabled set is a deadlock (or
    /// the end of the iteration) and is handled by the scheduler before any
    /// strategy is consulted.
    pub fn next_operation(
        &mut self,
        enabled: &[OperationId],
        previous: Option<OperationId>,
    ) -> OperationId {
        debug_assert!(!enabled.is_empty(), "strategy consulted with no enabled operation");
        match self {
            Strategy::Random(s) => s.next_operation(enabled),
            Strategy::Probabilistic(s) => s.next_operation(enabled, previous),
            Strategy::Pct(s) => s.next_operation(enabled),
            Strategy::Dfs(s) => s.next_operation(enabled),
        }
    }

    pub fn next_boolean(&mut self) -> bool {
        match self {
            Strategy::Random(s) => s.next_boolean(),
            Strategy::Probabilistic(s) => s.next_boolean(),
            Strategy::Pct(s) => s.next_boolean(),
            Strategy::Dfs(s) => s.next_boolean(),
        }
    }

    /// Value in `[0, max)`; 0 when `max` is 0.
    pub fn next_integer(&mut self, max: u64) -> u64 {
        match self {
            Strategy::Random(s) => s.next_integer(max),
            Strategy::Probabilistic(s) => s.next_integer(max),
            Strategy::Pct(s) => s.next_integer(max),
            Strategy::Dfs(s) => s.next_integer(max),
        }
    }

    /// Seed of the current iteration, for capture and replay.
    pub fn random_seed(&self) -> u64 {
        match self {
            Strategy::Random(s) => s.random_seed(),
            Strategy::Probabilistic(s) => s.random_seed(),
            Strategy::Pct(s) => s.random_seed(),
            Strategy::Dfs(s) => s.random_seed(),
        }
    }

    pub fn prepare_next_iteration(&mut self) {
        match self {
            Strategy::Random(s) => s.prepare_next_iteration(),
            Strategy::Probabilistic(s) => s.prepare_next_iteration(),
            Strategy::Pct(s) => s.prepare_next_iteration(),
            Strategy::Dfs(s) => s.prepare_next_iteration(),
        }
    }

    /// Only DFS can run out of schedules.
    pub fn is_exhausted(&self) -> bool {
        match self {
            Strategy::Dfs(s) => s.is_exhausted(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matches_kind() {
        for config in [
            Configuration::random(1),
            Configuration::probabilistic(1, 3),
            Configuration::pct(1, 2),
            Configuration::dfs(),
        ] {
            assert_eq!(Strategy::new(&config).kind(), config.strategy);
        }
    }

    #[test]
    fn test_every_variant_replays() {
        let enabled: Vec<_> = (0..5).map(OperationId).collect();
        for config in [
            Configuration::random(8),
            Configuration::probabilistic(8, 1),
            Configuration::pct(8, 2).with_schedule_length(10),
            Configuration::dfs(),
        ] {
            let mut a = Strategy::new(&config);
            let mut b = Strategy::new(&config);
            let mut prev_a = None;
            let mut prev_b = None;
            for step in 0..40 {
                let x = a.next_operation(&enabled, prev_a);
                let y = b.next_operation(&enabled, prev_b);
                assert_eq!(x, y, "{}: step {step} diverged", config.strategy);
                assert_eq!(a.next_boolean(), b.next_boolean());
                assert_eq!(a.next_integer(7), b.next_integer(7));
                prev_a = Some(x);
                prev_b = Some(y);
            }
        }
    }

    #[test]
    fn test_prepare_advances_seed() {
        let mut strategy = Strategy::new(&Configuration::probabilistic(41, 2));
        assert_eq!(strategy.random_seed(), 41);
        strategy.prepare_next_iteration();
        assert_eq!(strategy.random_seed(), 42);
        assert!(!strategy.is_exhausted());
    }
}
