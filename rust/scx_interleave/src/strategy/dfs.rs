//! Exhaustive depth-first exploration.
//!
//! Every decision (which operation runs, or a controlled boolean/integer)
//! is a choice point. An iteration replays the recorded path and extends it
//! with first choices past its end. Between iterations the deepest choice
//! point with an untried alternative is advanced and everything below it is
//! dropped, so each complete interleaving is visited exactly once. The cost
//! is exponential, which limits this strategy to small bounded programs.

use tracing::{debug, warn};

use crate::types::OperationId;

#[derive(Debug, Clone, Copy)]
struct ChoicePoint {
    options: usize,
    chosen: usize,
}

#[derive(Debug, Default)]
pub struct DfsStrategy {
    path: Vec<ChoicePoint>,
    depth: usize,
    iteration: u64,
    exhausted: bool,
}

impl DfsStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn choose(&mut self, options: usize) -> usize {
        let options = options.max(1);
        let index = match self.path.get_mut(self.depth) {
            Some(point) => {
                if point.options != options {
                    // The program is not deterministic under our control.
                    warn!(
                        depth = self.depth,
                        recorded = point.options,
                        observed = options,
                        "dfs replay diverged"
                    );
                    point.options = options;
                    point.chosen = point.chosen.min(options - 1);
                }
                point.chosen
            }
            None => {
                self.path.push(ChoicePoint { options, chosen: 0 });
                0
            }
        };
        self.depth += 1;
        index
    }

    pub fn next_operation(&mut self, enabled: &[OperationId]) -> OperationId {
        enabled[self.choose(enabled.len())]
    }

    pub fn next_boolean(&mut self) -> bool {
        self.choose(2) == 1
    }

    pub fn next_integer(&mut self, max: u64) -> u64 {
        if max == 0 {
            return 0;
        }
        self.choose(max as usize) as u64
    }

    /// Iteration index; DFS has no random seed.
    pub fn random_seed(&self) -> u64 {
        self.iteration
    }

    /// Whether every path of the schedule tree has been explored. Becomes
    /// true as soon as the last path has been walked, before the next
    /// iteration starts.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
            || (self.depth > 0
                && self
                    .path
                    .iter()
                    .take(self.depth)
                    .all(|p| p.chosen + 1 >= p.options))
    }

    pub fn prepare_next_iteration(&mut self) {
        self.path.truncate(self.depth);
        while let Some(last) = self.path.last_mut() {
            if last.chosen + 1 < last.options {
                last.chosen += 1;
                break;
            }
            self.path.pop();
        }
        if self.path.is_empty() {
            self.exhausted = true;
            debug!(iterations = self.iteration + 1, "dfs schedule tree exhausted");
        }
        self.depth = 0;
        self.iteration += 1;
    }
}
