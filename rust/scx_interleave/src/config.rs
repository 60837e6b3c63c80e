//! Immutable configuration snapshot handed to a [`Scheduler`].
//!
//! A configuration names the exploration strategy, the seed of its random
//! source and the strategy-specific bound (difficulty for the probabilistic
//! strategy, number of priority switch points for PCT). It can be built in
//! code or resolved from the environment:
//!
//! - `SCX_INTERLEAVE_STRATEGY`: `random`, `probabilistic`, `pct` or `dfs`.
//! - `SCX_INTERLEAVE_SEED`: a decimal `u64`, or `entropy` to draw a fresh
//!   seed from the OS (the chosen value is logged so the run can be
//!   reproduced).
//! - `SCX_INTERLEAVE_BOUND`: the strategy bound.
//!
//! [`Scheduler`]: crate::Scheduler

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

/// Default seed used when none is specified.
pub const DEFAULT_SEED: u64 = 42;

/// Default number of fair coins the probabilistic strategy flips before
/// switching away from the previous operation.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Default number of PCT priority change points per iteration.
pub const DEFAULT_PCT_SWITCH_POINTS: u32 = 2;

/// Default estimate of the number of scheduling decisions in one iteration.
/// PCT change points are drawn below this value.
pub const DEFAULT_SCHEDULE_LENGTH: usize = 100;

/// The closed set of exploration strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Random,
    Probabilistic,
    Pct,
    Dfs,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Random => "random",
            StrategyKind::Probabilistic => "probabilistic",
            StrategyKind::Pct => "pct",
            StrategyKind::Dfs => "dfs",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(StrategyKind::Random),
            "probabilistic" | "prob" => Ok(StrategyKind::Probabilistic),
            "pct" => Ok(StrategyKind::Pct),
            "dfs" | "exhaustive" => Ok(StrategyKind::Dfs),
            _ => Err(anyhow!(
                "unknown strategy {s:?}: expected random, probabilistic, pct or dfs"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub strategy: StrategyKind,
    pub seed: u64,
    /// Difficulty (probabilistic) or switch-point count (PCT). `None`
    /// selects the strategy default; ignored by random and DFS.
    pub bound: Option<u32>,
    /// Estimated decisions per iteration, used by PCT.
    pub schedule_length: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            strategy: StrategyKind::Random,
            seed: DEFAULT_SEED,
            bound: None,
            schedule_length: DEFAULT_SCHEDULE_LENGTH,
        }
    }
}

impl Configuration {
    pub fn random(seed: u64) -> Self {
        Configuration {
            strategy: StrategyKind::Random,
            seed,
            ..Default::default()
        }
    }

    pub fn probabilistic(seed: u64, difficulty: u32) -> Self {
        Configuration {
            strategy: StrategyKind::Probabilistic,
            seed,
            bound: Some(difficulty),
            ..Default::default()
        }
    }

    pub fn pct(seed: u64, switch_points: u32) -> Self {
        Configuration {
            strategy: StrategyKind::Pct,
            seed,
            bound: Some(switch_points),
            ..Default::default()
        }
    }

    pub fn dfs() -> Self {
        Configuration {
            strategy: StrategyKind::Dfs,
            seed: 0,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bound(mut self, bound: u32) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn with_schedule_length(mut self, len: usize) -> Self {
        self.schedule_length = len;
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.bound.unwrap_or(DEFAULT_DIFFICULTY)
    }

    pub fn switch_points(&self) -> u32 {
        self.bound.unwrap_or(DEFAULT_PCT_SWITCH_POINTS)
    }

    /// Resolve a configuration from `SCX_INTERLEAVE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok();
        Self::from_vars(
            var("SCX_INTERLEAVE_STRATEGY").as_deref(),
            var("SCX_INTERLEAVE_SEED").as_deref(),
            var("SCX_INTERLEAVE_BOUND").as_deref(),
        )
    }

    fn from_vars(
        strategy: Option<&str>,
        seed: Option<&str>,
        bound: Option<&str>,
    ) -> Result<Self> {
        let mut config = Configuration::default();
        if let Some(s) = strategy.filter(|s| !s.is_empty()) {
            config.strategy = s.parse().context("SCX_INTERLEAVE_STRATEGY")?;
        }
        config.seed = parse_seed(seed).context("SCX_INTERLEAVE_SEED")?;
        if let Some(b) = bound.filter(|b| !b.is_empty()) {
            let b = b
                .parse::<u32>()
                .with_context(|| format!("SCX_INTERLEAVE_BOUND={b:?}: expected a u32"))?;
            config.bound = Some(b);
        }
        Ok(config)
    }
}

/// Parse a seed string: a `u64` integer or `"entropy"` for OS randomness.
///
/// Returns `DEFAULT_SEED` for `None` or empty strings.
pub fn parse_seed(s: Option<&str>) -> Result<u64> {
    match s {
        None | Some("") => Ok(DEFAULT_SEED),
        Some(s) if s.eq_ignore_ascii_case("entropy") => {
            let seed = entropy_seed();
            warn!(
                seed,
                "seed=entropy: seeding from OS randomness \
                 (set SCX_INTERLEAVE_SEED={seed} to reproduce this run)"
            );
            Ok(seed)
        }
        Some(s) => match s.parse::<u64>() {
            Ok(seed) => Ok(seed),
            Err(_) => bail!("seed={s:?}: expected a u64 integer or \"entropy\""),
        },
    }
}

fn entropy_seed() -> u64 {
    use std::io::Read;
    let mut buf = [0u8; 8];
    std::fs::File::open("/dev/urandom")
        .and_then(|mut f| f.read_exact(&mut buf).map(|_| u64::from_le_bytes(buf)))
        .unwrap_or_else(|_| {
            let pid = std::process::id() as u64;
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            (pid << 32) ^ ts
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_roundtrip_names() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::Probabilistic,
            StrategyKind::Pct,
            StrategyKind::Dfs,
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!("PCT".parse::<StrategyKind>().unwrap(), StrategyKind::Pct);
        assert!("fifo".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed(None).unwrap(), DEFAULT_SEED);
        assert_eq!(parse_seed(Some("")).unwrap(), DEFAULT_SEED);
        assert_eq!(parse_seed(Some("7")).unwrap(), 7);
        assert_eq!(
            parse_seed(Some("18446744073709551615")).unwrap(),
            u64::MAX
        );
        assert!(parse_seed(Some("-1")).is_err());
        assert!(parse_seed(Some("abc")).is_err());
        // Entropy draws something; we can only check it parses.
        assert!(parse_seed(Some("ENTROPY")).is_ok());
    }

    #[test]
    fn test_bounds_default_per_strategy() {
        let config = Configuration::default();
        assert_eq!(config.difficulty(), DEFAULT_DIFFICULTY);
        assert_eq!(config.switch_points(), DEFAULT_PCT_SWITCH_POINTS);
        assert_eq!(Configuration::pct(1, 5).switch_points(), 5);
        assert_eq!(Configuration::probabilistic(1, 4).difficulty(), 4);
    }

    #[test]
    fn test_from_vars() {
        let config = Configuration::from_vars(Some("pct"), Some("99"), Some("3")).unwrap();
        assert_eq!(config.strategy, StrategyKind::Pct);
        assert_eq!(config.seed, 99);
        assert_eq!(config.bound, Some(3));

        let config = Configuration::from_vars(None, None, None).unwrap();
        assert_eq!(config, Configuration::default());

        assert!(Configuration::from_vars(Some("bogus"), None, None).is_err());
        assert!(Configuration::from_vars(None, None, Some("x")).is_err());
    }

    #[test]
    fn test_builder() {
        let config = Configuration::random(1)
            .with_seed(5)
            .with_bound(9)
            .with_schedule_length(10);
        assert_eq!(config.seed, 5);
        assert_eq!(config.bound, Some(9));
        assert_eq!(config.schedule_length, 10);
    }
}
