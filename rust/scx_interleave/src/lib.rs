//! scx_interleave - Controlled-concurrency testing engine.
//!
//! A tested program runs its tasks on native threads but reports every
//! concurrency event (task creation, start, completion, joins, waits on and
//! signals of synchronization resources) to a [`Scheduler`]. The scheduler
//! lets exactly one logical operation run at a time and picks who runs next
//! at each decision point through a seeded exploration strategy, so a run
//! is a reproducible interleaving and a bug found in one iteration replays
//! from its seed.
//!
//! # Architecture
//!
//! - **Scheduler**: lifecycle API, turn passing, deadlock detection
//! - **Strategies**: random, probabilistic, PCT and exhaustive DFS
//! - **Registry**: operations, resources and their waiting sets
//! - **DetRng**: seeded pseudo-random source shared by the strategies
//! - **Fmt**: log lines tagged with the emitting operation
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use scx_interleave::*;
//!
//! let sched = Arc::new(Scheduler::with_config(Configuration::random(7)));
//! for _ in 0..100 {
//!     sched.attach().unwrap();
//!     sched.create_operation(OperationId(1)).unwrap();
//!     let worker = {
//!         let sched = Arc::clone(&sched);
//!         thread::spawn(move || {
//!             sched.start_operation(OperationId(1)).unwrap();
//!             // ... tested code, with sched.schedule_next() at racy points ...
//!             sched.complete_operation(OperationId(1)).unwrap();
//!         })
//!     };
//!     sched.join_operation(OperationId(1)).unwrap();
//!     sched.detach().unwrap();
//!     worker.join().unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod fmt;
mod operation;
pub mod random;
pub mod scheduler;
pub mod strategy;
pub mod types;

pub use config::{parse_seed, Configuration, StrategyKind, DEFAULT_SEED};
pub use error::ErrorCode;
pub use fmt::{current_operation, init_logging, InterleaveFormat};
pub use operation::{BlockReason, OperationStatus};
pub use random::DetRng;
pub use scheduler::Scheduler;
pub use strategy::Strategy;
pub use types::{OperationId, ResourceId, MAIN_OPERATION_ID};
