//! Controlled scheduling of real threads via turn passing.
//!
//! The tested program runs its tasks on ordinary OS threads, but only the
//! operation holding the turn executes tested code. Every lifecycle call
//! takes the scheduler lock, updates the registry, and either returns to a
//! caller that holds the turn or parks the caller on its operation's
//! condvar until a later decision selects it.
//!
//! ## Determinism
//!
//! Decisions depend only on the registry and the strategy:
//! - the enabled set is presented in ascending id order;
//! - no decision is taken while a created operation has not yet called
//!   `start_operation`, so thread start-up timing never changes the
//!   enabled set;
//! - the strategy's random source is seeded per iteration.
//!
//! Same seed and same program therefore give the same interleaving, and
//! [`Scheduler::random_seed`] captured after a failing iteration replays it
//! on a fresh scheduler.
//!
//! ## Suspension points
//!
//! A thread can only be parked in `start_operation` (waiting for its first
//! turn), `schedule_next`, `wait_resource(s)` and `join_operation(s)`.
//! Detach and deadlock detection release every parked thread.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::{debug, error, info, trace, warn};

use crate::config::Configuration;
use crate::error::ErrorCode;
use crate::fmt;
use crate::operation::{Operation, OperationStatus, Registry, Resource};
use crate::strategy::Strategy;
use crate::types::{OperationId, ResourceId, MAIN_OPERATION_ID};

type Guard<'a> = MutexGuard<'a, SchedulerState>;
type DetachHook = Arc<dyn Fn() + Send + Sync>;

struct SchedulerState {
    config: Configuration,
    registry: Registry,
    strategy: Strategy,
    /// Operation holding the turn.
    scheduled: Option<OperationId>,
    /// Created operations that have not called `start_operation` yet.
    pending_starts: usize,
    attached: bool,
    deadlocked: bool,
    /// Bumped on every attach and detach; parked threads compare it to
    /// notice teardown.
    epoch: u64,
    iterations: u64,
    last_error: ErrorCode,
    /// Threads released by a detach that have not run an operation since.
    /// Their late calls never write the sticky code, even after a later
    /// attach.
    released_threads: HashSet<ThreadId>,
    detach_hooks: Vec<DetachHook>,
}

impl SchedulerState {
    fn check_attached(&self) -> Result<(), ErrorCode> {
        if !self.attached {
            return Err(ErrorCode::NotAttached);
        }
        if self.deadlocked {
            return Err(ErrorCode::Deadlock);
        }
        Ok(())
    }

    fn record(&mut self, result: Result<(), ErrorCode>) -> Result<(), ErrorCode> {
        if self.released_threads.contains(&thread::current().id()) {
            return result;
        }
        self.last_error = ErrorCode::of(result);
        result
    }

    /// The operation holding the turn, which must be run by the caller.
    fn turn_holder(&self) -> Result<OperationId, ErrorCode> {
        let Some(id) = self.scheduled else {
            warn!("lifecycle call with no operation holding the turn");
            return Err(ErrorCode::InvalidOperation);
        };
        let me = thread::current().id();
        match self.registry.operations.get(&id) {
            Some(op) if op.thread.is_some_and(|t| t != me) => {
                warn!("{id} holds the turn but the call came from another thread");
                Err(ErrorCode::InvalidOperation)
            }
            Some(_) => Ok(id),
            None => Err(ErrorCode::InvalidOperation),
        }
    }

    fn wake(&self, id: OperationId) {
        if let Some(op) = self.registry.operations.get(&id) {
            op.cv.notify_all();
        }
    }

    fn wake_all(&self) {
        for op in self.registry.operations.values() {
            op.cv.notify_all();
        }
    }

    fn report_deadlock(&mut self) {
        self.deadlocked = true;
        let blocked: Vec<u64> = self
            .registry
            .operations
            .values()
            .filter(|op| op.is_blocked())
            .map(|op| op.id.0)
            .collect();
        error!(
            iteration = self.iterations,
            seed = self.strategy.random_seed(),
            "deadlock: no enabled operation, blocked {blocked:?}"
        );
        self.wake_all();
    }

    fn attach(&mut self) -> Result<(), ErrorCode> {
        if self.attached {
            warn!("attach while already attached");
            return Err(ErrorCode::AlreadyAttached);
        }
        if self.iterations > 0 {
            self.strategy.prepare_next_iteration();
        }
        self.iterations += 1;
        self.epoch += 1;
        self.attached = true;
        self.deadlocked = false;
        self.pending_starts = 0;
        self.released_threads.remove(&thread::current().id());

        let mut main = Operation::new(MAIN_OPERATION_ID);
        main.status = OperationStatus::Enabled;
        main.thread = Some(thread::current().id());
        self.registry.operations.insert(MAIN_OPERATION_ID, main);
        self.scheduled = Some(MAIN_OPERATION_ID);
        fmt::install_operation(MAIN_OPERATION_ID);

        info!(
            iteration = self.iterations,
            seed = self.strategy.random_seed(),
            strategy = %self.strategy.kind(),
            "attached"
        );
        Ok(())
    }

    fn detach(&mut self) -> Result<(), ErrorCode> {
        if !self.attached {
            warn!("detach while not attached");
            return Err(ErrorCode::NotAttached);
        }
        let blocked = self.registry.has_blocked();
        let deadlocked = self.deadlocked;

        self.attached = false;
        self.epoch += 1;
        self.scheduled = None;
        self.pending_starts = 0;

        let me = thread::current().id();
        for op in self.registry.operations.values() {
            if let Some(t) = op.thread.filter(|&t| t != me) {
                self.released_threads.insert(t);
            }
        }
        self.wake_all();
        self.registry.clear();
        fmt::uninstall_operation();

        info!(
            iteration = self.iterations,
            seed = self.strategy.random_seed(),
            "detached"
        );
        if deadlocked {
            Err(ErrorCode::Deadlock)
        } else if blocked {
            warn!("detached with blocked operations");
            Err(ErrorCode::Failure)
        } else {
            Ok(())
        }
    }

    fn create_operation(&mut self, id: OperationId) -> Result<(), ErrorCode> {
        self.check_attached()?;
        if self.registry.operations.contains_key(&id) {
            warn!("{id} already exists");
            return Err(ErrorCode::InvalidOperation);
        }
        self.registry.operations.insert(id, Operation::new(id));
        self.pending_starts += 1;
        debug!("created {id}");
        Ok(())
    }

    fn create_resource(&mut self, id: ResourceId) -> Result<(), ErrorCode> {
        self.check_attached()?;
        if self.registry.resources.contains_key(&id) {
            warn!("{id} already exists");
            return Err(ErrorCode::InvalidResource);
        }
        self.registry.resources.insert(id, Resource::new(id));
        debug!("created {id}");
        Ok(())
    }

    fn delete_resource(&mut self, id: ResourceId) -> Result<(), ErrorCode> {
        self.check_attached()?;
        match self.registry.resources.get(&id) {
            None => return Err(ErrorCode::InvalidResource),
            Some(res) if res.has_waiters() => {
                warn!("{} still has waiters", res.id);
                return Err(ErrorCode::InvalidResource);
            }
            Some(_) => {}
        }
        self.registry.resources.remove(&id);
        debug!("deleted {id}");
        Ok(())
    }

    fn signal_resource(&mut self, id: ResourceId) -> Result<(), ErrorCode> {
        self.check_attached()?;
        let res = self
            .registry
            .resources
            .get_mut(&id)
            .ok_or(ErrorCode::InvalidResource)?;
        if let Some(waiter) = res.pop_waiter() {
            if self.registry.deliver_signal(id, waiter) {
                debug!("{id} signalled, {waiter} enabled");
            }
        }
        Ok(())
    }

    fn signal_resource_operation(
        &mut self,
        id: ResourceId,
        op: OperationId,
    ) -> Result<(), ErrorCode> {
        self.check_attached()?;
        let res = self
            .registry
            .resources
            .get_mut(&id)
            .ok_or(ErrorCode::InvalidResource)?;
        if !res.remove_waiter(op) {
            warn!("{op} is not waiting on {id}");
            return Err(ErrorCode::InvalidOperation);
        }
        if self.registry.deliver_signal(id, op) {
            debug!("{id} signalled, {op} enabled");
        }
        Ok(())
    }

    fn broadcast_resource(&mut self, id: ResourceId) -> Result<(), ErrorCode> {
        self.check_attached()?;
        let res = self
            .registry
            .resources
            .get_mut(&id)
            .ok_or(ErrorCode::InvalidResource)?;
        for waiter in res.drain_waiters() {
            self.registry.deliver_signal(id, waiter);
        }
        debug!("{id} broadcast");
        Ok(())
    }
}

/// Controlled-concurrency scheduler for one tested program.
///
/// Share it between the program's threads as `Arc<Scheduler>`. Independent
/// schedulers can coexist in one process.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    /// Signalled when an operation starts and on teardown.
    started: Condvar,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler with the default configuration (random strategy,
    /// [`DEFAULT_SEED`](crate::config::DEFAULT_SEED)).
    pub fn new() -> Self {
        Self::with_config(Configuration::default())
    }

    pub fn with_config(config: Configuration) -> Self {
        let strategy = Strategy::new(&config);
        Scheduler {
            state: Mutex::new(SchedulerState {
                config,
                registry: Registry::default(),
                strategy,
                scheduled: None,
                pending_starts: 0,
                attached: false,
                deadlocked: false,
                epoch: 0,
                iterations: 0,
                last_error: ErrorCode::Success,
                released_threads: HashSet::new(),
                detach_hooks: Vec::new(),
            }),
            started: Condvar::new(),
        }
    }

    fn lock(&self) -> Guard<'_> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park until `id` holds the turn, the iteration ends, or a deadlock is
    /// reported.
    fn wait_for_turn<'a>(
        &self,
        mut state: Guard<'a>,
        id: OperationId,
    ) -> (Guard<'a>, Result<(), ErrorCode>) {
        let epoch = state.epoch;
        let cv = match state.registry.operations.get(&id) {
            Some(op) => Arc::clone(&op.cv),
            None => return (state, Err(ErrorCode::InvalidOperation)),
        };
        loop {
            if state.epoch != epoch {
                return (state, Err(ErrorCode::NotAttached));
            }
            if state.deadlocked {
                return (state, Err(ErrorCode::Deadlock));
            }
            if state.scheduled == Some(id) {
                return (state, Ok(()));
            }
            state = cv.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Park until every created operation has started.
    fn wait_for_starts<'a>(&self, mut state: Guard<'a>) -> (Guard<'a>, Result<(), ErrorCode>) {
        let epoch = state.epoch;
        while state.pending_starts > 0 {
            if state.epoch != epoch {
                return (state, Err(ErrorCode::NotAttached));
            }
            if state.deadlocked {
                return (state, Err(ErrorCode::Deadlock));
            }
            state = self
                .started
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        (state, Ok(()))
    }

    /// Give up the turn held by `current`, let the strategy pick the next
    /// operation, and park `current` until it is picked again (unless it has
    /// completed).
    fn schedule<'a>(
        &self,
        state: Guard<'a>,
        current: OperationId,
    ) -> (Guard<'a>, Result<(), ErrorCode>) {
        let (mut state, res) = self.wait_for_starts(state);
        if res.is_err() {
            return (state, res);
        }

        let enabled = state.registry.enabled_ids();
        if enabled.is_empty() {
            if state.registry.has_blocked() {
                state.report_deadlock();
                self.started.notify_all();
                return (state, Err(ErrorCode::Deadlock));
            }
            debug!("all operations completed");
            state.scheduled = None;
            return (state, Ok(()));
        }

        let next = state.strategy.next_operation(&enabled, Some(current));
        trace!("schedule {current} -> {next}, enabled {enabled:?}");
        state.scheduled = Some(next);
        if next != current {
            state.wake(next);
        }

        let completed = state
            .registry
            .operations
            .get(&current)
            .map_or(true, Operation::is_completed);
        if completed {
            return (state, Ok(()));
        }
        self.wait_for_turn(state, current)
    }

    /// Begin an iteration. The calling thread becomes operation 0 and holds
    /// the turn.
    pub fn attach(&self) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.attach();
        state.record(result)
    }

    /// End the iteration: clear the registry, release every parked thread
    /// and run the detach hooks.
    ///
    /// Returns `Deadlock` if the iteration deadlocked and `Failure` if
    /// operations were still blocked; teardown happens in every case.
    pub fn detach(&self) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.detach();
        let hooks = match result {
            Err(ErrorCode::NotAttached) => Vec::new(),
            _ => state.detach_hooks.clone(),
        };
        let result = state.record(result);
        drop(state);

        self.started.notify_all();
        for hook in hooks {
            hook();
        }
        result
    }

    /// Register an operation in `Created` status.
    pub fn create_operation(&self, id: OperationId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.create_operation(id);
        state.record(result)
    }

    /// Called on the operation's own thread: enable it and park until it
    /// is first given the turn.
    pub fn start_operation(&self, id: OperationId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        if let Err(e) = state.check_attached() {
            return state.record(Err(e));
        }
        match state.registry.operations.get_mut(&id) {
            Some(op) if op.status == OperationStatus::Created => {
                op.status = OperationStatus::Enabled;
                op.thread = Some(thread::current().id());
                state.released_threads.remove(&thread::current().id());
            }
            Some(_) => {
                warn!("{id} started twice");
                return state.record(Err(ErrorCode::InvalidOperation));
            }
            None => {
                warn!("start of unknown {id}");
                return state.record(Err(ErrorCode::InvalidOperation));
            }
        }
        state.pending_starts = state.pending_starts.saturating_sub(1);
        self.started.notify_all();
        fmt::install_operation(id);
        debug!("started {id}");

        let (mut state, result) = self.wait_for_turn(state, id);
        state.record(result)
    }

    /// The principal decision point: yield the turn and wait for it to come
    /// back.
    pub fn schedule_next(&self) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let current = match state.check_attached().and_then(|()| state.turn_holder()) {
            Ok(current) => current,
            Err(e) => return state.record(Err(e)),
        };
        let (mut state, result) = self.schedule(state, current);
        state.record(result)
    }

    pub fn join_operation(&self, id: OperationId) -> Result<(), ErrorCode> {
        self.join_operations(&[id], true)
    }

    /// Park the caller until all (or, with `wait_all == false`, any) of
    /// `ids` have completed. Returns immediately if that already holds.
    pub fn join_operations(&self, ids: &[OperationId], wait_all: bool) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let current = match state.check_attached().and_then(|()| state.turn_holder()) {
            Ok(current) => current,
            Err(e) => return state.record(Err(e)),
        };

        let mut targets = BTreeSet::new();
        for &id in ids {
            if id == current || !state.registry.operations.contains_key(&id) {
                warn!("{current} cannot join {id}");
                return state.record(Err(ErrorCode::InvalidOperation));
            }
            targets.insert(id);
        }
        let pending: BTreeSet<OperationId> = targets
            .iter()
            .copied()
            .filter(|id| !state.registry.operations[id].is_completed())
            .collect();
        let satisfied = if wait_all {
            pending.is_empty()
        } else {
            targets.is_empty() || pending.len() < targets.len()
        };
        if satisfied {
            return state.record(Ok(()));
        }

        if let Some(op) = state.registry.operations.get_mut(&current) {
            op.block_on_join(&pending, wait_all);
        }
        debug!("{current} joining {pending:?} (wait_all={wait_all})");
        let (mut state, result) = self.schedule(state, current);
        state.record(result)
    }

    /// Called by the operation's own thread when it finishes. Releases its
    /// joiners and hands the turn on without waiting.
    pub fn complete_operation(&self, id: OperationId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let current = match state.check_attached().and_then(|()| state.turn_holder()) {
            Ok(current) => current,
            Err(e) => return state.record(Err(e)),
        };
        if id != current || state.registry.status(id) != Some(OperationStatus::Enabled) {
            warn!("{id} cannot complete (turn held by {current})");
            return state.record(Err(ErrorCode::InvalidOperation));
        }

        let released = state.registry.complete(id);
        debug!("completed {id}, released joiners {released:?}");
        fmt::uninstall_operation();
        let (mut state, result) = self.schedule(state, current);
        state.record(result)
    }

    pub fn create_resource(&self, id: ResourceId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.create_resource(id);
        state.record(result)
    }

    /// Unregister a resource. Fails while operations are waiting on it.
    pub fn delete_resource(&self, id: ResourceId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.delete_resource(id);
        state.record(result)
    }

    pub fn wait_resource(&self, id: ResourceId) -> Result<(), ErrorCode> {
        self.wait_resources(&[id], true)
    }

    /// Block the caller on `ids` and yield the turn. It becomes enabled
    /// again once signalled on all of them (or on any, with
    /// `wait_all == false`).
    pub fn wait_resources(&self, ids: &[ResourceId], wait_all: bool) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let current = match state.check_attached().and_then(|()| state.turn_holder()) {
            Ok(current) => current,
            Err(e) => return state.record(Err(e)),
        };
        if ids.iter().any(|id| !state.registry.resources.contains_key(id)) {
            return state.record(Err(ErrorCode::InvalidResource));
        }
        let ids: Vec<ResourceId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return state.record(Ok(()));
        }

        for id in &ids {
            if let Some(res) = state.registry.resources.get_mut(id) {
                res.add_waiter(current);
            }
        }
        if let Some(op) = state.registry.operations.get_mut(&current) {
            op.block_on_resources(&ids, wait_all);
        }
        debug!("{current} waiting on {ids:?} (wait_all={wait_all})");
        let (mut state, result) = self.schedule(state, current);
        state.record(result)
    }

    /// Re-enable the longest-waiting operation on `id`, if any. Never
    /// yields.
    pub fn signal_resource(&self, id: ResourceId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.signal_resource(id);
        state.record(result)
    }

    /// Re-enable `op`, which must be waiting on `id`. Never yields.
    pub fn signal_resource_operation(
        &self,
        id: ResourceId,
        op: OperationId,
    ) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.signal_resource_operation(id, op);
        state.record(result)
    }

    /// Signal every operation waiting on `id`. Never yields.
    pub fn broadcast_resource(&self, id: ResourceId) -> Result<(), ErrorCode> {
        let mut state = self.lock();
        let result = state.broadcast_resource(id);
        state.record(result)
    }

    /// Controlled boolean from the active strategy.
    pub fn next_boolean(&self) -> bool {
        self.lock().strategy.next_boolean()
    }

    /// Controlled integer in `[0, max)` from the active strategy.
    pub fn next_integer(&self, max: u64) -> u64 {
        self.lock().strategy.next_integer(max)
    }

    /// Seed of the current (or just finished) iteration.
    pub fn random_seed(&self) -> u64 {
        self.lock().strategy.random_seed()
    }

    /// Outcome of the last lifecycle call.
    pub fn error_code(&self) -> ErrorCode {
        self.lock().last_error
    }

    /// Run `hook` after every detach. Collaborators that allocate ids on
    /// top of the scheduler reset their counters here.
    pub fn on_detach(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.lock().detach_hooks.push(Arc::new(hook));
    }

    pub fn operation_status(&self, id: OperationId) -> Option<OperationStatus> {
        self.lock().registry.status(id)
    }

    pub fn scheduled_operation(&self) -> Option<OperationId> {
        self.lock().scheduled
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// Number of iterations started so far.
    pub fn iteration(&self) -> u64 {
        self.lock().iterations
    }

    /// True once an exhaustive strategy has explored every schedule.
    pub fn is_exhausted(&self) -> bool {
        self.lock().strategy.is_exhausted()
    }

    pub fn config(&self) -> Configuration {
        self.lock().config.clone()
    }
}
