#![allow(dead_code)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use scx_interleave::{init_logging, ErrorCode, OperationId, ResourceId, Scheduler};

pub type OperationThread = JoinHandle<Result<(), ErrorCode>>;

/// Initialize tracing from `RUST_LOG`. Later calls are ignored.
pub fn setup_test() {
    init_logging();
}

/// Register operation `id` and run `body` under it on a new thread. The
/// thread starts, runs `body`, and completes the operation; the first
/// error ends it early.
///
/// A panic in `body` still completes the operation so the rest of the
/// program can finish, then resumes unwinding: the test fails when the
/// thread is joined instead of hanging in a join on the dead operation.
pub fn spawn_operation<F>(sched: &Arc<Scheduler>, id: u64, body: F) -> OperationThread
where
    F: FnOnce(&Scheduler) -> Result<(), ErrorCode> + Send + 'static,
{
    let id = OperationId(id);
    sched.create_operation(id).unwrap();
    let sched = Arc::clone(sched);
    thread::spawn(move || {
        sched.start_operation(id)?;
        match panic::catch_unwind(AssertUnwindSafe(|| body(&sched))) {
            Ok(result) => {
                result?;
                sched.complete_operation(id)
            }
            Err(payload) => {
                let _ = sched.complete_operation(id);
                panic::resume_unwind(payload)
            }
        }
    })
}

/// Run one attached iteration. `body` runs as operation 0 and returns the
/// threads it spawned; they are joined after detach. Returns the detach
/// outcome.
pub fn run_iteration<F>(sched: &Arc<Scheduler>, body: F) -> Result<(), ErrorCode>
where
    F: FnOnce(&Arc<Scheduler>) -> Vec<OperationThread>,
{
    sched.attach().unwrap();
    let threads = body(sched);
    let result = sched.detach();
    for t in threads {
        let _ = t.join().expect("operation thread panicked");
    }
    result
}

pub fn ops(ids: impl IntoIterator<Item = u64>) -> Vec<OperationId> {
    ids.into_iter().map(OperationId).collect()
}

/// Lock for state shared by the tested program. Only the operation holding
/// the turn touches it, so contention never happens; poison from a failed
/// assertion in another thread is ignored.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutual exclusion built on a scheduler resource, the way a tested program
/// would model a lock.
pub struct ControlledLock {
    resource: ResourceId,
    held: Mutex<bool>,
}

impl ControlledLock {
    pub fn new(sched: &Scheduler, resource: u64) -> Self {
        let resource = ResourceId(resource);
        sched.create_resource(resource).unwrap();
        ControlledLock {
            resource,
            held: Mutex::new(false),
        }
    }

    pub fn acquire(&self, sched: &Scheduler) -> Result<(), ErrorCode> {
        sched.schedule_next()?;
        loop {
            let mut held = lock(&self.held);
            if !*held {
                *held = true;
                return Ok(());
            }
            drop(held);
            sched.wait_resource(self.resource)?;
        }
    }

    pub fn release(&self, sched: &Scheduler) -> Result<(), ErrorCode> {
        *lock(&self.held) = false;
        sched.signal_resource(self.resource)?;
        sched.schedule_next()
    }
}

/// Counting semaphore built on a scheduler resource.
pub struct ControlledSemaphore {
    resource: ResourceId,
    permits: Mutex<usize>,
}

impl ControlledSemaphore {
    pub fn new(sched: &Scheduler, resource: u64, permits: usize) -> Self {
        let resource = ResourceId(resource);
        sched.create_resource(resource).unwrap();
        ControlledSemaphore {
            resource,
            permits: Mutex::new(permits),
        }
    }

    pub fn acquire(&self, sched: &Scheduler) -> Result<(), ErrorCode> {
        sched.schedule_next()?;
        loop {
            let mut permits = lock(&self.permits);
            if *permits > 0 {
                *permits -= 1;
                return Ok(());
            }
            drop(permits);
            sched.wait_resource(self.resource)?;
        }
    }

    pub fn release(&self, sched: &Scheduler) -> Result<(), ErrorCode> {
        *lock(&self.permits) += 1;
        sched.signal_resource(self.resource)?;
        sched.schedule_next()
    }
}
