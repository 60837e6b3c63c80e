//! Operations, resources and the registry the scheduler mutates.
//!
//! Everything here is plain data. The scheduler owns one [`Registry`] behind
//! its lock; nothing in this module blocks or wakes threads except by
//! handing out the per-operation condvar.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Condvar};
use std::thread::ThreadId;

use crate::types::{OperationId, ResourceId};

/// Why a blocked operation cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    OnResource,
    OnJoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    Created,
    Enabled,
    Blocked(BlockReason),
    Completed,
}

/// One logical task of the tested program.
#[derive(Debug)]
pub(crate) struct Operation {
    pub id: OperationId,
    pub status: OperationStatus,
    /// Native thread backing the operation, known once it has started.
    pub thread: Option<ThreadId>,
    /// Parked on while this operation does not hold the turn.
    pub cv: Arc<Condvar>,
    pending_resources: BTreeSet<ResourceId>,
    pending_joins: BTreeSet<OperationId>,
    wait_all: bool,
}

impl Operation {
    pub fn new(id: OperationId) -> Self {
        Operation {
            id,
            status: OperationStatus::Created,
            thread: None,
            cv: Arc::new(Condvar::new()),
            pending_resources: BTreeSet::new(),
            pending_joins: BTreeSet::new(),
            wait_all: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == OperationStatus::Enabled
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.status, OperationStatus::Blocked(_))
    }

    pub fn is_completed(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    pub fn block_on_resources(&mut self, ids: &[ResourceId], wait_all: bool) {
        self.pending_resources = ids.iter().copied().collect();
        self.wait_all = wait_all;
        self.status = OperationStatus::Blocked(BlockReason::OnResource);
    }

    pub fn block_on_join(&mut self, ids: &BTreeSet<OperationId>, wait_all: bool) {
        self.pending_joins = ids.clone();
        self.wait_all = wait_all;
        self.status = OperationStatus::Blocked(BlockReason::OnJoin);
    }

    /// Record a signal on `resource`. Returns true if the operation became
    /// enabled; the caller must then drop it from every other waiting set
    /// listed in `leftover`.
    pub fn resource_signalled(
        &mut self,
        resource: ResourceId,
        leftover: &mut Vec<ResourceId>,
    ) -> bool {
        if self.status != OperationStatus::Blocked(BlockReason::OnResource)
            || !self.pending_resources.remove(&resource)
        {
            return false;
        }
        if self.wait_all && !self.pending_resources.is_empty() {
            return false;
        }
        leftover.extend(std::mem::take(&mut self.pending_resources));
        self.status = OperationStatus::Enabled;
        true
    }

    /// Record the completion of `target`. Returns true if the operation was
    /// joining on it and is now enabled.
    pub fn join_target_completed(&mut self, target: OperationId) -> bool {
        if self.status != OperationStatus::Blocked(BlockReason::OnJoin)
            || !self.pending_joins.remove(&target)
        {
            return false;
        }
        if self.wait_all && !self.pending_joins.is_empty() {
            return false;
        }
        self.pending_joins.clear();
        self.status = OperationStatus::Enabled;
        true
    }
}

/// A blocking synchronization object with a FIFO waiting set.
#[derive(Debug)]
pub(crate) struct Resource {
    pub id: ResourceId,
    waiting: VecDeque<OperationId>,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Resource {
            id,
            waiting: VecDeque::new(),
        }
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiting.is_empty()
    }

    pub fn add_waiter(&mut self, op: OperationId) {
        if !self.waiting.contains(&op) {
            self.waiting.push_back(op);
        }
    }

    pub fn remove_waiter(&mut self, op: OperationId) -> bool {
        match self.waiting.iter().position(|&w| w == op) {
            Some(pos) => {
                self.waiting.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn pop_waiter(&mut self) -> Option<OperationId> {
        self.waiting.pop_front()
    }

    pub fn drain_waiters(&mut self) -> Vec<OperationId> {
        self.waiting.drain(..).collect()
    }
}

/// Operation and resource maps for one iteration.
///
/// Both maps are ordered so that enabled sets are produced in ascending id
/// order regardless of insertion order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub operations: BTreeMap<OperationId, Operation>,
    pub resources: BTreeMap<ResourceId, Resource>,
}

impl Registry {
    pub fn clear(&mut self) {
        self.operations.clear();
        self.resources.clear();
    }

    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.operations.get(&id).map(|op| op.status)
    }

    pub fn enabled_ids(&self) -> Vec<OperationId> {
        self.operations
            .values()
            .filter(|op| op.is_enabled())
            .map(|op| op.id)
            .collect()
    }

    pub fn has_blocked(&self) -> bool {
        self.operations.values().any(Operation::is_blocked)
    }

    /// Deliver a signal on `resource` to `op`, which must already have been
    /// removed from that resource's waiting set. Returns true if `op` was
    /// re-enabled.
    pub fn deliver_signal(&mut self, resource: ResourceId, op: OperationId) -> bool {
        let mut leftover = Vec::new();
        let enabled = match self.operations.get_mut(&op) {
            Some(operation) => operation.resource_signalled(resource, &mut leftover),
            None => false,
        };
        for other in leftover {
            if let Some(res) = self.resources.get_mut(&other) {
                res.remove_waiter(op);
            }
        }
        enabled
    }

    /// Mark `id` completed and release operations joining on it. Returns
    /// the ids that became enabled.
    pub fn complete(&mut self, id: OperationId) -> Vec<OperationId> {
        if let Some(op) = self.operations.get_mut(&id) {
            op.status = OperationStatus::Completed;
        }
        self.operations
            .values_mut()
            .filter_map(|op| op.join_target_completed(id).then_some(op.id))
            .collect()
    }
}
