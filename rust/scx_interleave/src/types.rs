//! Newtype wrappers for the identifiers the tested program hands us.
//!
//! Operation and resource ids are both plain `u64`s at the boundary. The
//! newtypes keep a resource id from being passed where an operation id is
//! expected.

use std::fmt;

/// Identifier of one logical concurrent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

/// Identifier of a blocking synchronization object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// The operation registered for the thread that calls `attach()`.
pub const MAIN_OPERATION_ID: OperationId = OperationId(0);

impl OperationId {
    pub fn is_main(self) -> bool {
        self == MAIN_OPERATION_ID
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res{}", self.0)
    }
}

impl From<u64> for OperationId {
    fn from(id: u64) -> Self {
        OperationId(id)
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        ResourceId(id)
    }
}
