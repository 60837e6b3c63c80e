//! Error codes reported by the scheduler.
//!
//! Codes are stable integers so that a foreign caller (or a threading shim)
//! can pass them around without knowing about Rust types. Inside the crate
//! every lifecycle call returns `Result<(), ErrorCode>`; the scheduler also
//! keeps the outcome of the last call as a sticky code.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    /// Generic or internal failure, including detaching while operations
    /// are still blocked.
    Failure = 1,
    /// No operation is enabled but at least one is blocked.
    Deadlock = 2,
    AlreadyAttached = 3,
    NotAttached = 4,
    /// Unknown or duplicate operation id, or an illegal state transition.
    InvalidOperation = 5,
    /// Unknown or duplicate resource id, or deleting a resource that still
    /// has waiters.
    InvalidResource = 6,
}

impl ErrorCode {
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Convert a boundary integer back into a code. Unknown values map to
    /// `Failure`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ErrorCode::Success,
            2 => ErrorCode::Deadlock,
            3 => ErrorCode::AlreadyAttached,
            4 => ErrorCode::NotAttached,
            5 => ErrorCode::InvalidOperation,
            6 => ErrorCode::InvalidResource,
            _ => ErrorCode::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }

    /// Fold a call result into the code recorded as the sticky error.
    pub fn of(result: Result<(), ErrorCode>) -> Self {
        match result {
            Ok(()) => ErrorCode::Success,
            Err(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "success"),
            ErrorCode::Failure => write!(f, "failure"),
            ErrorCode::Deadlock => write!(f, "deadlock detected"),
            ErrorCode::AlreadyAttached => write!(f, "scheduler is already attached"),
            ErrorCode::NotAttached => write!(f, "scheduler is not attached"),
            ErrorCode::InvalidOperation => write!(f, "invalid operation"),
            ErrorCode::InvalidResource => write!(f, "invalid resource"),
        }
    }
}

impl std::error::Error for ErrorCode {}
