use std::error::Error;
use std::fmt;

use blockalloc::BlockError;
use scavheap::AllocError;

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    BadAllocationRequest,
    OutOfMemory,
    BoundsError,
    InvalidString,
}

/// The object-model error type. Recoverable conditions travel through this;
/// fatal configuration errors (illegal header states, over-wide method
/// heights) abort with a panic instead.
#[derive(Debug, PartialEq)]
pub struct RuntimeError {
    kind: ErrorKind,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> RuntimeError {
        RuntimeError { kind }
    }

    pub fn error_kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::OutOfMemory => write!(f, "Out of memory!"),
            ErrorKind::BadAllocationRequest => {
                write!(f, "An invalid memory size allocation was requested!")
            }
            ErrorKind::BoundsError => write!(f, "Indexing bounds error"),
            ErrorKind::InvalidString => write!(f, "String content is not valid UTF-8"),
        }
    }
}

/// Convert from BlockError
impl From<BlockError> for RuntimeError {
    fn from(other: BlockError) -> RuntimeError {
        match other {
            BlockError::OOM => RuntimeError::new(ErrorKind::OutOfMemory),
            BlockError::BadRequest => RuntimeError::new(ErrorKind::BadAllocationRequest),
        }
    }
}

/// Convert from AllocError
impl From<AllocError> for RuntimeError {
    fn from(other: AllocError) -> RuntimeError {
        match other {
            AllocError::OOM => RuntimeError::new(ErrorKind::OutOfMemory),
            AllocError::BadRequest => RuntimeError::new(ErrorKind::BadAllocationRequest),
        }
    }
}

impl Error for RuntimeError {
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

/// Convenience shorthand function for building an out-of-memory error
pub fn err_oom() -> RuntimeError {
    RuntimeError::new(ErrorKind::OutOfMemory)
}

/// Convenience shorthand function for building a bad-allocation error
pub fn err_bad_alloc() -> RuntimeError {
    RuntimeError::new(ErrorKind::BadAllocationRequest)
}
