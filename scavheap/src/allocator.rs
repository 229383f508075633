use blockalloc::BlockError;

use crate::constants::WORD_SIZE;
use crate::rawptr::RawPtr;

/// An allocation error type
#[derive(Debug, PartialEq)]
pub enum AllocError {
    /// Some attribute of the allocation, most likely the size requested,
    /// could not be fulfilled
    BadRequest,
    /// Out of memory - allocating the space failed
    OOM,
}

impl From<BlockError> for AllocError {
    fn from(error: BlockError) -> AllocError {
        match error {
            BlockError::BadRequest => AllocError::BadRequest,
            BlockError::OOM => AllocError::OOM,
        }
    }
}

/// Round a byte size up to the next word boundary. All heap allocations are
/// word-granular so that object footprints and block cursors always agree.
pub fn word_align(size: usize) -> usize {
    (size + (WORD_SIZE - 1)) & !(WORD_SIZE - 1)
}

/// A type that describes raw allocation of a run of bytes into a heap space,
/// returning a bare pointer type on success. The object layer is responsible
/// for writing a header before the memory is reachable.
pub trait AllocRaw {
    fn alloc_raw(&self, size_bytes: usize) -> Result<RawPtr<u8>, AllocError>;
}
