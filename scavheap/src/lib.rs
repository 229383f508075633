/// A bump-allocated block heap for a scavenging (copying) collector.
///
/// Objects are bump-allocated into size-aligned blocks. The first word of
/// every block points at the block's cursor metadata, so any interior
/// pointer can answer "is this object the last allocation in its block?"
/// and support shrinking the block top - the contract a resizable tail
/// object needs.
mod allocator;
mod bumpblock;
mod constants;
mod heap;
mod rawptr;

pub use crate::allocator::{word_align, AllocError, AllocRaw};
pub use crate::bumpblock::{is_at_block_top, shrink_block_top, BumpBlock};
pub use crate::constants::{
    max_payload_size, BLOCK_PTR_MASK, BLOCK_SIZE, FIRST_OBJECT_OFFSET, WORD_SIZE,
};
pub use crate::heap::BlockHeap;
pub use crate::rawptr::RawPtr;
