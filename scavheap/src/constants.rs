use std::mem::size_of;

/// Blocks are small: the target devices measure RAM in hundreds of KiB.
pub const BLOCK_SIZE_BITS: usize = 12;
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_BITS;
pub const BLOCK_PTR_MASK: usize = !(BLOCK_SIZE - 1);

pub const WORD_SIZE: usize = size_of::<usize>();

/// The first object in a block is not at offset 0 - that location is reserved
/// for a pointer to the block's cursor metadata - but at the next double-word
/// offset.
pub const FIRST_OBJECT_OFFSET: usize = WORD_SIZE * 2;

/// The largest single allocation a block can satisfy.
pub fn max_payload_size() -> usize {
    BLOCK_SIZE - FIRST_OBJECT_OFFSET
}
