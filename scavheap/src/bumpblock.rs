use std::cell::Cell;
use std::ptr::write;

use blockalloc::Block;

use crate::allocator::{word_align, AllocError};
use crate::constants::{BLOCK_PTR_MASK, BLOCK_SIZE, FIRST_OBJECT_OFFSET};

/// Per-block cursor metadata. A pointer to this struct is placed in the very
/// first word of the block memory so that any interior pointer can find it by
/// masking off the block-offset bits.
pub struct BlockCursor {
    cursor: Cell<usize>,
}

impl BlockCursor {
    fn new_boxed() -> Box<BlockCursor> {
        Box::new(BlockCursor {
            cursor: Cell::new(FIRST_OBJECT_OFFSET),
        })
    }

    /// Current bump offset - one past the last allocated byte.
    pub fn top(&self) -> usize {
        self.cursor.get()
    }

    fn bump(&self, size: usize) -> Option<usize> {
        let offset = self.cursor.get();
        let next = offset + size;

        if next > BLOCK_SIZE {
            None
        } else {
            self.cursor.set(next);
            Some(offset)
        }
    }

    fn shrink(&self, bytes: usize) {
        debug_assert!(bytes <= self.cursor.get() - FIRST_OBJECT_OFFSET);
        self.cursor.set(self.cursor.get() - bytes);
    }
}

/// A block of heap with its bump-allocation cursor.
pub struct BumpBlock {
    block: Block,
    cursor: Box<BlockCursor>,
}

impl BumpBlock {
    /// Create a new block of heap space and its cursor metadata, placing a
    /// pointer to the metadata in the first word of the block.
    pub fn new() -> Result<BumpBlock, AllocError> {
        let block = BumpBlock {
            block: Block::new(BLOCK_SIZE)?,
            cursor: BlockCursor::new_boxed(),
        };

        let cursor_ptr: *const BlockCursor = &*block.cursor;
        unsafe {
            write(block.block.as_ptr() as *mut *const BlockCursor, cursor_ptr);
        }

        Ok(block)
    }

    /// Allocate `size` bytes (word-aligned up) at the bump cursor, returning
    /// `None` if the result would overflow the block.
    pub fn inner_alloc(&self, size: usize) -> Option<*const u8> {
        self.cursor
            .bump(word_align(size))
            .map(|offset| unsafe { self.block.as_ptr().add(offset) })
    }

    /// Whether the given address lies within this block's memory.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.block.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + BLOCK_SIZE
    }

    /// Bytes still available at the block top.
    pub fn remaining(&self) -> usize {
        BLOCK_SIZE - self.cursor.top()
    }
}

unsafe fn cursor_for_interior<'a>(ptr: *const u8) -> &'a BlockCursor {
    let base = (ptr as usize & BLOCK_PTR_MASK) as *const *const BlockCursor;
    &**base
}

/// Whether the object at `ptr` with byte footprint `size` is the topmost
/// allocation of its block. Unsafe because `ptr` must point into a live
/// `BumpBlock` allocation.
pub unsafe fn is_at_block_top(ptr: *const u8, size: usize) -> bool {
    let cursor = cursor_for_interior(ptr);
    let offset = ptr as usize & !BLOCK_PTR_MASK;
    offset + word_align(size) == cursor.top()
}

/// Give back the tail of the topmost allocation of a block, shrinking its
/// footprint from `old_size` to `new_size` bytes. Unsafe for the same reason
/// as `is_at_block_top`, which must hold for `ptr`/`old_size` on entry.
pub unsafe fn shrink_block_top(ptr: *const u8, old_size: usize, new_size: usize) {
    debug_assert!(new_size <= old_size);
    debug_assert!(is_at_block_top(ptr, old_size));

    let cursor = cursor_for_interior(ptr);
    cursor.shrink(word_align(old_size) - word_align(new_size));

    debug_assert!(is_at_block_top(ptr, new_size));
}
