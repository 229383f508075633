use std::cell::UnsafeCell;
use std::mem::replace;

use crate::allocator::{word_align, AllocError, AllocRaw};
use crate::bumpblock::BumpBlock;
use crate::constants::max_payload_size;
use crate::rawptr::RawPtr;

/// A list of blocks as the current block being allocated into and a list
/// of full blocks
struct BlockList {
    head: Option<BumpBlock>,
    rest: Vec<BumpBlock>,
}

impl BlockList {
    fn new() -> BlockList {
        BlockList {
            head: None,
            rest: Vec::new(),
        }
    }
}

/// A growable heap space of bump-allocated blocks. Does not allocate
/// internally on initialization. A scavenging collector allocates survivors
/// into a fresh `BlockHeap` and swaps it in with `adopt`, releasing the
/// from-space blocks wholesale.
pub struct BlockHeap {
    blocks: UnsafeCell<BlockList>,
}

impl BlockHeap {
    pub fn new() -> BlockHeap {
        BlockHeap {
            blocks: UnsafeCell::new(BlockList::new()),
        }
    }

    /// Whether the given address lies within any of this heap's blocks.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let blocks = unsafe { &*self.blocks.get() };

        blocks.head.iter().chain(blocks.rest.iter()).any(|block| block.contains(ptr))
    }

    /// The number of blocks currently backing this heap.
    pub fn block_count(&self) -> usize {
        let blocks = unsafe { &*self.blocks.get() };

        blocks.rest.len() + if blocks.head.is_some() { 1 } else { 0 }
    }

    /// Replace this heap's blocks with another heap's, dropping the current
    /// blocks. This is the commit step of a scavenge: `other` is the
    /// to-space.
    pub fn adopt(&self, other: BlockHeap) {
        let blocks = unsafe { &mut *self.blocks.get() };
        let incoming = other.blocks.into_inner();

        *blocks = incoming;
    }
}

impl AllocRaw for BlockHeap {
    fn alloc_raw(&self, size_bytes: usize) -> Result<RawPtr<u8>, AllocError> {
        let blocks = unsafe { &mut *self.blocks.get() };

        // simply fail for objects larger than the block payload
        if word_align(size_bytes) > max_payload_size() {
            return Err(AllocError::BadRequest);
        }

        match blocks.head {
            Some(ref head) => {
                if let Some(ptr) = head.inner_alloc(size_bytes) {
                    return Ok(RawPtr::new(ptr));
                }

                let previous = replace(&mut blocks.head, Some(BumpBlock::new()?));
                blocks.rest.push(previous.expect("head block vanished"));
            }

            None => {
                blocks.head = Some(BumpBlock::new()?);
            }
        }

        let head = blocks.head.as_ref().expect("fresh head block missing");

        head.inner_alloc(size_bytes)
            .map(|ptr| RawPtr::new(ptr))
            .ok_or(AllocError::OOM)
    }
}

impl Default for BlockHeap {
    fn default() -> BlockHeap {
        BlockHeap::new()
    }
}
