/// Block-aligned memory block allocation.
///
/// Every block is aligned to its own size so that any interior pointer can
/// recover the block base address with a single mask operation. On unix the
/// blocks come from `posix_memalign`; elsewhere the stable `std::alloc` API
/// is used with an explicit alignment.
use std::ptr::NonNull;

pub type BlockPtr = NonNull<u8>;
pub type BlockSize = usize;

/// Set of possible block allocation failures
#[derive(Debug, PartialEq)]
pub enum BlockError {
    /// Usually means the requested block size, and therefore alignment, wasn't a power of two
    BadRequest,
    /// Insufficient memory, couldn't allocate a block
    OOM,
}

/// A block-size-aligned block of memory
pub struct Block {
    ptr: BlockPtr,
    size: BlockSize,
}

impl Block {
    /// Instantiate a new block of the given size. Size must be a power of two.
    pub fn new(size: BlockSize) -> Result<Block, BlockError> {
        if !size.is_power_of_two() {
            return Err(BlockError::BadRequest);
        }

        Ok(Block {
            ptr: internal::alloc_block(size)?,
            size,
        })
    }

    /// Consume and return the pointer only
    pub fn into_mut_ptr(self) -> BlockPtr {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }

    /// Return the size in bytes of the block
    pub fn size(&self) -> BlockSize {
        self.size
    }

    /// Unsafely reassemble from pointer and size
    pub unsafe fn from_raw_parts(ptr: BlockPtr, size: BlockSize) -> Block {
        Block { ptr, size }
    }

    /// Return a bare pointer to the base of the block
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        internal::dealloc_block(self.ptr, self.size);
    }
}

#[cfg(unix)]
mod internal {
    use libc::{c_void, free, posix_memalign, EINVAL, ENOMEM};
    use std::ptr::{null_mut, NonNull};

    use crate::{BlockError, BlockPtr, BlockSize};

    pub fn alloc_block(size: BlockSize) -> Result<BlockPtr, BlockError> {
        unsafe {
            let mut address = null_mut();
            let rval = posix_memalign(&mut address, size, size);

            match rval {
                0 => Ok(NonNull::new_unchecked(address as *mut u8)),
                EINVAL => Err(BlockError::BadRequest),
                ENOMEM => Err(BlockError::OOM),
                _ => unreachable!(),
            }
        }
    }

    pub fn dealloc_block(ptr: BlockPtr, _size: BlockSize) {
        unsafe {
            free(ptr.as_ptr() as *mut c_void);
        }
    }
}

#[cfg(not(unix))]
mod internal {
    use std::alloc::{alloc, dealloc, Layout};
    use std::ptr::NonNull;

    use crate::{BlockError, BlockPtr, BlockSize};

    pub fn alloc_block(size: BlockSize) -> Result<BlockPtr, BlockError> {
        unsafe {
            let layout = Layout::from_size_align_unchecked(size, size);

            NonNull::new(alloc(layout)).ok_or(BlockError::OOM)
        }
    }

    pub fn dealloc_block(ptr: BlockPtr, size: BlockSize) {
        unsafe {
            let layout = Layout::from_size_align_unchecked(size, size);

            dealloc(ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Block, BlockError, BlockSize};

    fn alloc_dealloc(size: BlockSize) -> Result<(), BlockError> {
        let block = Block::new(size)?;

        // the block address bitwise AND the alignment bits (size - 1) should
        // be a mutually exclusive set of bits
        let mask = size - 1;
        assert!((block.as_ptr() as usize & mask) ^ mask == mask);

        drop(block);
        Ok(())
    }

    #[test]
    fn test_bad_sizealign() {
        assert!(alloc_dealloc(999) == Err(BlockError::BadRequest))
    }

    #[test]
    fn test_4k() {
        assert!(alloc_dealloc(4096).is_ok())
    }

    #[test]
    fn test_32k() {
        assert!(alloc_dealloc(32768).is_ok())
    }

    #[test]
    fn test_16m() {
        assert!(alloc_dealloc(16 * 1024 * 1024).is_ok())
    }

    #[test]
    fn test_block_contents_writable() {
        let block = Block::new(4096).expect("block allocation failed");

        unsafe {
            let base = block.as_ptr() as *mut u8;
            for offset in 0..4096 {
                *base.add(offset) = (offset & 0xff) as u8;
            }
            for offset in 0..4096 {
                assert!(*base.add(offset) == (offset & 0xff) as u8);
            }
        }
    }
}
