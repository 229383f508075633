/// Word tag values and masks using the lowest bits of a machine word.
///
/// A small integer has a 0 low bit and carries its value in the remaining
/// word bits. Everything else uses the low two bits: 01 is a heap object
/// pointer, 11 is a marked pointer - a transient primitive-failure value,
/// or a forwarding pointer while it sits in an object header mid-scavenge.
use scavheap::RawPtr;

use crate::safeptr::MutatorScope;

pub const SMI_TAG_SIZE: usize = 1;
pub const SMI_TAG_MASK: usize = (1 << SMI_TAG_SIZE) - 1;
pub const SMI_TAG: usize = 0;

pub const NON_SMI_TAG_SIZE: usize = 2;
pub const NON_SMI_TAG_MASK: usize = (1 << NON_SMI_TAG_SIZE) - 1;
pub const HEAP_TAG: usize = 0x1;
pub const MARKED_TAG: usize = 0x3;

pub const PTR_MASK: usize = !NON_SMI_TAG_MASK;

/// Return the two-bit tag from the given word
pub fn get_tag(tagged_word: usize) -> usize {
    tagged_word & NON_SMI_TAG_MASK
}

/// For accessing a pointer target, given a lifetime
pub trait ScopedRef<T> {
    fn scoped_ref<'scope>(&self, guard: &'scope dyn MutatorScope) -> &'scope T;
}

impl<T> ScopedRef<T> for RawPtr<T> {
    fn scoped_ref<'scope>(&self, _guard: &'scope dyn MutatorScope) -> &'scope T {
        unsafe { &*self.get() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_bit_patterns() {
        assert!(get_tag(0x1000) == SMI_TAG);
        assert!(get_tag(0x1001) == HEAP_TAG);
        assert!(get_tag(0x1003) == MARKED_TAG);
        assert!(0x1001 & SMI_TAG_MASK != SMI_TAG);
    }
}
