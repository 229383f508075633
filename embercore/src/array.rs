/// The array shape: a length word followed by that many tagged slots.
use std::cell::Cell;
use std::fmt;
use std::mem::size_of;
use std::slice::from_raw_parts;

use static_assertions::const_assert;

use scavheap::{max_payload_size, word_align, RawPtr, WORD_SIZE};

use crate::headers::{ClassId, HeapObject, ObjectHeader, TypeTag};
use crate::printer::Print;
use crate::safeptr::{MutatorScope, TaggedCellPtr};
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::taggedptr::TaggedPtr;
use crate::visitor::RootCallback;

#[repr(C)]
pub struct Array {
    header: ObjectHeader,
    length: Cell<usize>,
}

const_assert!(size_of::<Array>() == Array::HEADER_SIZE);

impl Array {
    pub(crate) const HEADER_SIZE: usize = HeapObject::SIZE + WORD_SIZE;

    /// Logical arrays longer than this are composed out of arraylets by a
    /// higher layer; a single array shape never exceeds it.
    pub const ARRAYLET_SIZE: usize = 500;

    pub fn cast(obj: &HeapObject) -> &Array {
        debug_assert!(obj.header().class_tag() == TypeTag::Array);
        unsafe { &*(obj.address() as *const Array) }
    }

    pub fn length(&self) -> usize {
        self.length.get()
    }

    pub fn max_length() -> usize {
        (max_payload_size() - Array::HEADER_SIZE) / WORD_SIZE
    }

    pub fn allocation_size(length: usize) -> usize {
        word_align(Array::HEADER_SIZE + length * WORD_SIZE)
    }

    pub fn size(&self) -> usize {
        Array::allocation_size(self.length())
    }

    fn slots(&self) -> &[TaggedCellPtr] {
        unsafe {
            let base = (self as *const Array as *const u8).add(Array::HEADER_SIZE);
            from_raw_parts(base as *const TaggedCellPtr, self.length())
        }
    }

    /// Read the slot at `index`. The index must be within bounds.
    pub fn at(&self, index: usize) -> TaggedPtr {
        self.slots()[index].get_ptr()
    }

    /// Write the slot at `index`. The index must be within bounds.
    pub fn at_put(&self, index: usize, value: TaggedPtr) {
        self.slots()[index].set_to_ptr(value)
    }

    /// Write `filler` into every slot at or past `from`.
    pub fn fill(&self, from: usize, filler: TaggedPtr) {
        for slot in &self.slots()[from..] {
            slot.set_to_ptr(filler);
        }
    }

    /// Copy the first `length` slots of `other` into this array.
    pub fn copy_from(&self, other: &Array, length: usize) {
        debug_assert!(length <= self.length() && length <= other.length());
        for (dest, src) in self.slots()[..length].iter().zip(&other.slots()[..length]) {
            dest.copy_from(src);
        }
    }

    pub fn roots_do(&self, callback: &mut dyn RootCallback) {
        callback.do_roots(self.slots());
    }

    pub fn write_content(&self, writer: &mut dyn SnapshotWriter) {
        for slot in self.slots() {
            writer.write_object(slot.get_ptr());
        }
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader, length: usize) {
        self.length.set(length);
        for index in 0..length {
            self.at_put(index, reader.read_object());
        }
    }

    /// Stamp an array onto freshly allocated memory.
    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        length: usize,
        filler: TaggedPtr,
    ) -> RawPtr<Array> {
        let array = ptr.cast::<Array>();
        array.as_ref().header.set(class_id, TypeTag::Array);
        array.as_ref().length.set(length);
        array.as_ref().fill(0, filler);
        array
    }
}

impl Print for Array {
    fn print<'guard>(
        &self,
        guard: &'guard dyn MutatorScope,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(f, "[")?;

        for (index, slot) in self.slots().iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            fmt::Display::fmt(&slot.get(guard), f)?;
        }

        write!(f, "]")
    }
}
