/// Defines the object header occupying the first word of every heap
/// allocated object. The header packs a 4-bit class tag - the shape
/// discriminant driving layout, size and GC dispatch - with a 10-bit class
/// id indexing the program's class table, and the whole is stored as a
/// small-integer word. While a scavenge is in progress the header slot may
/// instead hold a marked forwarding pointer to the object's new location;
/// that is the only legal non-small-integer header state.
use std::cell::Cell;
use std::mem::size_of;
use std::ptr::{read_unaligned, write_unaligned};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use static_assertions::const_assert;

use scavheap::{RawPtr, WORD_SIZE};

use crate::array::Array;
use crate::bytearray::ByteArray;
use crate::instance::{Instance, Task};
use crate::number::{Double, LargeInteger};
use crate::program::Program;
use crate::scavenger::ScavengeScope;
use crate::stack::Stack;
use crate::taggedptr::{FatPtr, TaggedPtr};
use crate::text::Text;
use crate::visitor::{PointerCallback, PointerRootCallback, RootCallback};

/// Index into the program's class table. 10 bits are available in the
/// header word.
pub type ClassId = u16;

/// Recognized heap-object shapes. The numeric values are part of the
/// snapshot format and must not be reordered.
#[repr(usize)]
#[derive(Debug, Copy, Clone, PartialEq, FromPrimitive)]
pub enum TypeTag {
    Array = 0,
    Text = 1,
    Instance = 2,
    Oddball = 3,
    Double = 4,
    ByteArray = 5,
    LargeInteger = 6,
    Stack = 7,
    Task = 8,
}

pub const CLASS_TAG_BIT_SIZE: usize = 4;
pub const CLASS_TAG_OFFSET: usize = 0;
pub const CLASS_TAG_MASK: usize = (1 << CLASS_TAG_BIT_SIZE) - 1;

pub const CLASS_ID_BIT_SIZE: usize = 10;
pub const CLASS_ID_OFFSET: usize = CLASS_TAG_OFFSET + CLASS_TAG_BIT_SIZE;
pub const CLASS_ID_MASK: usize = (1 << CLASS_ID_BIT_SIZE) - 1;

/// The header word of a heap object.
#[repr(transparent)]
pub struct ObjectHeader {
    word: Cell<TaggedPtr>,
}

const_assert!(size_of::<ObjectHeader>() == WORD_SIZE);

impl ObjectHeader {
    fn header_smi(&self) -> isize {
        let word = self.word.get();
        if !word.is_smi() {
            panic!("Object header in an illegal state");
        }
        word.smi_value()
    }

    pub fn class_id(&self) -> ClassId {
        ((self.header_smi() as usize >> CLASS_ID_OFFSET) & CLASS_ID_MASK) as ClassId
    }

    pub fn class_tag(&self) -> TypeTag {
        let bits = self.header_smi() as usize & CLASS_TAG_MASK;
        TypeTag::from_usize(bits).unwrap_or_else(|| panic!("Unexpected class tag {}", bits))
    }

    /// Initialize the header on allocation.
    pub fn set(&self, class_id: ClassId, class_tag: TypeTag) {
        debug_assert!((class_id as usize) <= CLASS_ID_MASK);

        let value = ((class_id as usize) << CLASS_TAG_BIT_SIZE) | class_tag as usize;
        self.word.set(TaggedPtr::from_smi(value as isize));

        debug_assert!(self.class_id() == class_id);
        debug_assert!(self.class_tag() == class_tag);
    }

    /// During GC the header can be read without the small-integer
    /// assertion: it may be a forwarding pointer.
    pub fn raw_header(&self) -> TaggedPtr {
        self.word.get()
    }

    /// Take another header's word verbatim; used when migrating an object
    /// into a preallocated shell.
    pub(crate) fn copy_from(&self, other: &ObjectHeader) {
        self.word.set(other.word.get());
    }

    /// Install a forwarding pointer to the object's new location. Only the
    /// scavenger can witness a `ScavengeScope`, which keeps forwarding
    /// pointers confined to a collection in progress.
    pub fn install_forwarding(&self, to: RawPtr<HeapObject>, _scope: &ScavengeScope) {
        debug_assert!(!self.is_forwarded());
        self.word
            .set(TaggedPtr::from_object_address(to.as_word()).mark());
    }

    pub fn is_forwarded(&self) -> bool {
        self.word.get().is_marked()
    }

    /// The forwarding target, if this header currently holds one.
    pub fn forwarding(&self) -> Option<RawPtr<HeapObject>> {
        let word = self.word.get();
        if word.is_marked() {
            Some(RawPtr::new(word.object_address() as *const HeapObject))
        } else {
            None
        }
    }
}

/// The common prefix of every heap object: the header word. Shape structs
/// lay their fixed fields out after this and address any variable tail by
/// byte offset.
#[repr(C)]
pub struct HeapObject {
    header: ObjectHeader,
}

const_assert!(size_of::<HeapObject>() == WORD_SIZE);

impl HeapObject {
    pub const SIZE: usize = WORD_SIZE;

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn set_header(&self, class_id: ClassId, class_tag: TypeTag) {
        self.header.set(class_id, class_tag);
    }

    /// Initialize the header for a class, looking the tag up in the
    /// program's class table.
    pub fn set_header_from_program(&self, program: &Program, class_id: ClassId) {
        self.header.set(class_id, program.class_tag_for(class_id));
    }

    /// The untagged base address of this object.
    pub fn address(&self) -> usize {
        self as *const HeapObject as usize
    }

    /// This object as a tagged word.
    pub fn tagged(&self) -> TaggedPtr {
        TaggedPtr::from_object_address(self.address())
    }

    /// Returns the byte footprint of this object. Fixed-size instances are
    /// answered by the program's class table; variable shapes dispatch on
    /// the class tag. An unknown tag here is a corrupted heap and fatal.
    pub fn size(&self, program: &Program) -> usize {
        let size = program.instance_size_for(self);
        if size != 0 {
            return size;
        }
        match self.header.class_tag() {
            TypeTag::Array => Array::cast(self).size(),
            TypeTag::ByteArray => ByteArray::cast(self).size(),
            TypeTag::Stack => Stack::cast(self).size(),
            TypeTag::Text => Text::cast(self).size(),
            TypeTag::Double => Double::allocation_size(),
            TypeTag::LargeInteger => LargeInteger::allocation_size(),
            tag => panic!("Unexpected class tag {:?} in size dispatch", tag),
        }
    }

    /// Visit every tagged-pointer slot of this object. Headers, raw bytes
    /// and stack words that point into the bytecode range are not roots and
    /// are not visited.
    pub fn roots_do(&self, program: &Program, callback: &mut dyn RootCallback) {
        match self.header.class_tag() {
            TypeTag::Array => Array::cast(self).roots_do(callback),
            TypeTag::Stack => Stack::cast(self).roots_do(program, callback),
            TypeTag::Task | TypeTag::Instance => {
                Instance::cast(self).roots_do(program.instance_size_for(self), callback)
            }
            TypeTag::Text
            | TypeTag::Oddball
            | TypeTag::Double
            | TypeTag::LargeInteger
            | TypeTag::ByteArray => {
                // No roots other than the header.
            }
        }
    }

    /// Visit this object's pointers for relocation: the tagged slots, plus
    /// the raw out-of-heap address of an external byte array.
    pub fn do_pointers(&self, program: &Program, callback: &mut dyn PointerCallback) {
        if self.header.class_tag() == TypeTag::ByteArray {
            ByteArray::cast(self).do_pointers(callback);
        } else {
            // All other objects' pointers are covered by doing their roots.
            let mut root_callback = PointerRootCallback::new(callback);
            self.roots_do(program, &mut root_callback);
        }
    }

    /// Whether this object is the topmost allocation in its heap block,
    /// which is the precondition for shrinking it in place.
    pub fn is_at_block_top(&self, program: &Program) -> bool {
        unsafe { scavheap::is_at_block_top(self.address() as *const u8, self.size(program)) }
    }

    /// Convert this object to a FatPtr carrying its shape.
    pub unsafe fn get_object_fatptr(&self) -> FatPtr {
        match self.header.class_tag() {
            TypeTag::Array => FatPtr::Array(shape_ptr::<Array>(self)),
            TypeTag::ByteArray => FatPtr::ByteArray(shape_ptr::<ByteArray>(self)),
            TypeTag::Text => FatPtr::Text(shape_ptr::<Text>(self)),
            TypeTag::Double => FatPtr::Double(shape_ptr::<Double>(self)),
            TypeTag::LargeInteger => FatPtr::LargeInteger(shape_ptr::<LargeInteger>(self)),
            TypeTag::Instance | TypeTag::Oddball => FatPtr::Instance(shape_ptr::<Instance>(self)),
            TypeTag::Task => FatPtr::Task(shape_ptr::<Task>(self)),
            TypeTag::Stack => FatPtr::Stack(shape_ptr::<Stack>(self)),
        }
    }
}

fn shape_ptr<T>(obj: &HeapObject) -> RawPtr<T> {
    RawPtr::new(obj as *const HeapObject as *const T)
}

// Raw field access for shape tails. Offsets are byte offsets from the
// object base; reads and writes are unaligned because some shape layouts
// place word fields at half-word offsets.

pub(crate) unsafe fn word_at(base: *const u8, offset: usize) -> usize {
    read_unaligned(base.add(offset) as *const usize)
}

pub(crate) unsafe fn word_at_put(base: *const u8, offset: usize, value: usize) {
    write_unaligned(base.add(offset) as *mut usize, value)
}

pub(crate) unsafe fn int64_at(base: *const u8, offset: usize) -> i64 {
    read_unaligned(base.add(offset) as *const i64)
}

pub(crate) unsafe fn int64_at_put(base: *const u8, offset: usize, value: i64) {
    write_unaligned(base.add(offset) as *mut i64, value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = ObjectHeader {
            word: Cell::new(TaggedPtr::zero()),
        };

        header.set(0, TypeTag::Array);
        assert!(header.class_id() == 0);
        assert!(header.class_tag() == TypeTag::Array);

        header.set(517, TypeTag::Task);
        assert!(header.class_id() == 517);
        assert!(header.class_tag() == TypeTag::Task);

        // the largest encodable class id
        header.set(CLASS_ID_MASK as ClassId, TypeTag::Stack);
        assert!(header.class_id() == CLASS_ID_MASK as ClassId);
        assert!(header.class_tag() == TypeTag::Stack);
    }

    #[test]
    fn test_header_is_a_smi() {
        let header = ObjectHeader {
            word: Cell::new(TaggedPtr::zero()),
        };
        header.set(3, TypeTag::Text);

        assert!(header.raw_header().is_smi());
        assert!(!header.is_forwarded());
        assert!(header.forwarding().is_none());
    }

    #[test]
    fn test_all_tags_decode() {
        let header = ObjectHeader {
            word: Cell::new(TaggedPtr::zero()),
        };

        for tag in &[
            TypeTag::Array,
            TypeTag::Text,
            TypeTag::Instance,
            TypeTag::Oddball,
            TypeTag::Double,
            TypeTag::ByteArray,
            TypeTag::LargeInteger,
            TypeTag::Stack,
            TypeTag::Task,
        ] {
            header.set(1, *tag);
            assert!(header.class_tag() == *tag);
        }
    }
}
