/// This file defines internal pointer abstractions for runtime tag-typed words.
/// From high level to low, safest to unsafest:
///  * Value > FatPtr > TaggedPtr
///
/// Defines a `Value` type which is a safe-Rust enum of references to object
/// types.
///
/// Defines a `FatPtr` type which is a Rust tagged-union enum version of all
/// types which can be expanded from `TaggedPtr` and the object header
/// combined.
///
/// Defines a `TaggedPtr` type where the low bits of a machine word indicate
/// whether it is a small integer, a heap object pointer or a marked pointer;
/// the object header provides the object's shape for heap pointers.
use std::fmt;

use scavheap::{RawPtr, WORD_SIZE};

use crate::array::Array;
use crate::bytearray::ByteArray;
use crate::headers::{HeapObject, TypeTag};
use crate::instance::{Instance, Task};
use crate::number::{Double, LargeInteger};
use crate::pointerops::{
    ScopedRef, HEAP_TAG, MARKED_TAG, NON_SMI_TAG_MASK, PTR_MASK, SMI_TAG, SMI_TAG_MASK,
    SMI_TAG_SIZE,
};
use crate::printer::Print;
use crate::safeptr::{MutatorScope, ScopedPtr};
use crate::stack::Stack;
use crate::text::Text;

const WORD_BIT_SIZE: usize = WORD_SIZE * 8;

/// A safe interface to heap-managed values. The `'guard` lifetime must be a
/// safe lifetime for the collector not to move or reclaim the referenced
/// object.
#[derive(Copy, Clone)]
pub enum Value<'guard> {
    Smi(isize),
    Array(ScopedPtr<'guard, Array>),
    ByteArray(ScopedPtr<'guard, ByteArray>),
    Text(ScopedPtr<'guard, Text>),
    Double(ScopedPtr<'guard, Double>),
    LargeInteger(ScopedPtr<'guard, LargeInteger>),
    Instance(ScopedPtr<'guard, Instance>),
    Task(ScopedPtr<'guard, Task>),
    Stack(ScopedPtr<'guard, Stack>),
    /// A marked pointer: the transient error convention, wrapping the string
    /// payload a failing primitive hands back to the interpreter.
    Error(ScopedPtr<'guard, Text>),
}

impl<'guard> fmt::Display for Value<'guard> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Smi(n) => write!(f, "{}", *n),
            Value::Array(a) => a.print(self, f),
            Value::ByteArray(b) => b.print(self, f),
            Value::Text(t) => t.print(self, f),
            Value::Double(d) => d.print(self, f),
            Value::LargeInteger(n) => n.print(self, f),
            Value::Instance(_) => write!(f, "#instance"),
            Value::Task(_) => write!(f, "#task"),
            Value::Stack(_) => write!(f, "#stack"),
            Value::Error(t) => {
                write!(f, "error: ")?;
                t.print(self, f)
            }
        }
    }
}

impl<'guard> fmt::Debug for Value<'guard> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<'guard> MutatorScope for Value<'guard> {}

/// An unpacked tagged Fat Pointer that carries the shape information in the
/// enum structure. Oddballs unpack as `Instance` - their distinction matters
/// to the size and root dispatch, not to consumers of values.
#[derive(Copy, Clone)]
pub enum FatPtr {
    Smi(isize),
    Array(RawPtr<Array>),
    ByteArray(RawPtr<ByteArray>),
    Text(RawPtr<Text>),
    Double(RawPtr<Double>),
    LargeInteger(RawPtr<LargeInteger>),
    Instance(RawPtr<Instance>),
    Task(RawPtr<Task>),
    Stack(RawPtr<Stack>),
    Error(RawPtr<Text>),
}

impl FatPtr {
    /// Given a lifetime, convert to a `Value` type. Unsafe because anything
    /// can provide a lifetime without any safety guarantee that it's valid.
    pub fn as_value<'guard>(&self, guard: &'guard dyn MutatorScope) -> Value<'guard> {
        match self {
            FatPtr::Smi(n) => Value::Smi(*n),
            FatPtr::Array(p) => Value::Array(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::ByteArray(p) => Value::ByteArray(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::Text(p) => Value::Text(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::Double(p) => Value::Double(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::LargeInteger(p) => {
                Value::LargeInteger(ScopedPtr::new(guard, p.scoped_ref(guard)))
            }
            FatPtr::Instance(p) => Value::Instance(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::Task(p) => Value::Task(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::Stack(p) => Value::Stack(ScopedPtr::new(guard, p.scoped_ref(guard))),
            FatPtr::Error(p) => Value::Error(ScopedPtr::new(guard, p.scoped_ref(guard))),
        }
    }
}

/// Implement `From<RawPtr<T>> for FatPtr` for the given FatPtr discriminant and the given `T`
macro_rules! fatptr_from_rawptr {
    ($F:tt, $T:ty) => {
        impl From<RawPtr<$T>> for FatPtr {
            fn from(ptr: RawPtr<$T>) -> FatPtr {
                FatPtr::$F(ptr)
            }
        }
    };
}

fatptr_from_rawptr!(Array, Array);
fatptr_from_rawptr!(ByteArray, ByteArray);
fatptr_from_rawptr!(Text, Text);
fatptr_from_rawptr!(Double, Double);
fatptr_from_rawptr!(LargeInteger, LargeInteger);
fatptr_from_rawptr!(Instance, Instance);
fatptr_from_rawptr!(Task, Task);
fatptr_from_rawptr!(Stack, Stack);

/// Conversion from an integer type
impl From<isize> for FatPtr {
    fn from(n: isize) -> FatPtr {
        FatPtr::Smi(n)
    }
}

/// Conversion from a TaggedPtr type
impl From<TaggedPtr> for FatPtr {
    fn from(ptr: TaggedPtr) -> FatPtr {
        ptr.into_fat_ptr()
    }
}

/// Identity comparison
impl PartialEq for FatPtr {
    fn eq(&self, other: &FatPtr) -> bool {
        use self::FatPtr::*;

        match (*self, *other) {
            (Smi(i), Smi(j)) => i == j,
            (Array(p), Array(q)) => p == q,
            (ByteArray(p), ByteArray(q)) => p == q,
            (Text(p), Text(q)) => p == q,
            (Double(p), Double(q)) => p == q,
            (LargeInteger(p), LargeInteger(q)) => p == q,
            (Instance(p), Instance(q)) => p == q,
            (Task(p), Task(q)) => p == q,
            (Stack(p), Stack(q)) => p == q,
            (Error(p), Error(q)) => p == q,
            _ => false,
        }
    }
}

/// A packed tagged word which carries its discriminant in the low bits:
/// small integers have a 0 low bit, heap object pointers end in 01 and
/// marked pointers in 11.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TaggedPtr {
    word: usize,
}

impl TaggedPtr {
    /// The range of a small integer is the machine word minus the tag bit
    /// and the sign.
    pub const MIN_SMI: isize = -(1 << (WORD_BIT_SIZE - 2));
    pub const MAX_SMI: isize = (1 << (WORD_BIT_SIZE - 2)) - 1;

    /// Whether the value survives the loss of one bit to the tag.
    pub fn is_valid_smi(value: isize) -> bool {
        value >= TaggedPtr::MIN_SMI && value <= TaggedPtr::MAX_SMI
    }

    /// Whether the value would be a small integer on a 32-bit host. The
    /// snapshot layer uses this to pick a portable encoding.
    pub fn is_valid_smi32(value: i64) -> bool {
        value >= -(1 << 30) && value <= (1 << 30) - 1
    }

    /// Whether the value would be a small integer on a 64-bit host.
    pub fn is_valid_smi64(value: i64) -> bool {
        value >= -(1 << 62) && value <= (1 << 62) - 1
    }

    /// Construct a small-integer word. The value must be in smi range.
    pub fn from_smi(value: isize) -> TaggedPtr {
        debug_assert!(TaggedPtr::is_valid_smi(value));
        TaggedPtr {
            word: (value << SMI_TAG_SIZE) as usize,
        }
    }

    /// The small integer zero; also the canonical "cleared slot" value.
    pub fn zero() -> TaggedPtr {
        TaggedPtr::from_smi(0)
    }

    /// Construct a heap-object word from an untagged object base address.
    pub fn from_object_address(address: usize) -> TaggedPtr {
        debug_assert!(address & NON_SMI_TAG_MASK == 0);
        TaggedPtr {
            word: address | HEAP_TAG,
        }
    }

    /// Reconstruct from a raw word with no validity expectations. This is
    /// the escape hatch the interpreter uses to keep raw code addresses
    /// (return bytecode pointers and the frame marker) in stack slots.
    pub fn from_raw_word(word: usize) -> TaggedPtr {
        TaggedPtr { word }
    }

    /// The word with no interpretation applied.
    pub fn as_raw_word(self) -> usize {
        self.word
    }

    pub fn is_smi(self) -> bool {
        self.word & SMI_TAG_MASK == SMI_TAG
    }

    pub fn is_heap_object(self) -> bool {
        self.word & NON_SMI_TAG_MASK == HEAP_TAG
    }

    /// Tells whether this is a temporarily marked heap object.
    pub fn is_marked(self) -> bool {
        self.word & NON_SMI_TAG_MASK == MARKED_TAG
    }

    /// The signed value of a small integer word.
    pub fn smi_value(self) -> isize {
        debug_assert!(self.is_smi());
        (self.word as isize) >> SMI_TAG_SIZE
    }

    /// The untagged base address of a heap object or marked word.
    pub fn object_address(self) -> usize {
        debug_assert!(self.is_heap_object() || self.is_marked());
        self.word & PTR_MASK
    }

    /// Flag a heap object word as a transient error (or forwarding) value.
    pub fn mark(self) -> TaggedPtr {
        debug_assert!(self.is_heap_object());
        TaggedPtr {
            word: self.word | NON_SMI_TAG_MASK,
        }
    }

    /// Recover the heap object word a marked word was made from.
    pub fn unmark(self) -> TaggedPtr {
        debug_assert!(self.is_marked());
        TaggedPtr {
            word: (self.word & PTR_MASK) | HEAP_TAG,
        }
    }

    /// View the word as a bare object pointer.
    pub fn as_heap_object(self) -> RawPtr<HeapObject> {
        debug_assert!(self.is_heap_object());
        RawPtr::new(self.object_address() as *const HeapObject)
    }

    fn has_tag(self, tag: TypeTag) -> bool {
        self.is_heap_object() && unsafe { self.as_heap_object().as_ref().header().class_tag() == tag }
    }

    pub fn is_array(self) -> bool {
        self.has_tag(TypeTag::Array)
    }

    pub fn is_byte_array(self) -> bool {
        self.has_tag(TypeTag::ByteArray)
    }

    pub fn is_text(self) -> bool {
        self.has_tag(TypeTag::Text)
    }

    pub fn is_double(self) -> bool {
        self.has_tag(TypeTag::Double)
    }

    pub fn is_large_integer(self) -> bool {
        self.has_tag(TypeTag::LargeInteger)
    }

    pub fn is_instance(self) -> bool {
        self.has_tag(TypeTag::Instance)
    }

    pub fn is_task(self) -> bool {
        self.has_tag(TypeTag::Task)
    }

    pub fn is_stack(self) -> bool {
        self.has_tag(TypeTag::Stack)
    }

    fn into_fat_ptr(self) -> FatPtr {
        unsafe {
            if self.is_smi() {
                FatPtr::Smi(self.smi_value())
            } else if self.is_marked() {
                let payload = self.unmark().as_heap_object();
                FatPtr::Error(payload.cast::<Text>())
            } else {
                self.as_heap_object().as_ref().get_object_fatptr()
            }
        }
    }
}

impl From<FatPtr> for TaggedPtr {
    fn from(ptr: FatPtr) -> TaggedPtr {
        fn object_word<T>(raw: RawPtr<T>) -> TaggedPtr {
            TaggedPtr::from_object_address(raw.as_word())
        }

        match ptr {
            FatPtr::Smi(n) => TaggedPtr::from_smi(n),
            FatPtr::Array(raw) => object_word(raw),
            FatPtr::ByteArray(raw) => object_word(raw),
            FatPtr::Text(raw) => object_word(raw),
            FatPtr::Double(raw) => object_word(raw),
            FatPtr::LargeInteger(raw) => object_word(raw),
            FatPtr::Instance(raw) => object_word(raw),
            FatPtr::Task(raw) => object_word(raw),
            FatPtr::Stack(raw) => object_word(raw),
            FatPtr::Error(raw) => object_word(raw).mark(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_smi_roundtrip() {
        for n in &[0isize, 1, -1, 42, -42, TaggedPtr::MIN_SMI, TaggedPtr::MAX_SMI] {
            let ptr = TaggedPtr::from_smi(*n);
            assert!(ptr.is_smi());
            assert!(!ptr.is_heap_object());
            assert!(!ptr.is_marked());
            assert!(ptr.smi_value() == *n);
        }
    }

    #[test]
    fn test_smi_validity_ranges() {
        assert!(TaggedPtr::is_valid_smi(0));
        assert!(TaggedPtr::is_valid_smi(TaggedPtr::MIN_SMI));
        assert!(TaggedPtr::is_valid_smi(TaggedPtr::MAX_SMI));

        assert!(TaggedPtr::is_valid_smi32((1 << 30) - 1));
        assert!(!TaggedPtr::is_valid_smi32(1 << 30));
        assert!(TaggedPtr::is_valid_smi64((1 << 62) - 1));
        assert!(!TaggedPtr::is_valid_smi64(1 << 62));
    }

    #[test]
    fn test_heap_object_word() {
        // any word-aligned address will do for tag arithmetic
        let address = 0x1000usize;
        let ptr = TaggedPtr::from_object_address(address);

        assert!(ptr.is_heap_object());
        assert!(!ptr.is_smi());
        assert!(!ptr.is_marked());
        assert!(ptr.object_address() == address);
    }

    #[test]
    fn test_mark_unmark() {
        let address = 0x2000usize;
        let ptr = TaggedPtr::from_object_address(address);

        let marked = ptr.mark();
        assert!(marked.is_marked());
        assert!(!marked.is_heap_object());
        assert!(!marked.is_smi());
        assert!(marked.object_address() == address);

        let unmarked = marked.unmark();
        assert!(unmarked.is_heap_object());
        assert!(unmarked == ptr);
    }

    #[test]
    fn test_zero_is_smi_zero() {
        let zero = TaggedPtr::zero();
        assert!(zero.is_smi());
        assert!(zero.smi_value() == 0);
        assert!(zero.as_raw_word() == 0);
    }

    #[test]
    fn test_values_unpack_by_shape() {
        use crate::process::Process;
        use crate::program::Program;
        use crate::safeptr::TaggedScopedPtr;
        use std::sync::Arc;

        let process = Process::new(Arc::new(Program::new()));

        let smi = TaggedScopedPtr::new(&process, TaggedPtr::from_smi(42));
        assert!(format!("{}", smi) == "42");

        let text = process.allocate_text("words").expect("allocation failed");
        let text = TaggedScopedPtr::new(
            &process,
            TaggedPtr::from_object_address(text.as_word()),
        );
        match text.value() {
            Value::Text(t) => assert!(t.length() == 5),
            _ => panic!("expected a string value"),
        }
        assert!(format!("{}", text) == "\"words\"");

        let array = process
            .allocate_array(2, TaggedPtr::from_smi(7))
            .expect("allocation failed");
        let array = TaggedScopedPtr::new(
            &process,
            TaggedPtr::from_object_address(array.as_word()),
        );
        assert!(format!("{}", array) == "[7, 7]");
    }

    #[test]
    fn test_marked_word_unpacks_as_error() {
        use crate::process::Process;
        use crate::program::Program;
        use std::sync::Arc;

        let process = Process::new(Arc::new(Program::new()));

        let message = process
            .allocate_text("OUT_OF_BOUNDS")
            .expect("allocation failed");
        let marked = TaggedPtr::from_object_address(message.as_word()).mark();

        match FatPtr::from(marked) {
            FatPtr::Error(payload) => {
                assert!(unsafe { payload.as_ref() }.slow_equals(b"OUT_OF_BOUNDS"))
            }
            _ => panic!("expected the marked word to unpack as an error"),
        }
    }
}
