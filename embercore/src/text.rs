/// The string shape. Two representations share one class tag:
///
/// in heap content:  [header:w][hash_code:s][length:s][content: length bytes][0][padding]
/// off heap content: [header:w][hash_code:s][65535:s][length:w][address:w]
///
/// The 16-bit length field doubles as the discriminator: the sentinel value
/// marks the external representation. Content is always valid UTF-8 and is
/// followed by a NUL byte so it can double as a C string; for external
/// content the owner of the buffer maintains the NUL.
use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::mem::size_of;
use std::ptr::copy_nonoverlapping;
use std::str;

use static_assertions::const_assert;

use scavheap::{max_payload_size, word_align, RawPtr, BLOCK_SIZE, WORD_SIZE};

use crate::blob::Blob;
use crate::headers::{word_at, word_at_put, ClassId, HeapObject, ObjectHeader, TypeTag};
use crate::printer::Print;
use crate::safeptr::MutatorScope;
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::taggedptr::TaggedPtr;

#[repr(C)]
pub struct Text {
    header: ObjectHeader,
    hash_code: Cell<i16>,
    internal_length: Cell<u16>,
}

const_assert!(Text::INTERNAL_HEADER_SIZE == HeapObject::SIZE + 2 * size_of::<u16>());

impl Text {
    const HASH_CODE_OFFSET: usize = HeapObject::SIZE;
    const INTERNAL_LENGTH_OFFSET: usize = Text::HASH_CODE_OFFSET + size_of::<u16>();
    pub(crate) const INTERNAL_HEADER_SIZE: usize = Text::INTERNAL_LENGTH_OFFSET + size_of::<u16>();
    /// Internal header plus the trailing NUL.
    const OVERHEAD: usize = Text::INTERNAL_HEADER_SIZE + 1;

    const EXTERNAL_LENGTH_OFFSET: usize = Text::INTERNAL_HEADER_SIZE;
    const EXTERNAL_ADDRESS_OFFSET: usize = Text::EXTERNAL_LENGTH_OFFSET + WORD_SIZE;
    const EXTERNAL_OBJECT_SIZE: usize = Text::EXTERNAL_ADDRESS_OFFSET + WORD_SIZE;

    /// The 16-bit length value that flags the external representation.
    const SENTINEL: u16 = 65535;
    /// Hash slot value meaning "not yet computed".
    const NO_HASH_CODE: i16 = -1;

    /// Strings longer than this serialize in the external form.
    pub const SNAPSHOT_INTERNAL_SIZE_CUTOFF: usize = BLOCK_SIZE >> 2;

    pub fn cast(obj: &HeapObject) -> &Text {
        debug_assert!(obj.header().class_tag() == TypeTag::Text);
        unsafe { &*(obj.address() as *const Text) }
    }

    fn base(&self) -> *const u8 {
        self as *const Text as *const u8
    }

    /// Tells whether the string content is on the heap or external.
    pub fn content_on_heap(&self) -> bool {
        self.internal_length.get() != Text::SENTINEL
    }

    fn external_length(&self) -> usize {
        debug_assert!(!self.content_on_heap());
        unsafe { word_at(self.base(), Text::EXTERNAL_LENGTH_OFFSET) }
    }

    fn external_address(&self) -> *const u8 {
        debug_assert!(!self.content_on_heap());
        unsafe { word_at(self.base(), Text::EXTERNAL_ADDRESS_OFFSET) as *const u8 }
    }

    pub fn length(&self) -> usize {
        if self.content_on_heap() {
            self.internal_length.get() as usize
        } else {
            self.external_length()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// A read-only view of the content bytes, whichever representation
    /// backs them. The byte past the view is always NUL.
    pub fn bytes(&self) -> Blob {
        if self.content_on_heap() {
            let address = unsafe { self.base().add(Text::INTERNAL_HEADER_SIZE) };
            Blob::new(address, self.internal_length.get() as usize)
        } else {
            Blob::new(self.external_address(), self.external_length())
        }
    }

    /// The content as a string slice. Content is validated as UTF-8 at
    /// creation time.
    pub fn as_str<'guard>(&self, guard: &'guard dyn MutatorScope) -> &'guard str {
        str::from_utf8(self.bytes().as_slice(guard)).expect("string content must be valid UTF-8")
    }

    pub fn max_internal_size() -> usize {
        max_payload_size() - Text::OVERHEAD
    }

    pub fn internal_allocation_size(length: usize) -> usize {
        debug_assert!(length <= Text::max_internal_size());
        word_align(Text::INTERNAL_HEADER_SIZE + length + 1)
    }

    pub fn external_allocation_size() -> usize {
        word_align(Text::EXTERNAL_OBJECT_SIZE)
    }

    pub fn size(&self) -> usize {
        if self.content_on_heap() {
            Text::internal_allocation_size(self.length())
        } else {
            Text::external_allocation_size()
        }
    }

    /// Allocation size for a string shell about to be read from a
    /// snapshot: content past the cutoff arrives in the external form.
    pub fn snapshot_allocation_size(length: usize) -> usize {
        if length > Text::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            Text::external_allocation_size()
        } else {
            Text::internal_allocation_size(length)
        }
    }

    /// The cached hash, computing and caching it on first access.
    pub fn hash_code(&self) -> i16 {
        let cached = self.hash_code.get();
        if cached != Text::NO_HASH_CODE {
            cached
        } else {
            self.assign_hash_code()
        }
    }

    pub fn compute_hash_code(&self) -> i16 {
        let bytes = self.bytes();
        Text::compute_hash_code_for(unsafe {
            std::slice::from_raw_parts(bytes.address(), bytes.length())
        })
    }

    /// Trivial computation of hash code for a byte string: seeded with the
    /// length, folding each byte in as a signed value. The result is
    /// remapped away from the not-yet-computed sentinel.
    pub fn compute_hash_code_for(bytes: &[u8]) -> i16 {
        let mut hash = bytes.len() as i16;
        for byte in bytes {
            hash = hash.wrapping_mul(31).wrapping_add(*byte as i8 as i16);
        }
        if hash != Text::NO_HASH_CODE {
            hash
        } else {
            0
        }
    }

    fn assign_hash_code(&self) -> i16 {
        self.hash_code.set(self.compute_hash_code());
        debug_assert!(self.hash_code.get() != Text::NO_HASH_CODE);
        self.hash_code.get()
    }

    /// Content equality against any tagged value. Identical pointers are
    /// trivially equal; otherwise cached hashes are compared before the
    /// bytes are.
    pub fn equals(&self, other: TaggedPtr) -> bool {
        if other.is_heap_object() && other.object_address() == self.base() as usize {
            return true;
        }
        if !other.is_text() {
            return false;
        }
        let other = unsafe { &*(other.object_address() as *const Text) };
        if self.hash_code() != other.hash_code() {
            return false;
        }
        self.slow_equals_blob(&other.bytes())
    }

    pub fn slow_equals(&self, other: &[u8]) -> bool {
        let bytes = self.bytes();
        unsafe { std::slice::from_raw_parts(bytes.address(), bytes.length()) == other }
    }

    fn slow_equals_blob(&self, other: &Blob) -> bool {
        self.slow_equals(unsafe { std::slice::from_raw_parts(other.address(), other.length()) })
    }

    /// Byte-wise three-way comparison. Content may contain NUL bytes, so
    /// this is memcmp ordering, not C-string ordering.
    pub fn compare(&self, other: &Text) -> Ordering {
        let a = self.bytes();
        let b = other.bytes();
        unsafe {
            std::slice::from_raw_parts(a.address(), a.length())
                .cmp(std::slice::from_raw_parts(b.address(), b.length()))
        }
    }

    /// Whether the first byte past any leading underscores is an ASCII
    /// vowel. The error-message formatter uses this to pick an article.
    pub fn starts_with_vowel(&self) -> bool {
        let bytes = self.bytes();
        let len = bytes.length();
        let mut pos = 0;
        while pos < len && bytes.at(pos) == b'_' {
            pos += 1;
        }
        if pos == len {
            return false;
        }
        b"aeiouAEIOU".contains(&bytes.at(pos))
    }

    pub fn write_content(&self, writer: &mut dyn SnapshotWriter) {
        let bytes = self.bytes();
        let len = bytes.length();
        if len > Text::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            // TODO: drop the trailing NUL from the external snapshot form
            // and stop depending on it for C interop at load time.
            let with_nul = unsafe { std::slice::from_raw_parts(bytes.address(), len + 1) };
            writer.write_external_list_uint8(with_nul);
        } else {
            debug_assert!(self.content_on_heap());
            for index in 0..len {
                writer.write_byte(bytes.at(index));
            }
        }
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader, length: usize) {
        if length > Text::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            self.hash_code.set(Text::NO_HASH_CODE);
            self.internal_length.set(Text::SENTINEL);
            let external_bytes = reader.read_external_list_uint8();
            debug_assert!(external_bytes.len() == length + 1);
            unsafe {
                word_at_put(self.base(), Text::EXTERNAL_LENGTH_OFFSET, length);
                word_at_put(
                    self.base(),
                    Text::EXTERNAL_ADDRESS_OFFSET,
                    Box::into_raw(external_bytes) as *mut u8 as usize,
                );
            }
        } else {
            self.hash_code.set(Text::NO_HASH_CODE);
            self.internal_length.set(length as u16);
            let content = unsafe { self.base().add(Text::INTERNAL_HEADER_SIZE) as *mut u8 };
            for index in 0..length {
                unsafe { *content.add(index) = reader.read_byte() };
            }
            unsafe { *content.add(length) = 0 };
            self.assign_hash_code();
            debug_assert!(self.content_on_heap());
        }
    }

    /// Stamp an internal string onto freshly allocated memory. The bytes
    /// must already be validated as UTF-8.
    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        bytes: &[u8],
    ) -> RawPtr<Text> {
        debug_assert!(bytes.len() <= Text::max_internal_size());

        let text = ptr.cast::<Text>();
        text.as_ref().header.set(class_id, TypeTag::Text);
        text.as_ref().hash_code.set(Text::NO_HASH_CODE);
        text.as_ref().internal_length.set(bytes.len() as u16);

        let content = ptr.get_mut().add(Text::INTERNAL_HEADER_SIZE);
        copy_nonoverlapping(bytes.as_ptr(), content, bytes.len());
        *content.add(bytes.len()) = 0;

        text
    }

    /// Stamp an external string onto freshly allocated memory. The buffer
    /// must hold `length` UTF-8 bytes followed by a NUL and must outlive
    /// the object.
    pub(crate) unsafe fn initialize_external(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        length: usize,
        address: *const u8,
    ) -> RawPtr<Text> {
        let text = ptr.cast::<Text>();
        text.as_ref().header.set(class_id, TypeTag::Text);
        text.as_ref().hash_code.set(Text::NO_HASH_CODE);
        text.as_ref().internal_length.set(Text::SENTINEL);
        word_at_put(ptr.get(), Text::EXTERNAL_LENGTH_OFFSET, length);
        word_at_put(ptr.get(), Text::EXTERNAL_ADDRESS_OFFSET, address as usize);
        text
    }
}

impl Print for Text {
    fn print<'guard>(
        &self,
        guard: &'guard dyn MutatorScope,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(f, "\"{}\"", self.as_str(guard))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use crate::process::Process;
    use crate::program::Program;
    use std::sync::Arc;

    fn test_process() -> Process {
        Process::new(Arc::new(Program::new()))
    }

    #[test]
    fn text_hash_of_cafe() {
        let process = test_process();

        let text = process.allocate_text("café").expect("allocation failed");
        let text = unsafe { text.as_ref() };

        // UTF-8 encoding is five bytes, which seeds the recurrence
        let bytes: &[u8] = &[0x63, 0x61, 0x66, 0xc3, 0xa9];
        assert!(text.length() == 5);

        let mut expected: i16 = 5;
        for byte in bytes {
            expected = expected.wrapping_mul(31).wrapping_add(*byte as i8 as i16);
        }

        assert!(text.hash_code() == expected);
        // second access hits the cache
        assert!(text.hash_code() == expected);
    }

    #[test]
    fn text_equals_implies_equal_hash() {
        let process = test_process();

        let a = process.allocate_text("hello").expect("allocation failed");
        let b = process.allocate_text("hello").expect("allocation failed");
        let c = process.allocate_text("world").expect("allocation failed");
        let (a, b) = unsafe { (a.as_ref(), b.as_ref()) };
        let c_ref = unsafe { c.as_ref() };

        assert!(a.equals(TaggedPtr::from_object_address(a as *const Text as usize)));
        assert!(a.equals(TaggedPtr::from_object_address(b as *const Text as usize)));
        assert!(a.hash_code() == b.hash_code());
        assert!(!a.equals(TaggedPtr::from_object_address(c_ref as *const Text as usize)));
        assert!(!a.equals(TaggedPtr::from_smi(0)));
    }

    #[test]
    fn text_compare_is_bytewise() {
        let process = test_process();

        let abc = process.allocate_text("abc").expect("allocation failed");
        let abd = process.allocate_text("abd").expect("allocation failed");
        let ab = process.allocate_text("ab").expect("allocation failed");
        let (abc, abd, ab) = unsafe { (abc.as_ref(), abd.as_ref(), ab.as_ref()) };

        assert!(abc.compare(abd) == Ordering::Less);
        assert!(abd.compare(abc) == Ordering::Greater);
        assert!(abc.compare(ab) == Ordering::Greater);
        assert!(abc.compare(abc) == Ordering::Equal);
    }

    #[test]
    fn text_compare_handles_embedded_nul() {
        let process = test_process();

        let a = process
            .allocate_text_from_bytes(b"a\0b")
            .expect("allocation failed");
        let b = process
            .allocate_text_from_bytes(b"a\0c")
            .expect("allocation failed");
        let (a, b) = unsafe { (a.as_ref(), b.as_ref()) };

        assert!(a.compare(b) == Ordering::Less);
    }

    #[test]
    fn text_starts_with_vowel() {
        let process = test_process();

        let cases: &[(&str, bool)] = &[
            ("apple", true),
            ("Ice", true),
            ("_egg", true),
            ("__under", true),
            ("zebra", false),
            ("_zebra", false),
            ("___", false),
            ("", false),
        ];

        for (content, expected) in cases {
            let text = process.allocate_text(content).expect("allocation failed");
            let text = unsafe { text.as_ref() };
            assert!(
                text.starts_with_vowel() == *expected,
                "starts_with_vowel({:?})",
                content
            );
        }
    }

    #[test]
    fn text_trailing_nul_present() {
        let process = test_process();

        let text = process.allocate_text("hi").expect("allocation failed");
        let text = unsafe { text.as_ref() };

        let bytes = text.bytes();
        assert!(unsafe { *bytes.address().add(bytes.length()) } == 0);
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let process = test_process();

        let result = process.allocate_text_from_bytes(&[0xff, 0xfe]);
        match result {
            Err(e) => assert!(*e.error_kind() == ErrorKind::InvalidString),
            Ok(_) => panic!("invalid UTF-8 must be rejected"),
        }
    }

    #[test]
    fn text_long_content_goes_external() {
        let process = test_process();

        let long = "x".repeat(5000);
        let text = process.allocate_text(&long).expect("allocation failed");
        let text = unsafe { text.as_ref() };

        assert!(!text.content_on_heap());
        assert!(text.length() == 5000);
        assert!(text.size() == Text::external_allocation_size());
        assert!(text.as_str(&process) == long);
        // external content keeps the trailing NUL contract too
        let bytes = text.bytes();
        assert!(unsafe { *bytes.address().add(bytes.length()) } == 0);
        // hashing reads through the external pointer
        assert!(text.hash_code() == Text::compute_hash_code_for(long.as_bytes()));
    }

    #[test]
    fn text_empty() {
        let process = test_process();

        let text = process.allocate_text("").expect("allocation failed");
        let text = unsafe { text.as_ref() };

        assert!(text.is_empty());
        assert!(text.length() == 0);
        assert!(text.as_str(&process) == "");
    }
}
