/// The byte-array shape. Two representations share one class tag:
///
/// internal: [header:w][length:w][content: length bytes][padding]
/// external: [header:w][-1-length:w][address:w][external tag:w]
///
/// The sign of the length word is the discriminator. External byte arrays
/// can wrap C structs as well as raw bytes; the external tag word records
/// which, and only raw-tagged externals expose byte content.
use std::cell::Cell;
use std::fmt;
use std::mem::size_of;
use std::ptr::write_bytes;

use static_assertions::const_assert;

use scavheap::{max_payload_size, word_align, RawPtr, BLOCK_SIZE, WORD_SIZE};

use crate::blob::MutableBlob;
use crate::headers::{word_at, word_at_put, ClassId, HeapObject, ObjectHeader, TypeTag};
use crate::printer::Print;
use crate::process::Process;
use crate::program::Program;
use crate::safeptr::MutatorScope;
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::visitor::PointerCallback;

/// External tag for plain byte buffers; the only tag whose content is
/// reachable through the byte projections.
pub const RAW_BYTE_TAG: usize = 0;
/// External tag for a detached or never-attached buffer.
pub const NULL_STRUCT_TAG: usize = 1;
/// External tags at or above this wrap C structs and hide their content.
pub const WRAPPED_STRUCT_TAG: usize = 2;

#[repr(C)]
pub struct ByteArray {
    header: ObjectHeader,
    length: Cell<isize>,
}

const_assert!(size_of::<ByteArray>() == ByteArray::HEADER_SIZE);

impl ByteArray {
    pub(crate) const HEADER_SIZE: usize = HeapObject::SIZE + WORD_SIZE;

    const EXTERNAL_ADDRESS_OFFSET: usize = ByteArray::HEADER_SIZE;
    const EXTERNAL_TAG_OFFSET: usize = ByteArray::EXTERNAL_ADDRESS_OFFSET + WORD_SIZE;
    const EXTERNAL_SIZE: usize = ByteArray::EXTERNAL_TAG_OFFSET + WORD_SIZE;

    /// Byte arrays longer than this serialize in the external form.
    pub const SNAPSHOT_INTERNAL_SIZE_CUTOFF: usize = BLOCK_SIZE >> 2;

    pub const MIN_IO_BUFFER_SIZE: usize = 128;
    /// Selected to be able to contain most MTUs (1500), but still align to 512 bytes.
    pub const PREFERRED_IO_BUFFER_SIZE: usize = 1536 - ByteArray::HEADER_SIZE;

    pub fn cast(obj: &HeapObject) -> &ByteArray {
        debug_assert!(obj.header().class_tag() == TypeTag::ByteArray);
        unsafe { &*(obj.address() as *const ByteArray) }
    }

    fn base(&self) -> *const u8 {
        self as *const ByteArray as *const u8
    }

    fn raw_length(&self) -> isize {
        self.length.get()
    }

    pub fn has_external_address(&self) -> bool {
        self.raw_length() < 0
    }

    pub fn max_internal_size() -> usize {
        max_payload_size() - ByteArray::HEADER_SIZE
    }

    /// A uniform view of the content bytes, whichever representation backs
    /// them.
    pub fn bytes(&self) -> MutableBlob {
        let raw = self.raw_length();
        if raw >= 0 {
            let address = unsafe { self.base().add(ByteArray::HEADER_SIZE) as *mut u8 };
            MutableBlob::new(address, raw as usize)
        } else {
            MutableBlob::new(self.external_address(), (-1 - raw) as usize)
        }
    }

    pub fn length(&self) -> usize {
        self.bytes().length()
    }

    fn external_address(&self) -> *mut u8 {
        unsafe { word_at(self.base(), ByteArray::EXTERNAL_ADDRESS_OFFSET) as *mut u8 }
    }

    pub fn external_tag(&self) -> usize {
        debug_assert!(self.has_external_address());
        unsafe { word_at(self.base(), ByteArray::EXTERNAL_TAG_OFFSET) }
    }

    fn set_external_address(&self, address: *mut u8) {
        debug_assert!(self.has_external_address());
        unsafe {
            word_at_put(
                self.base(),
                ByteArray::EXTERNAL_ADDRESS_OFFSET,
                address as usize,
            )
        }
    }

    /// Retag the external buffer; wrapped-struct tags hide the content
    /// from the byte projections.
    pub(crate) fn set_external_tag(&self, tag: usize) {
        debug_assert!(self.has_external_address());
        unsafe { word_at_put(self.base(), ByteArray::EXTERNAL_TAG_OFFSET, tag) }
    }

    fn set_external_length(&self, length: usize) {
        self.length.set(-1 - length as isize);
    }

    pub fn size(&self) -> usize {
        if self.has_external_address() {
            ByteArray::external_allocation_size()
        } else {
            ByteArray::internal_allocation_size(self.raw_length() as usize)
        }
    }

    pub fn internal_allocation_size(length: usize) -> usize {
        debug_assert!(length <= ByteArray::max_internal_size());
        word_align(ByteArray::HEADER_SIZE + length)
    }

    pub fn external_allocation_size() -> usize {
        word_align(ByteArray::EXTERNAL_SIZE)
    }

    /// Allocation size for a byte-array shell about to be read from a
    /// snapshot: content past the cutoff arrives in the external form.
    pub fn snapshot_allocation_size(length: usize) -> usize {
        if length > ByteArray::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            ByteArray::external_allocation_size()
        } else {
            ByteArray::internal_allocation_size(length)
        }
    }

    /// Shrink an internal byte array in place. Only legal while the object
    /// is the topmost allocation of its block and only to a smaller length.
    pub fn resize(&self, program: &Program, new_length: usize) {
        assert!(!self.has_external_address());
        assert!(new_length as isize <= self.raw_length());

        let obj = unsafe { &*(self.base() as *const HeapObject) };
        assert!(obj.is_at_block_top(program));

        if new_length as isize != self.raw_length() {
            let old_size = self.size();
            let new_size = ByteArray::internal_allocation_size(new_length);
            unsafe { scavheap::shrink_block_top(self.base(), old_size, new_size) };
            self.length.set(new_length as isize);
            debug_assert!(obj.is_at_block_top(program));
        }
    }

    /// Detach the external buffer from a raw-tagged external byte array,
    /// returning it to the caller. The byte array is left empty and the
    /// owning process's external-allocation account is credited.
    pub fn neuter(&self, process: &Process) -> *mut u8 {
        assert!(self.has_external_address());
        assert!(self.external_tag() == RAW_BYTE_TAG);

        let bytes = self.bytes();
        process.unregister_external_allocation(bytes.length());
        self.set_external_address(std::ptr::null_mut());
        self.set_external_length(0);
        self.set_external_tag(NULL_STRUCT_TAG);
        bytes.address()
    }

    pub fn do_pointers(&self, callback: &mut dyn PointerCallback) {
        if self.has_external_address() {
            let cell = unsafe {
                &*(self.base().add(ByteArray::EXTERNAL_ADDRESS_OFFSET) as *const Cell<*mut u8>)
            };
            callback.c_address(cell);
        }
    }

    pub fn write_content(&self, writer: &mut dyn SnapshotWriter) {
        let bytes = self.bytes();
        if bytes.length() > ByteArray::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            if self.has_external_address() && self.external_tag() != RAW_BYTE_TAG {
                panic!("Can only serialize raw bytes");
            }
            writer.write_external_list_uint8(bytes.as_slice());
        } else {
            for index in 0..bytes.length() {
                writer.write_cardinal(bytes.at(index) as u32);
            }
        }
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader, length: usize) {
        if length > ByteArray::SNAPSHOT_INTERNAL_SIZE_CUTOFF {
            self.set_external_length(length);
            let external_bytes = reader.read_external_list_uint8();
            debug_assert!(external_bytes.len() == length);
            self.set_external_tag(RAW_BYTE_TAG);
            self.set_external_address(Box::into_raw(external_bytes) as *mut u8);
        } else {
            self.length.set(length as isize);
            let bytes = self.bytes();
            for index in 0..length {
                bytes.at_put(index, reader.read_cardinal() as u8);
            }
        }
    }

    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        length: usize,
    ) -> RawPtr<ByteArray> {
        let byte_array = ptr.cast::<ByteArray>();
        byte_array.as_ref().header.set(class_id, TypeTag::ByteArray);
        byte_array.as_ref().length.set(length as isize);
        write_bytes(ptr.get_mut().add(ByteArray::HEADER_SIZE), 0, length);
        byte_array
    }

    pub(crate) unsafe fn initialize_external(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        length: usize,
        address: *mut u8,
    ) -> RawPtr<ByteArray> {
        let byte_array = ptr.cast::<ByteArray>();
        byte_array.as_ref().header.set(class_id, TypeTag::ByteArray);
        byte_array.as_ref().set_external_length(length);
        word_at_put(
            ptr.get(),
            ByteArray::EXTERNAL_ADDRESS_OFFSET,
            address as usize,
        );
        word_at_put(
            ptr.get(),
            ByteArray::EXTERNAL_TAG_OFFSET,
            if address.is_null() {
                NULL_STRUCT_TAG
            } else {
                RAW_BYTE_TAG
            },
        );
        byte_array
    }
}

impl Print for ByteArray {
    fn print<'guard>(
        &self,
        _guard: &'guard dyn MutatorScope,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(f, "ByteArray[{}]", self.length())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::process::Process;
    use crate::program::Program;
    use std::sync::Arc;

    fn test_process() -> Process {
        Process::new(Arc::new(Program::new()))
    }

    #[test]
    fn byte_array_internal_content() {
        let process = test_process();

        let array = process.allocate_byte_array(5).expect("allocation failed");
        let array = unsafe { array.as_ref() };

        assert!(!array.has_external_address());
        assert!(array.length() == 5);

        let bytes = array.bytes();
        for index in 0..5 {
            assert!(bytes.at(index) == 0);
            bytes.at_put(index, (index as u8 + 1) * 10);
        }
        assert!(bytes.as_slice() == &[10, 20, 30, 40, 50]);
    }

    #[test]
    fn byte_array_size_formulas() {
        let process = test_process();

        let internal = process.allocate_byte_array(5).expect("allocation failed");
        let internal = unsafe { internal.as_ref() };
        assert!(internal.size() == ByteArray::internal_allocation_size(5));

        let buffer = vec![0u8; 16].into_boxed_slice();
        let external = process
            .allocate_external_byte_array(buffer)
            .expect("allocation failed");
        let external = unsafe { external.as_ref() };
        assert!(external.size() == ByteArray::external_allocation_size());
    }

    #[test]
    fn byte_array_external_tagging() {
        let process = test_process();

        let buffer = vec![7u8; 32].into_boxed_slice();
        let array = process
            .allocate_external_byte_array(buffer)
            .expect("allocation failed");
        let array = unsafe { array.as_ref() };

        assert!(array.has_external_address());
        assert!(array.external_tag() == RAW_BYTE_TAG);
        assert!(array.length() == 32);
        assert!(array.bytes().at(31) == 7);
    }

    #[test]
    fn byte_array_neuter_returns_buffer() {
        let process = test_process();

        let buffer = vec![3u8; 256].into_boxed_slice();
        let array = process
            .allocate_external_byte_array(buffer)
            .expect("allocation failed");
        let array = unsafe { array.as_ref() };

        assert!(process.external_allocated() == 256);

        let returned = array.neuter(&process);

        assert!(process.external_allocated() == 0);
        assert!(array.length() == 0);
        assert!(!returned.is_null());

        let buffer = unsafe { Vec::from_raw_parts(returned, 256, 256) };
        assert!(buffer.iter().all(|byte| *byte == 3));
    }

    #[test]
    fn byte_array_resize_shrinks_in_place() {
        let process = test_process();
        let program = process.program();

        let array = process.allocate_byte_array(64).expect("allocation failed");
        let array = unsafe { array.as_ref() };

        array.resize(program, 16);

        assert!(array.length() == 16);
        assert!(array.size() == ByteArray::internal_allocation_size(16));

        // the freed tail is immediately reusable
        let next = process.allocate_byte_array(8).expect("allocation failed");
        let next = unsafe { next.as_ref() };
        let expected = array as *const ByteArray as usize + ByteArray::internal_allocation_size(16);
        assert!(next as *const ByteArray as usize == expected);
    }

    #[test]
    fn byte_array_do_pointers_visits_external_address() {
        use crate::safeptr::TaggedCellPtr;
        use crate::visitor::PointerCallback;

        struct Collector {
            objects: usize,
            c_addresses: Vec<*mut u8>,
        }
        impl PointerCallback for Collector {
            fn object_address(&mut self, _slot: &TaggedCellPtr) {
                self.objects += 1;
            }
            fn c_address(&mut self, address: &std::cell::Cell<*mut u8>) {
                self.c_addresses.push(address.get());
            }
        }

        let process = test_process();
        let buffer = vec![1u8; 8].into_boxed_slice();
        let array = process
            .allocate_external_byte_array(buffer)
            .expect("allocation failed");
        let array = unsafe { array.as_ref() };

        let mut collector = Collector {
            objects: 0,
            c_addresses: Vec::new(),
        };
        array.do_pointers(&mut collector);

        assert!(collector.objects == 0);
        assert!(collector.c_addresses.len() == 1);
        assert!(collector.c_addresses[0] == array.bytes().address());
    }
}
