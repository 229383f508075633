/// Byte-content projection: the one place that knows how to view strings,
/// byte arrays, copy-on-write wrappers and slice views as plain runs of
/// bytes. Primitives accepting "byte-like" arguments go through these two
/// entry points and stay ignorant of the shapes behind them.
use std::ptr::copy_nonoverlapping;

use crate::bytearray::{ByteArray, RAW_BYTE_TAG};
use crate::error::RuntimeError;
use crate::instance::Instance;
use crate::process::Process;
use crate::program::Program;
use crate::safeptr::MutatorScope;
use crate::taggedptr::TaggedPtr;
use crate::text::Text;

/// Which shapes a read-only projection accepts.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BlobKind {
    StringsOrByteArrays,
    StringsOnly,
}

/// A read-only memory address with the size of it.
#[derive(Copy, Clone)]
pub struct Blob {
    address: *const u8,
    length: usize,
}

impl Blob {
    pub fn new(address: *const u8, length: usize) -> Blob {
        Blob { address, length }
    }

    pub fn address(&self) -> *const u8 {
        self.address
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn at(&self, index: usize) -> u8 {
        debug_assert!(index < self.length);
        unsafe { *self.address.add(index) }
    }

    pub fn as_slice<'guard>(&self, _guard: &'guard dyn MutatorScope) -> &'guard [u8] {
        if self.length == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.address, self.length) }
    }

    /// Content comparison against a plain string.
    pub fn slow_equals(&self, other: &str) -> bool {
        if self.length != other.len() {
            return false;
        }
        unsafe { std::slice::from_raw_parts(self.address, self.length) == other.as_bytes() }
    }
}

/// Same as `Blob` but the mutable version of it.
#[derive(Copy, Clone)]
pub struct MutableBlob {
    address: *mut u8,
    length: usize,
}

impl MutableBlob {
    pub fn new(address: *mut u8, length: usize) -> MutableBlob {
        MutableBlob { address, length }
    }

    pub fn address(&self) -> *mut u8 {
        self.address
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn at(&self, index: usize) -> u8 {
        debug_assert!(index < self.length);
        unsafe { *self.address.add(index) }
    }

    pub fn at_put(&self, index: usize, value: u8) {
        debug_assert!(index < self.length);
        unsafe { *self.address.add(index) = value };
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.length == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.address, self.length) }
    }
}

/// Result of a successful mutable projection. `AllocationFailure` is the
/// "this should have worked" case: the shape was right but making a
/// copy-on-write backing mutable ran out of memory, so the caller should
/// scavenge and retry.
pub enum MutableContent {
    Bytes(MutableBlob),
    AllocationFailure(RuntimeError),
}

impl TaggedPtr {
    /// Project this value as read-only bytes, or `None` if its shape does
    /// not carry byte content under the given kind.
    pub fn byte_content(self, program: &Program, kind: BlobKind) -> Option<Blob> {
        if self.is_text() {
            let text = unsafe { &*(self.object_address() as *const Text) };
            return Some(text.bytes());
        }

        if kind == BlobKind::StringsOrByteArrays && self.is_byte_array() {
            let byte_array = unsafe { &*(self.object_address() as *const ByteArray) };
            // External byte arrays can have structs in them; only the
            // raw-byte tag exposes content.
            if byte_array.has_external_address() && byte_array.external_tag() != RAW_BYTE_TAG {
                return None;
            }
            let bytes = byte_array.bytes();
            return Some(Blob::new(bytes.address(), bytes.length()));
        }

        if self.is_instance() {
            let instance = unsafe { &*(self.object_address() as *const Instance) };
            let class_id = instance.as_heap_object().header().class_id();

            if kind == BlobKind::StringsOrByteArrays
                && class_id == program.byte_array_cow_class_id()
            {
                let backing = instance.at(program, 0);
                return backing.byte_content(program, kind);
            }

            let is_byte_array_slice = kind == BlobKind::StringsOrByteArrays
                && class_id == program.byte_array_slice_class_id();
            if is_byte_array_slice || class_id == program.string_slice_class_id() {
                let wrapped = instance.at(program, 0);
                let from = instance.at(program, 1);
                let to = instance.at(program, 2);
                if !wrapped.is_heap_object() {
                    return None;
                }
                // Larger integers would be needed to slice very long
                // external buffers; only small-integer bounds are accepted.
                if !from.is_smi() || !to.is_smi() {
                    return None;
                }
                let from = from.smi_value();
                let to = to.smi_value();
                let inner = wrapped.byte_content(program, kind)?;
                if 0 <= from && from <= to && to as usize <= inner.length() {
                    return Some(Blob::new(
                        unsafe { inner.address().add(from as usize) },
                        (to - from) as usize,
                    ));
                }
                return None;
            }
        }
        None
    }

    /// Project this value as writable bytes, cloning a copy-on-write
    /// backing on first mutable access. `None` means the shape does not
    /// carry mutable byte content; strings and non-raw externals are
    /// rejected.
    pub fn mutable_byte_content(self, process: &Process) -> Option<MutableContent> {
        let program = process.program();

        if self.is_byte_array() {
            let byte_array = unsafe { &*(self.object_address() as *const ByteArray) };
            if byte_array.has_external_address() && byte_array.external_tag() != RAW_BYTE_TAG {
                return None;
            }
            return Some(MutableContent::Bytes(byte_array.bytes()));
        }

        if !self.is_instance() {
            return None;
        }
        let instance = unsafe { &*(self.object_address() as *const Instance) };
        let class_id = instance.as_heap_object().header().class_id();

        if class_id == program.byte_array_cow_class_id() {
            let backing = instance.at(program, 0);
            let is_mutable = instance.at(program, 1);
            if is_mutable == program.true_object() {
                return backing.mutable_byte_content(process);
            }
            debug_assert!(is_mutable == program.false_object());

            let immutable = backing.byte_content(program, BlobKind::StringsOrByteArrays)?;

            let new_backing = match process.allocate_byte_array(immutable.length()) {
                Ok(ptr) => ptr,
                // The projection should have worked; the caller gets the
                // reason and is expected to scavenge and retry.
                Err(error) => return Some(MutableContent::AllocationFailure(error)),
            };

            let bytes = unsafe { new_backing.as_ref() }.bytes();
            unsafe {
                copy_nonoverlapping(immutable.address(), bytes.address(), immutable.length())
            };

            instance.at_put(
                program,
                0,
                TaggedPtr::from_object_address(new_backing.as_word()),
            );
            instance.at_put(program, 1, program.true_object());
            return TaggedPtr::from_object_address(new_backing.as_word())
                .mutable_byte_content(process);
        }

        if class_id == program.byte_array_slice_class_id() {
            let wrapped = instance.at(program, 0);
            let from = instance.at(program, 1);
            let to = instance.at(program, 2);
            if !wrapped.is_heap_object() {
                return None;
            }
            if !from.is_smi() || !to.is_smi() {
                return None;
            }
            let from = from.smi_value();
            let to = to.smi_value();
            return match wrapped.mutable_byte_content(process)? {
                MutableContent::AllocationFailure(error) => {
                    Some(MutableContent::AllocationFailure(error))
                }
                MutableContent::Bytes(inner) => {
                    if 0 <= from && from <= to && to as usize <= inner.length() {
                        Some(MutableContent::Bytes(MutableBlob::new(
                            unsafe { inner.address().add(from as usize) },
                            (to - from) as usize,
                        )))
                    } else {
                        None
                    }
                }
            };
        }
        None
    }
}
