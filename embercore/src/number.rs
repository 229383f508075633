/// The boxed number shapes: a 64-bit signed integer for values outside the
/// small-integer range, and a 64-bit IEEE-754 double. Both are an opaque
/// 8-byte payload after the header; the payload is read unaligned because
/// on 32-bit hosts it sits at a half-word offset.
use std::fmt;

use scavheap::{word_align, RawPtr};

use crate::headers::{int64_at, int64_at_put, ClassId, HeapObject, ObjectHeader, TypeTag};
use crate::printer::Print;
use crate::safeptr::MutatorScope;
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::taggedptr::TaggedPtr;

#[repr(C)]
pub struct LargeInteger {
    header: ObjectHeader,
}

impl LargeInteger {
    const VALUE_OFFSET: usize = HeapObject::SIZE;
    const SIZE: usize = LargeInteger::VALUE_OFFSET + 8;

    pub fn cast(obj: &HeapObject) -> &LargeInteger {
        debug_assert!(obj.header().class_tag() == TypeTag::LargeInteger);
        unsafe { &*(obj.address() as *const LargeInteger) }
    }

    pub fn allocation_size() -> usize {
        word_align(LargeInteger::SIZE)
    }

    pub fn value(&self) -> i64 {
        unsafe { int64_at(self as *const LargeInteger as *const u8, LargeInteger::VALUE_OFFSET) }
    }

    pub fn write_content(&self, writer: &mut dyn SnapshotWriter) {
        writer.write_int64(self.value());
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader) {
        unsafe {
            int64_at_put(
                self as *const LargeInteger as *const u8,
                LargeInteger::VALUE_OFFSET,
                reader.read_int64(),
            )
        };
    }

    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        value: i64,
    ) -> RawPtr<LargeInteger> {
        // values inside the small-integer range never box
        debug_assert!(
            !(value >= TaggedPtr::MIN_SMI as i64 && value <= TaggedPtr::MAX_SMI as i64)
        );

        let large = ptr.cast::<LargeInteger>();
        large.as_ref().header.set(class_id, TypeTag::LargeInteger);
        int64_at_put(ptr.get(), LargeInteger::VALUE_OFFSET, value);
        large
    }
}

impl Print for LargeInteger {
    fn print<'guard>(
        &self,
        _guard: &'guard dyn MutatorScope,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[repr(C)]
pub struct Double {
    header: ObjectHeader,
}

impl Double {
    const VALUE_OFFSET: usize = HeapObject::SIZE;
    const SIZE: usize = Double::VALUE_OFFSET + 8;

    pub fn cast(obj: &HeapObject) -> &Double {
        debug_assert!(obj.header().class_tag() == TypeTag::Double);
        unsafe { &*(obj.address() as *const Double) }
    }

    pub fn allocation_size() -> usize {
        word_align(Double::SIZE)
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits() as u64)
    }

    /// The raw bit pattern; NaN payloads survive a snapshot round trip.
    pub fn bits(&self) -> i64 {
        unsafe { int64_at(self as *const Double as *const u8, Double::VALUE_OFFSET) }
    }

    pub fn write_content(&self, writer: &mut dyn SnapshotWriter) {
        writer.write_double(self.value());
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader) {
        unsafe {
            int64_at_put(
                self as *const Double as *const u8,
                Double::VALUE_OFFSET,
                reader.read_double().to_bits() as i64,
            )
        };
    }

    pub(crate) unsafe fn initialize(ptr: RawPtr<u8>, class_id: ClassId, value: f64) -> RawPtr<Double> {
        let double = ptr.cast::<Double>();
        double.as_ref().header.set(class_id, TypeTag::Double);
        int64_at_put(ptr.get(), Double::VALUE_OFFSET, value.to_bits() as i64);
        double
    }
}

impl Print for Double {
    fn print<'guard>(
        &self,
        _guard: &'guard dyn MutatorScope,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        write!(f, "{}", self.value())
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
    fn large_integer_holds_out_of_range_values() {
        let process = test_process();

        for value in &[i64::max_value(), i64::min_value()] {
            let large = process
                .allocate_large_integer(*value)
                .expect("allocation failed");
            let large = unsafe { large.as_ref() };

            assert!(large.value() == *value);

            let obj = unsafe { &*(large as *const LargeInteger as *const HeapObject) };
            assert!(obj.size(process.program()) == LargeInteger::allocation_size());
        }
    }

    #[test]
    fn double_roundtrips_bits() {
        let process = test_process();

        for value in &[0.0f64, -0.0, 1.5, std::f64::INFINITY, std::f64::MIN_POSITIVE] {
            let double = process.allocate_double(*value).expect("allocation failed");
            let double = unsafe { double.as_ref() };

            assert!(double.value().to_bits() == value.to_bits());
        }

        // NaN keeps its payload through the bit accessor
        let nan = process
            .allocate_double(std::f64::NAN)
            .expect("allocation failed");
        let nan = unsafe { nan.as_ref() };
        assert!(nan.value().is_nan());
        assert!(nan.bits() == std::f64::NAN.to_bits() as i64);
    }
}
