/// Snapshot hooks. The shapes serialize themselves through these two
/// traits; the snapshot file format itself - headers, object tables,
/// relocation - lives above this layer. Cardinals are LEB128-encoded,
/// doubles travel as their 64-bit bit pattern, and byte content past the
/// per-shape cutoff is carried as an external uint8 list.
use crate::taggedptr::TaggedPtr;

pub trait SnapshotWriter {
    fn write_byte(&mut self, value: u8);
    fn write_cardinal(&mut self, value: u32);
    fn write_int64(&mut self, value: i64);
    fn write_double(&mut self, value: f64);
    /// Record a reference to another object in the graph.
    fn write_object(&mut self, value: TaggedPtr);
    fn write_external_list_uint8(&mut self, bytes: &[u8]);
}

pub trait SnapshotReader {
    fn read_byte(&mut self) -> u8;
    fn read_cardinal(&mut self) -> u32;
    fn read_int64(&mut self) -> i64;
    fn read_double(&mut self) -> f64;
    fn read_object(&mut self) -> TaggedPtr;
    /// Hand out an owned buffer for an external-form payload; the object
    /// being read takes ownership of it.
    fn read_external_list_uint8(&mut self) -> Box<[u8]>;
}

/// An in-memory snapshot buffer. Object references are kept out-of-band
/// as live tagged words, which is what the round-trip tests and the
/// in-process migration path need; an on-disk writer would assign ids
/// here instead.
pub struct SnapshotBuffer {
    bytes: Vec<u8>,
    cursor: usize,
    objects: Vec<TaggedPtr>,
}

impl SnapshotBuffer {
    pub fn new() -> SnapshotBuffer {
        SnapshotBuffer {
            bytes: Vec::new(),
            cursor: 0,
            objects: Vec::new(),
        }
    }

    /// Reset the read cursor to the start of the written content.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    fn take_byte(&mut self) -> u8 {
        let value = self.bytes[self.cursor];
        self.cursor += 1;
        value
    }
}

impl Default for SnapshotBuffer {
    fn default() -> SnapshotBuffer {
        SnapshotBuffer::new()
    }
}

impl SnapshotWriter for SnapshotBuffer {
    fn write_byte(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn write_cardinal(&mut self, value: u32) {
        let mut rest = value;
        while rest >= 0x80 {
            self.bytes.push((rest as u8 & 0x7f) | 0x80);
            rest >>= 7;
        }
        self.bytes.push(rest as u8);
    }

    fn write_int64(&mut self, value: i64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn write_double(&mut self, value: f64) {
        self.write_int64(value.to_bits() as i64);
    }

    fn write_object(&mut self, value: TaggedPtr) {
        let index = self.objects.len() as u32;
        self.objects.push(value);
        self.write_cardinal(index);
    }

    fn write_external_list_uint8(&mut self, bytes: &[u8]) {
        self.write_cardinal(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
    }
}

impl SnapshotReader for SnapshotBuffer {
    fn read_byte(&mut self) -> u8 {
        self.take_byte()
    }

    fn read_cardinal(&mut self) -> u32 {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.take_byte();
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return value;
            }
            shift += 7;
        }
    }

    fn read_int64(&mut self) -> i64 {
        let mut raw = [0u8; 8];
        for slot in raw.iter_mut() {
            *slot = self.take_byte();
        }
        i64::from_le_bytes(raw)
    }

    fn read_double(&mut self) -> f64 {
        f64::from_bits(self.read_int64() as u64)
    }

    fn read_object(&mut self) -> TaggedPtr {
        let index = self.read_cardinal() as usize;
        self.objects[index]
    }

    fn read_external_list_uint8(&mut self) -> Box<[u8]> {
        let length = self.read_cardinal() as usize;
        let start = self.cursor;
        self.cursor += length;
        self.bytes[start..start + length].to_vec().into_boxed_slice()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::array::Array;
    use crate::bytearray::ByteArray;
    use crate::headers::{HeapObject, TypeTag};
    use crate::instance::Instance;
    use crate::number::{Double, LargeInteger};
    use crate::process::Process;
    use crate::program::Program;
    use crate::text::Text;
    use std::sync::Arc;

    fn test_process() -> Process {
        Process::new(Arc::new(Program::new()))
    }

    #[test]
    fn cardinal_roundtrip() {
        let mut buffer = SnapshotBuffer::new();

        let values = [0u32, 1, 127, 128, 300, 16384, u32::max_value()];
        for value in &values {
            buffer.write_cardinal(*value);
        }

        buffer.rewind();
        for value in &values {
            assert!(buffer.read_cardinal() == *value);
        }
    }

    #[test]
    fn int64_and_double_roundtrip() {
        let mut buffer = SnapshotBuffer::new();

        buffer.write_int64(i64::min_value());
        buffer.write_double(-1.5);
        buffer.write_double(std::f64::NAN);

        buffer.rewind();
        assert!(buffer.read_int64() == i64::min_value());
        assert!(buffer.read_double() == -1.5);
        assert!(buffer.read_double().is_nan());
    }

    #[test]
    fn array_roundtrip() {
        let process = test_process();
        let program = process.program();

        let text = process.allocate_text("element").expect("allocation failed");
        let text_word = crate::taggedptr::TaggedPtr::from_object_address(text.as_word());

        let source = process
            .allocate_array(3, crate::taggedptr::TaggedPtr::from_smi(5))
            .expect("allocation failed");
        let source = unsafe { source.as_ref() };
        source.at_put(2, text_word);

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(Array::allocation_size(3))
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.array_class_id(), TypeTag::Array);
        let target = Array::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer, 3);

        assert!(target.length() == 3);
        assert!(target.at(0).smi_value() == 5);
        assert!(target.at(1).smi_value() == 5);
        assert!(target.at(2) == text_word);
    }

    #[test]
    fn byte_array_roundtrip_internal() {
        let process = test_process();
        let program = process.program();

        let source = process.allocate_byte_array(16).expect("allocation failed");
        let source = unsafe { source.as_ref() };
        for index in 0..16 {
            source.bytes().at_put(index, index as u8 * 3);
        }

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(ByteArray::snapshot_allocation_size(16))
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.byte_array_class_id(), TypeTag::ByteArray);
        let target = ByteArray::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer, 16);

        assert!(!target.has_external_address());
        assert!(target.bytes().as_slice() == source.bytes().as_slice());
    }

    #[test]
    fn byte_array_roundtrip_past_cutoff_is_external() {
        let process = test_process();
        let program = process.program();

        let length = ByteArray::SNAPSHOT_INTERNAL_SIZE_CUTOFF + 10;
        let content = (0..length).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
        let source = process
            .allocate_external_byte_array(content.clone().into_boxed_slice())
            .expect("allocation failed");
        let source = unsafe { source.as_ref() };

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(ByteArray::snapshot_allocation_size(length))
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.byte_array_class_id(), TypeTag::ByteArray);
        let target = ByteArray::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer, length);

        assert!(target.has_external_address());
        assert!(target.bytes().as_slice() == &content[..]);
    }

    #[test]
    fn text_roundtrip_internal() {
        let process = test_process();
        let program = process.program();

        let source = process.allocate_text("snapshot me").expect("allocation failed");
        let source = unsafe { source.as_ref() };

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(Text::snapshot_allocation_size(source.length()))
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.text_class_id(), TypeTag::Text);
        let target = Text::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer, source.length());

        assert!(target.content_on_heap());
        assert!(target.slow_equals(b"snapshot me"));
        assert!(target.hash_code() == source.hash_code());
    }

    #[test]
    fn text_roundtrip_past_cutoff_keeps_nul() {
        let process = test_process();
        let program = process.program();

        let content = "z".repeat(Text::SNAPSHOT_INTERNAL_SIZE_CUTOFF + 5);
        let source = process.allocate_text(&content).expect("allocation failed");
        let source = unsafe { source.as_ref() };

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        // the external form currently carries length + 1 bytes for the NUL
        assert!(buffer.byte_length() > content.len());

        let shell = process
            .allocate_raw(Text::snapshot_allocation_size(content.len()))
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.text_class_id(), TypeTag::Text);
        let target = Text::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer, content.len());

        assert!(!target.content_on_heap());
        assert!(target.slow_equals(content.as_bytes()));
        let bytes = target.bytes();
        assert!(unsafe { *bytes.address().add(bytes.length()) } == 0);
    }

    #[test]
    fn double_and_large_integer_roundtrip() {
        let process = test_process();
        let program = process.program();

        let source = process.allocate_double(6.25).expect("allocation failed");
        let source = unsafe { source.as_ref() };

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(Double::allocation_size())
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.double_class_id(), TypeTag::Double);
        let target = Double::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer);
        assert!(target.bits() == source.bits());

        let source = process
            .allocate_large_integer(i64::max_value())
            .expect("allocation failed");
        let source = unsafe { source.as_ref() };

        let mut buffer = SnapshotBuffer::new();
        source.write_content(&mut buffer);

        let shell = process
            .allocate_raw(LargeInteger::allocation_size())
            .expect("allocation failed");
        let obj = unsafe { &*(shell.get() as *const HeapObject) };
        obj.set_header(program.large_integer_class_id(), TypeTag::LargeInteger);
        let target = LargeInteger::cast(obj);

        buffer.rewind();
        target.read_content(&mut buffer);
        assert!(target.value() == i64::max_value());
    }

    #[test]
    fn instance_roundtrip() {
        let mut program = Program::new();
        let pair_class = program.add_instance_class("Pair", 2);
        let process = Process::new(Arc::new(program));
        let program = process.program();

        let source = process.allocate_instance(pair_class).expect("allocation failed");
        let source = unsafe { source.as_ref() };
        source.at_put(program, 0, crate::taggedptr::TaggedPtr::from_smi(11));
        source.at_put(program, 1, program.true_object());

        let instance_size = program.instance_size_for_class(pair_class);
        let mut buffer = SnapshotBuffer::new();
        source.write_content(instance_size, &mut buffer);

        let target = process.allocate_instance(pair_class).expect("allocation failed");
        let target = unsafe { target.as_ref() };

        buffer.rewind();
        target.read_content(&mut buffer);

        assert!(target.at(program, 0).smi_value() == 11);
        assert!(target.at(program, 1) == program.true_object());
    }
}
