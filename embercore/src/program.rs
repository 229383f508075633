/// The program: the read-only side of the heap split. It owns the class
/// table, the bytecode region (which doubles as the home of the frame
/// marker), and the boot-time program heap holding the oddballs. After
/// boot a program is immutable and may be shared by any number of
/// processes without synchronization.
use fnv::FnvHashMap;

use scavheap::{AllocRaw, BlockHeap, WORD_SIZE};

use crate::headers::{ClassId, HeapObject, TypeTag, CLASS_ID_MASK};
use crate::instance::{Instance, Task};
use crate::method::{self, Method, MethodKind};
use crate::taggedptr::TaggedPtr;

struct ClassEntry {
    name: String,
    tag: TypeTag,
    /// Byte footprint of an instance of this class; 0 for variable shapes.
    instance_size: usize,
}

pub struct Program {
    classes: Vec<ClassEntry>,
    class_index: FnvHashMap<String, ClassId>,
    /// Methods, packed back to back. The first word is reserved: its
    /// address is the frame marker, and no method header or bytecode ever
    /// lands there.
    bytecodes: Vec<u8>,
    heap: BlockHeap,
    true_object: TaggedPtr,
    false_object: TaggedPtr,

    array_class: ClassId,
    byte_array_class: ClassId,
    text_class: ClassId,
    double_class: ClassId,
    large_integer_class: ClassId,
    stack_class: ClassId,
    task_class: ClassId,
    true_class: ClassId,
    false_class: ClassId,
    byte_array_cow_class: ClassId,
    byte_array_slice_class: ClassId,
    string_slice_class: ClassId,
}

// A program is immutable once `new` returns; processes on other threads
// only ever read it.
unsafe impl Send for Program {}
unsafe impl Sync for Program {}

impl Program {
    pub fn new() -> Program {
        let mut program = Program {
            classes: Vec::new(),
            class_index: FnvHashMap::default(),
            bytecodes: vec![0; WORD_SIZE],
            heap: BlockHeap::new(),
            true_object: TaggedPtr::zero(),
            false_object: TaggedPtr::zero(),
            array_class: 0,
            byte_array_class: 0,
            text_class: 0,
            double_class: 0,
            large_integer_class: 0,
            stack_class: 0,
            task_class: 0,
            true_class: 0,
            false_class: 0,
            byte_array_cow_class: 0,
            byte_array_slice_class: 0,
            string_slice_class: 0,
        };

        program.array_class = program.add_class("Array_", TypeTag::Array, 0);
        program.byte_array_class = program.add_class("ByteArray_", TypeTag::ByteArray, 0);
        program.text_class = program.add_class("String_", TypeTag::Text, 0);
        program.double_class = program.add_class("float", TypeTag::Double, 0);
        program.large_integer_class = program.add_class("LargeInteger_", TypeTag::LargeInteger, 0);
        program.stack_class = program.add_class("Stack_", TypeTag::Stack, 0);
        program.task_class = program.add_class(
            "Task_",
            TypeTag::Task,
            Instance::allocation_size(Task::FIELD_COUNT),
        );
        program.true_class = program.add_class("True_", TypeTag::Oddball, Instance::allocation_size(0));
        program.false_class =
            program.add_class("False_", TypeTag::Oddball, Instance::allocation_size(0));
        program.byte_array_cow_class =
            program.add_class("CowByteArray_", TypeTag::Instance, Instance::allocation_size(2));
        program.byte_array_slice_class =
            program.add_class("ByteArraySlice_", TypeTag::Instance, Instance::allocation_size(3));
        program.string_slice_class =
            program.add_class("StringSlice_", TypeTag::Instance, Instance::allocation_size(3));

        program.true_object = program.allocate_oddball(program.true_class);
        program.false_object = program.allocate_oddball(program.false_class);

        program
    }

    fn add_class(&mut self, name: &str, tag: TypeTag, instance_size: usize) -> ClassId {
        assert!(self.classes.len() <= CLASS_ID_MASK, "class table is full");

        let id = self.classes.len() as ClassId;
        self.classes.push(ClassEntry {
            name: String::from(name),
            tag,
            instance_size,
        });
        self.class_index.insert(String::from(name), id);
        id
    }

    /// Register a user class with the given field count. Boot only.
    pub fn add_instance_class(&mut self, name: &str, field_count: usize) -> ClassId {
        self.add_class(name, TypeTag::Instance, Instance::allocation_size(field_count))
    }

    fn allocate_oddball(&self, class_id: ClassId) -> TaggedPtr {
        let ptr = self
            .heap
            .alloc_raw(Instance::allocation_size(0))
            .expect("program heap exhausted during boot");
        let oddball =
            unsafe { Instance::initialize(ptr, class_id, TypeTag::Oddball, 0, TaggedPtr::zero()) };
        TaggedPtr::from_object_address(oddball.as_word())
    }

    /// Append a method to the bytecode region, returning its offset. Boot
    /// only: processes must not be running while the region can still
    /// reallocate.
    pub fn add_method(
        &mut self,
        kind: MethodKind,
        arity: usize,
        value: i16,
        max_height: usize,
        bytecodes: &[u8],
    ) -> usize {
        let offset = self.bytecodes.len();
        method::pack_header(kind, arity, value, max_height, &mut self.bytecodes);
        self.bytecodes.extend_from_slice(bytecodes);
        offset
    }

    pub fn method_at(&self, offset: usize) -> Method {
        Method::new(&self.bytecodes[offset..])
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class_tag_for(&self, class_id: ClassId) -> TypeTag {
        self.classes[class_id as usize].tag
    }

    pub fn class_name(&self, class_id: ClassId) -> &str {
        &self.classes[class_id as usize].name
    }

    pub fn class_id_for_name(&self, name: &str) -> Option<ClassId> {
        self.class_index.get(name).copied()
    }

    /// The byte footprint of instances of the class, or 0 for variable
    /// shapes, which answer their own size.
    pub fn instance_size_for_class(&self, class_id: ClassId) -> usize {
        self.classes[class_id as usize].instance_size
    }

    /// The byte footprint of the given object per its class, or 0 if the
    /// object has a variable shape.
    pub fn instance_size_for(&self, obj: &HeapObject) -> usize {
        self.instance_size_for_class(obj.header().class_id())
    }

    /// Base address and length of the bytecode region. Stack words inside
    /// this range are raw code addresses, never tagged values.
    pub fn bytecode_range(&self) -> (usize, usize) {
        (self.bytecodes.as_ptr() as usize, self.bytecodes.len())
    }

    /// The distinguished word marking the start of a call frame. Its
    /// address lies inside the bytecode range so the root scan skips it by
    /// the same test that skips return addresses.
    pub fn frame_marker(&self) -> TaggedPtr {
        TaggedPtr::from_raw_word(self.bytecodes.as_ptr() as usize)
    }

    pub fn absolute_bci_from_bcp(&self, bcp: *const u8) -> usize {
        let (base, length) = self.bytecode_range();
        let bci = bcp as usize - base;
        debug_assert!(bci < length);
        bci
    }

    pub fn true_object(&self) -> TaggedPtr {
        self.true_object
    }

    pub fn false_object(&self) -> TaggedPtr {
        self.false_object
    }

    /// Whether the address lies in the program heap.
    pub fn contains(&self, address: usize) -> bool {
        self.heap.contains(address as *const u8)
    }

    pub fn array_class_id(&self) -> ClassId {
        self.array_class
    }

    pub fn byte_array_class_id(&self) -> ClassId {
        self.byte_array_class
    }

    pub fn text_class_id(&self) -> ClassId {
        self.text_class
    }

    pub fn double_class_id(&self) -> ClassId {
        self.double_class
    }

    pub fn large_integer_class_id(&self) -> ClassId {
        self.large_integer_class
    }

    pub fn stack_class_id(&self) -> ClassId {
        self.stack_class
    }

    pub fn task_class_id(&self) -> ClassId {
        self.task_class
    }

    pub fn byte_array_cow_class_id(&self) -> ClassId {
        self.byte_array_cow_class
    }

    pub fn byte_array_slice_class_id(&self) -> ClassId {
        self.byte_array_slice_class
    }

    pub fn string_slice_class_id(&self) -> ClassId {
        self.string_slice_class
    }
}

impl Default for Program {
    fn default() -> Program {
        Program::new()
    }
}
