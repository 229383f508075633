/// The instance shape: N tagged slots after the header, where N comes from
/// the program's class table. Tasks are instances with their own class tag
/// and fixed low slot indices, so the stack machinery can special-case them
/// without a class-id lookup. Oddballs (the distinguished true and false
/// objects) are zero-slot instances living in the program heap.
use std::slice::from_raw_parts;

use scavheap::{word_align, RawPtr, WORD_SIZE};

use crate::headers::{ClassId, HeapObject, ObjectHeader, TypeTag};
use crate::program::Program;
use crate::safeptr::TaggedCellPtr;
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::taggedptr::TaggedPtr;
use crate::visitor::RootCallback;

#[repr(C)]
pub struct Instance {
    header: ObjectHeader,
}

impl Instance {
    pub(crate) const HEADER_SIZE: usize = HeapObject::SIZE;

    pub fn cast(obj: &HeapObject) -> &Instance {
        debug_assert!(match obj.header().class_tag() {
            TypeTag::Instance | TypeTag::Task | TypeTag::Oddball => true,
            _ => false,
        });
        unsafe { &*(obj.address() as *const Instance) }
    }

    /// The number of tagged slots held by an instance of the given byte
    /// size.
    pub fn length_from_size(instance_size: usize) -> usize {
        (instance_size - Instance::HEADER_SIZE) / WORD_SIZE
    }

    pub fn allocation_size(field_count: usize) -> usize {
        word_align(Instance::HEADER_SIZE + field_count * WORD_SIZE)
    }

    /// Returns the number of real fields in the instance.
    pub fn length(&self, program: &Program) -> usize {
        Instance::length_from_size(program.instance_size_for(self.as_heap_object()))
    }

    pub(crate) fn as_heap_object(&self) -> &HeapObject {
        unsafe { &*(self as *const Instance as *const HeapObject) }
    }

    fn slots(&self, instance_size: usize) -> &[TaggedCellPtr] {
        unsafe {
            let base = (self as *const Instance as *const u8).add(Instance::HEADER_SIZE);
            from_raw_parts(
                base as *const TaggedCellPtr,
                Instance::length_from_size(instance_size),
            )
        }
    }

    /// The slot cell at `index`, unchecked against the class table. The
    /// caller guarantees the index is within the instance's field count.
    pub(crate) unsafe fn slot_unchecked(&self, index: usize) -> &TaggedCellPtr {
        let base = (self as *const Instance as *const u8).add(Instance::HEADER_SIZE);
        &*(base as *const TaggedCellPtr).add(index)
    }

    /// Read the field at `index`. The index must be within the field count.
    pub fn at(&self, program: &Program, index: usize) -> TaggedPtr {
        let size = program.instance_size_for(self.as_heap_object());
        self.slots(size)[index].get_ptr()
    }

    /// Write the field at `index`. The index must be within the field count.
    pub fn at_put(&self, program: &Program, index: usize, value: TaggedPtr) {
        let size = program.instance_size_for(self.as_heap_object());
        self.slots(size)[index].set_to_ptr(value)
    }

    pub fn roots_do(&self, instance_size: usize, callback: &mut dyn RootCallback) {
        callback.do_roots(self.slots(instance_size));
    }

    pub fn write_content(&self, instance_size: usize, writer: &mut dyn SnapshotWriter) {
        let slots = self.slots(instance_size);
        writer.write_cardinal(slots.len() as u32);
        for slot in slots {
            writer.write_object(slot.get_ptr());
        }
    }

    pub fn read_content(&self, reader: &mut dyn SnapshotReader) {
        let len = reader.read_cardinal() as usize;
        for index in 0..len {
            unsafe { self.slot_unchecked(index).set_to_ptr(reader.read_object()) };
        }
    }

    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        class_tag: TypeTag,
        field_count: usize,
        filler: TaggedPtr,
    ) -> RawPtr<Instance> {
        let instance = ptr.cast::<Instance>();
        instance.as_ref().header.set(class_id, class_tag);
        for index in 0..field_count {
            instance.as_ref().slot_unchecked(index).set_to_ptr(filler);
        }
        instance
    }
}

#[repr(C)]
pub struct Task {
    header: ObjectHeader,
}

impl Task {
    pub const STACK_INDEX: usize = 0;
    pub const ID_INDEX: usize = Task::STACK_INDEX + 1;
    pub const RESULT_INDEX: usize = Task::ID_INDEX + 1;
    pub(crate) const FIELD_COUNT: usize = Task::RESULT_INDEX + 1;

    pub fn cast(obj: &HeapObject) -> &Task {
        debug_assert!(obj.header().class_tag() == TypeTag::Task);
        unsafe { &*(obj.address() as *const Task) }
    }

    fn as_instance(&self) -> &Instance {
        unsafe { &*(self as *const Task as *const Instance) }
    }

    pub fn tagged(&self) -> TaggedPtr {
        TaggedPtr::from_object_address(self as *const Task as usize)
    }

    fn slot(&self, index: usize) -> &TaggedCellPtr {
        debug_assert!(index < Task::FIELD_COUNT);
        unsafe { self.as_instance().slot_unchecked(index) }
    }

    /// The stack slot value: a stack object while the task is runnable,
    /// small integer zero after `detach_stack`.
    pub fn stack(&self) -> TaggedPtr {
        self.slot(Task::STACK_INDEX).get_ptr()
    }

    pub fn set_stack(&self, stack: TaggedPtr) {
        debug_assert!(stack.is_stack());
        self.slot(Task::STACK_INDEX).set_to_ptr(stack);
    }

    /// Clear the stack slot so a terminated task's frames are not kept
    /// alive by the collector.
    pub fn detach_stack(&self) {
        self.slot(Task::STACK_INDEX).clear();
    }

    pub fn has_stack(&self) -> bool {
        self.stack().is_stack()
    }

    pub fn id(&self) -> isize {
        self.slot(Task::ID_INDEX).get_ptr().smi_value()
    }

    pub fn result(&self) -> TaggedPtr {
        self.slot(Task::RESULT_INDEX).get_ptr()
    }

    pub fn set_result(&self, value: TaggedPtr) {
        self.slot(Task::RESULT_INDEX).set_to_ptr(value);
    }

    pub(crate) unsafe fn initialize(
        ptr: RawPtr<u8>,
        class_id: ClassId,
        stack: TaggedPtr,
        id: isize,
    ) -> RawPtr<Task> {
        let instance = Instance::initialize(
            ptr,
            class_id,
            TypeTag::Task,
            Task::FIELD_COUNT,
            TaggedPtr::zero(),
        );
        let task = instance.cast::<Task>();
        task.as_ref().set_stack(stack);
        task.as_ref()
            .slot(Task::ID_INDEX)
            .set_to_ptr(TaggedPtr::from_smi(id));
        task
    }
}
