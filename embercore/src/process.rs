/// The process: the mutable side of the heap split. A process exclusively
/// owns its block heap, its tasks and its external-allocation account;
/// only its own thread ever mutates them. The shared program is reachable
/// read-only through `program()`.
use std::cell::Cell;
use std::sync::Arc;

use scavheap::{AllocRaw, BlockHeap, RawPtr};

use crate::array::Array;
use crate::bytearray::ByteArray;
use crate::error::{err_bad_alloc, ErrorKind, RuntimeError};
use crate::headers::ClassId;
use crate::instance::{Instance, Task};
use crate::number::{Double, LargeInteger};
use crate::program::Program;
use crate::safeptr::{MutatorScope, TaggedCellPtr};
use crate::scavenger;
use crate::stack::Stack;
use crate::taggedptr::TaggedPtr;
use crate::text::Text;

pub struct Process {
    program: Arc<Program>,
    heap: BlockHeap,
    heap_allocated: Cell<usize>,
    /// Optional hard ceiling on heap bytes; embedded deployments cap each
    /// process. Exceeding it surfaces as an out-of-memory error and the
    /// caller is expected to scavenge and retry.
    heap_limit: Cell<Option<usize>>,
    external_allocated: Cell<usize>,
    next_task_id: Cell<isize>,
    /// The current task; a scavenge root. Small integer zero when the
    /// process has no task yet.
    task: TaggedCellPtr,
}

impl MutatorScope for Process {}

impl Process {
    pub fn new(program: Arc<Program>) -> Process {
        Process {
            program,
            heap: BlockHeap::new(),
            heap_allocated: Cell::new(0),
            heap_limit: Cell::new(None),
            external_allocated: Cell::new(0),
            next_task_id: Cell::new(0),
            task: TaggedCellPtr::new_zero(),
        }
    }

    /// Cap the process heap at the given byte count, or lift the cap.
    pub fn set_heap_limit(&self, limit: Option<usize>) {
        self.heap_limit.set(limit);
    }

    pub fn heap_allocated(&self) -> usize {
        self.heap_allocated.get()
    }

    pub(crate) fn set_heap_allocated(&self, bytes: usize) {
        self.heap_allocated.set(bytes);
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn heap(&self) -> &BlockHeap {
        &self.heap
    }

    /// Whether the address lies in this process's heap.
    pub fn contains(&self, address: usize) -> bool {
        self.heap.contains(address as *const u8)
    }

    pub(crate) fn allocate_raw(&self, size: usize) -> Result<RawPtr<u8>, RuntimeError> {
        if let Some(limit) = self.heap_limit.get() {
            if self.heap_allocated.get() + size > limit {
                return Err(RuntimeError::new(ErrorKind::OutOfMemory));
            }
        }
        let ptr = self.heap.alloc_raw(size)?;
        self.heap_allocated.set(self.heap_allocated.get() + size);
        Ok(ptr)
    }

    pub fn allocate_array(
        &self,
        length: usize,
        filler: TaggedPtr,
    ) -> Result<RawPtr<Array>, RuntimeError> {
        if length > Array::max_length() {
            return Err(err_bad_alloc());
        }
        let ptr = self.allocate_raw(Array::allocation_size(length))?;
        Ok(unsafe { Array::initialize(ptr, self.program.array_class_id(), length, filler) })
    }

    /// Allocate a byte array of the given length, zero-filled. Lengths past
    /// the internal maximum are backed by a fresh external buffer charged
    /// to this process.
    pub fn allocate_byte_array(&self, length: usize) -> Result<RawPtr<ByteArray>, RuntimeError> {
        if length > ByteArray::max_internal_size() {
            return self.allocate_external_byte_array(vec![0; length].into_boxed_slice());
        }
        let ptr = self.allocate_raw(ByteArray::internal_allocation_size(length))?;
        Ok(unsafe { ByteArray::initialize(ptr, self.program.byte_array_class_id(), length) })
    }

    /// Wrap an out-of-heap buffer in a raw-tagged external byte array. The
    /// buffer is owned by the object until `neuter` hands it back.
    pub fn allocate_external_byte_array(
        &self,
        buffer: Box<[u8]>,
    ) -> Result<RawPtr<ByteArray>, RuntimeError> {
        let length = buffer.len();
        let ptr = self.allocate_raw(ByteArray::external_allocation_size())?;
        let address = Box::into_raw(buffer) as *mut u8;
        self.register_external_allocation(length);
        Ok(unsafe {
            ByteArray::initialize_external(ptr, self.program.byte_array_class_id(), length, address)
        })
    }

    pub fn allocate_text(&self, content: &str) -> Result<RawPtr<Text>, RuntimeError> {
        self.allocate_text_from_bytes(content.as_bytes())
    }

    /// Allocate a string from raw bytes, which must be valid UTF-8.
    /// Content past the internal maximum is backed by an external buffer
    /// (with its trailing NUL) charged to this process.
    pub fn allocate_text_from_bytes(&self, bytes: &[u8]) -> Result<RawPtr<Text>, RuntimeError> {
        if std::str::from_utf8(bytes).is_err() {
            return Err(RuntimeError::new(ErrorKind::InvalidString));
        }

        if bytes.len() > Text::max_internal_size() {
            let mut buffer = Vec::with_capacity(bytes.len() + 1);
            buffer.extend_from_slice(bytes);
            buffer.push(0);
            let buffer = buffer.into_boxed_slice();

            let ptr = self.allocate_raw(Text::external_allocation_size())?;
            self.register_external_allocation(buffer.len());
            let address = Box::into_raw(buffer) as *const u8;
            return Ok(unsafe {
                Text::initialize_external(ptr, self.program.text_class_id(), bytes.len(), address)
            });
        }

        let ptr = self.allocate_raw(Text::internal_allocation_size(bytes.len()))?;
        Ok(unsafe { Text::initialize(ptr, self.program.text_class_id(), bytes) })
    }

    pub fn allocate_double(&self, value: f64) -> Result<RawPtr<Double>, RuntimeError> {
        let ptr = self.allocate_raw(Double::allocation_size())?;
        Ok(unsafe { Double::initialize(ptr, self.program.double_class_id(), value) })
    }

    pub fn allocate_large_integer(&self, value: i64) -> Result<RawPtr<LargeInteger>, RuntimeError> {
        let ptr = self.allocate_raw(LargeInteger::allocation_size())?;
        Ok(unsafe { LargeInteger::initialize(ptr, self.program.large_integer_class_id(), value) })
    }

    /// Allocate an instance of a fixed-size class, fields cleared to small
    /// integer zero.
    pub fn allocate_instance(&self, class_id: ClassId) -> Result<RawPtr<Instance>, RuntimeError> {
        let size = self.program.instance_size_for_class(class_id);
        assert!(size != 0, "cannot instantiate a variable-shape class");

        let ptr = self.allocate_raw(size)?;
        let field_count = Instance::length_from_size(size);
        let tag = self.program.class_tag_for(class_id);
        Ok(unsafe { Instance::initialize(ptr, class_id, tag, field_count, TaggedPtr::zero()) })
    }

    pub fn allocate_stack(&self, length: usize) -> Result<RawPtr<Stack>, RuntimeError> {
        if length > Stack::max_length() {
            return Err(err_bad_alloc());
        }
        let ptr = self.allocate_raw(Stack::allocation_size(length))?;
        Ok(unsafe { Stack::initialize(ptr, self.program.stack_class_id(), length) })
    }

    /// Allocate a task with a fresh id and an initial stack owned by it.
    pub fn allocate_task(&self) -> Result<RawPtr<Task>, RuntimeError> {
        let stack = self.allocate_stack(Stack::initial_length())?;
        let stack_word = TaggedPtr::from_object_address(stack.as_word());

        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);

        let ptr = self.allocate_raw(Instance::allocation_size(Task::FIELD_COUNT))?;
        let task = unsafe { Task::initialize(ptr, self.program.task_class_id(), stack_word, id) };

        unsafe { stack.as_ref() }.set_task(unsafe { task.as_ref() }.tagged());
        Ok(task)
    }

    pub fn current_task(&self) -> TaggedPtr {
        self.task.get_ptr()
    }

    pub fn set_current_task(&self, task: TaggedPtr) {
        debug_assert!(task.is_task());
        self.task.set_to_ptr(task);
    }

    pub(crate) fn task_cell(&self) -> &TaggedCellPtr {
        &self.task
    }

    /// Charge an out-of-heap buffer to this process's external budget.
    pub fn register_external_allocation(&self, bytes: usize) {
        self.external_allocated
            .set(self.external_allocated.get() + bytes);
    }

    /// Credit back an out-of-heap buffer on `neuter` or finalization.
    pub fn unregister_external_allocation(&self, bytes: usize) {
        debug_assert!(bytes <= self.external_allocated.get());
        self.external_allocated
            .set(self.external_allocated.get() - bytes);
    }

    pub fn external_allocated(&self) -> usize {
        self.external_allocated.get()
    }

    /// Run a scavenge over this process's heap. Objects reachable from the
    /// current task and from `extra_roots` survive into a fresh block set;
    /// everything else is reclaimed wholesale. Returns the number of
    /// surviving objects.
    pub fn scavenge(&self, extra_roots: &[&TaggedCellPtr]) -> Result<usize, RuntimeError> {
        scavenger::scavenge(self, extra_roots)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn process_external_allocation_accounting() {
        let process = Process::new(Arc::new(Program::new()));

        assert!(process.external_allocated() == 0);
        process.register_external_allocation(100);
        process.register_external_allocation(28);
        assert!(process.external_allocated() == 128);
        process.unregister_external_allocation(100);
        assert!(process.external_allocated() == 28);
    }

    #[test]
    fn process_owns_its_allocations() {
        let program = Arc::new(Program::new());
        let process = Process::new(program.clone());
        let other = Process::new(program.clone());

        let text = process.allocate_text("mine").expect("allocation failed");

        assert!(process.contains(text.as_word()));
        assert!(!other.contains(text.as_word()));
        // the program heap holds only program objects
        assert!(!program.contains(text.as_word()));
    }

    #[test]
    fn process_task_root() {
        let process = Process::new(Arc::new(Program::new()));

        assert!(process.current_task() == TaggedPtr::zero());

        let task = process.allocate_task().expect("allocation failed");
        let task_word = unsafe { task.as_ref() }.tagged();
        process.set_current_task(task_word);

        assert!(process.current_task() == task_word);
        assert!(process.current_task().is_task());
    }

    #[test]
    fn process_task_stack_backlink() {
        let process = Process::new(Arc::new(Program::new()));

        let task = process.allocate_task().expect("allocation failed");
        let task = unsafe { task.as_ref() };

        let stack_word = task.stack();
        assert!(stack_word.is_stack());
        let stack = unsafe { &*(stack_word.object_address() as *const Stack) };
        assert!(stack.task() == task.tagged());
    }
}
