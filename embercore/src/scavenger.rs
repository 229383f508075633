/// A scavenge: one copying-collection cycle over a process heap. Live
/// objects are copied into a fresh set of blocks; the from-space blocks
/// are then released wholesale. While the cycle runs, copied objects leave
/// a marked forwarding pointer in their old header slot - the only time a
/// header may hold anything but a small integer.
use std::ptr::copy_nonoverlapping;

use scavheap::{AllocRaw, BlockHeap, RawPtr};

use crate::error::RuntimeError;
use crate::headers::HeapObject;
use crate::process::Process;
use crate::safeptr::TaggedCellPtr;
use crate::taggedptr::TaggedPtr;
use crate::visitor::RootCallback;

/// Witness that a scavenge is in progress. Only this module can construct
/// one, and installing a forwarding pointer requires it.
pub struct ScavengeScope {
    _private: (),
}

struct Scavenger<'p> {
    process: &'p Process,
    to_space: BlockHeap,
    /// Objects copied to to-space whose slots still point at from-space.
    worklist: Vec<RawPtr<HeapObject>>,
    copied: usize,
    copied_bytes: usize,
    failure: Option<RuntimeError>,
    scope: ScavengeScope,
}

impl<'p> Scavenger<'p> {
    fn forward(&mut self, value: TaggedPtr) -> TaggedPtr {
        if self.failure.is_some() {
            return value;
        }
        // Small integers move by value. Marked words never rest in slots.
        debug_assert!(!value.is_marked());
        if !value.is_heap_object() {
            return value;
        }
        // Program-heap objects are shared and never move.
        if !self.process.contains(value.object_address()) {
            return value;
        }

        let obj = unsafe { &*(value.object_address() as *const HeapObject) };
        if let Some(target) = obj.header().forwarding() {
            return TaggedPtr::from_object_address(target.as_word());
        }

        let size = obj.size(self.process.program());
        match self.to_space.alloc_raw(size) {
            Err(error) => {
                self.failure = Some(error.into());
                value
            }
            Ok(new_raw) => {
                unsafe {
                    copy_nonoverlapping(obj.address() as *const u8, new_raw.get_mut(), size)
                };
                let new_obj = new_raw.cast::<HeapObject>();
                obj.header().install_forwarding(new_obj, &self.scope);

                self.worklist.push(new_obj);
                self.copied += 1;
                self.copied_bytes += size;
                TaggedPtr::from_object_address(new_obj.as_word())
            }
        }
    }
}

impl<'p> RootCallback for Scavenger<'p> {
    fn do_roots(&mut self, roots: &[TaggedCellPtr]) {
        for root in roots {
            let forwarded = self.forward(root.get_ptr());
            root.set_to_ptr(forwarded);
        }
    }
}

/// Copy everything reachable from the process's task and the given extra
/// roots into fresh blocks and release the rest. Returns the number of
/// surviving objects.
pub(crate) fn scavenge(
    process: &Process,
    extra_roots: &[&TaggedCellPtr],
) -> Result<usize, RuntimeError> {
    let mut scavenger = Scavenger {
        process,
        to_space: BlockHeap::new(),
        worklist: Vec::new(),
        copied: 0,
        copied_bytes: 0,
        failure: None,
        scope: ScavengeScope { _private: () },
    };

    scavenger.do_root(process.task_cell());
    for root in extra_roots {
        scavenger.do_root(root);
    }

    // Breadth-first: fix the slots of each copied object, copying whatever
    // they reach.
    while let Some(obj) = scavenger.worklist.pop() {
        let obj = unsafe { obj.as_ref() };
        obj.roots_do(process.program(), &mut scavenger);
    }

    if let Some(error) = scavenger.failure {
        return Err(error);
    }

    let copied = scavenger.copied;
    process.set_heap_allocated(scavenger.copied_bytes);
    process.heap().adopt(scavenger.to_space);
    Ok(copied)
}
