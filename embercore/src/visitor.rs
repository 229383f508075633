use std::cell::Cell;
use std::slice::from_ref;

use crate::safeptr::TaggedCellPtr;

/// Polymorphic visitor over the tagged-pointer slots of heap objects, used
/// by the scavenger and by snapshot traversal. The callback receives the
/// slots themselves and may retarget them, which is how forwarding updates
/// reach object bodies.
pub trait RootCallback {
    fn do_root(&mut self, root: &TaggedCellPtr) {
        self.do_roots(from_ref(root))
    }

    fn do_roots(&mut self, roots: &[TaggedCellPtr]);
}

/// Visitor over object pointers plus the raw out-of-heap addresses kept in
/// external byte arrays; the snapshot writer needs both.
pub trait PointerCallback {
    fn object_address(&mut self, slot: &TaggedCellPtr);

    /// Visit the slot holding a raw out-of-heap buffer address.
    fn c_address(&mut self, address: &Cell<*mut u8>);
}

/// Adapts a `PointerCallback` so object shapes can route their ordinary
/// root slots through it.
pub struct PointerRootCallback<'a> {
    callback: &'a mut dyn PointerCallback,
}

impl<'a> PointerRootCallback<'a> {
    pub fn new(callback: &'a mut dyn PointerCallback) -> PointerRootCallback<'a> {
        PointerRootCallback { callback }
    }
}

impl<'a> RootCallback for PointerRootCallback<'a> {
    fn do_roots(&mut self, roots: &[TaggedCellPtr]) {
        for root in roots {
            self.callback.object_address(root);
        }
    }
}
