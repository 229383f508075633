use std::cell::Cell;
use std::fmt;
use std::mem::size_of;
use std::ops::Deref;

use static_assertions::const_assert;

use scavheap::WORD_SIZE;

use crate::printer::Print;
use crate::taggedptr::{FatPtr, TaggedPtr, Value};

/// Type that provides a generic anchor for mutator timeslice lifetimes
pub trait MutatorScope {}

/// An untagged compile-time typed pointer with scope limited by `MutatorScope`
pub struct ScopedPtr<'guard, T: Sized> {
    value: &'guard T,
}

impl<'guard, T: Sized> ScopedPtr<'guard, T> {
    pub fn new(_guard: &'guard dyn MutatorScope, value: &'guard T) -> ScopedPtr<'guard, T> {
        ScopedPtr { value }
    }
}

/// Anything that _has_ a scope lifetime can pass as a scope representation
impl<'scope, T: Sized> MutatorScope for ScopedPtr<'scope, T> {}

impl<'guard, T: Sized> Clone for ScopedPtr<'guard, T> {
    fn clone(&self) -> ScopedPtr<'guard, T> {
        ScopedPtr { value: self.value }
    }
}

impl<'guard, T: Sized> Copy for ScopedPtr<'guard, T> {}

impl<'guard, T: Sized> Deref for ScopedPtr<'guard, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<'guard, T: Sized + Print> fmt::Display for ScopedPtr<'guard, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.print(self, f)
    }
}

impl<'guard, T: Sized + Print> fmt::Debug for ScopedPtr<'guard, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.print(self, f)
    }
}

impl<'guard, T: Sized> PartialEq for ScopedPtr<'guard, T> {
    fn eq(&self, rhs: &ScopedPtr<'guard, T>) -> bool {
        self.value as *const T == rhs.value as *const T
    }
}

/// A heap slot: a tagged word with interior mutability, allowing the slot to
/// be updated to point at different target objects. Object bodies are made
/// of these, so a root visitor receives `&TaggedCellPtr` and may retarget
/// the slot in place.
#[repr(transparent)]
#[derive(Clone)]
pub struct TaggedCellPtr {
    inner: Cell<TaggedPtr>,
}

const_assert!(size_of::<TaggedCellPtr>() == WORD_SIZE);

impl TaggedCellPtr {
    /// Construct a slot holding small integer zero - the cleared state.
    pub fn new_zero() -> TaggedCellPtr {
        TaggedCellPtr {
            inner: Cell::new(TaggedPtr::zero()),
        }
    }

    /// Construct a new TaggedCellPtr from a TaggedPtr
    pub fn new_ptr(source: TaggedPtr) -> TaggedCellPtr {
        TaggedCellPtr {
            inner: Cell::new(source),
        }
    }

    /// Return the pointer as a `TaggedScopedPtr` type that carries a copy of the `TaggedPtr` and
    /// a `Value` type for both copying and access convenience
    pub fn get<'guard>(&self, guard: &'guard dyn MutatorScope) -> TaggedScopedPtr<'guard> {
        TaggedScopedPtr::new(guard, self.inner.get())
    }

    /// Take the pointer of another `TaggedCellPtr` and set this instance to point at that object too
    pub fn copy_from(&self, other: &TaggedCellPtr) {
        self.inner.set(other.inner.get());
    }

    /// Set this slot to small integer zero
    pub fn clear(&self) {
        self.inner.set(TaggedPtr::zero())
    }

    /// Set this pointer to another TaggedPtr
    pub fn set_to_ptr(&self, ptr: TaggedPtr) {
        self.inner.set(ptr)
    }

    /// Return the raw TaggedPtr from within
    pub fn get_ptr(&self) -> TaggedPtr {
        self.inner.get()
    }
}

/// A _tagged_ runtime typed pointer type with scope limited by `MutatorScope` such that a `Value`
/// instance can safely be derived and accessed. This type is neccessary to derive `Value`s from.
#[derive(Copy, Clone)]
pub struct TaggedScopedPtr<'guard> {
    ptr: TaggedPtr,
    value: Value<'guard>,
}

impl<'guard> TaggedScopedPtr<'guard> {
    pub fn new(guard: &'guard dyn MutatorScope, ptr: TaggedPtr) -> TaggedScopedPtr<'guard> {
        TaggedScopedPtr {
            ptr,
            value: FatPtr::from(ptr).as_value(guard),
        }
    }

    pub fn value(&self) -> Value<'guard> {
        self.value
    }

    pub fn get_ptr(&self) -> TaggedPtr {
        self.ptr
    }
}

/// Anything that _has_ a scope lifetime can pass as a scope representation. `Value` also implements
/// `MutatorScope` so this is largely for consistency.
impl<'scope> MutatorScope for TaggedScopedPtr<'scope> {}

impl<'guard> Deref for TaggedScopedPtr<'guard> {
    type Target = Value<'guard>;

    fn deref(&self) -> &Value<'guard> {
        &self.value
    }
}

impl<'guard> fmt::Display for TaggedScopedPtr<'guard> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<'guard> fmt::Debug for TaggedScopedPtr<'guard> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<'guard> PartialEq for TaggedScopedPtr<'guard> {
    fn eq(&self, rhs: &TaggedScopedPtr<'guard>) -> bool {
        self.ptr == rhs.ptr
    }
}
