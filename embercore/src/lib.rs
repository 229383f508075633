//! The object model and heap representation of a managed runtime for small
//! embedded devices: tagged single-word values, headered heap objects,
//! primitive shapes with explicit in-heap layouts, byte-content projection
//! over strings/byte arrays/cow wrappers/slice views, heap-resident call
//! stacks that transfer to and from the interpreter, packed method
//! descriptors, and the program/process heap split with a scavenging
//! collector over the process side.

mod array;
mod blob;
mod bytearray;
mod error;
mod headers;
mod instance;
mod interpreter;
mod method;
mod number;
mod pointerops;
mod printer;
mod process;
mod program;
mod safeptr;
mod scavenger;
mod snapshot;
mod stack;
mod taggedptr;
mod text;
mod visitor;

pub use crate::array::Array;
pub use crate::blob::{Blob, BlobKind, MutableBlob, MutableContent};
pub use crate::bytearray::{ByteArray, NULL_STRUCT_TAG, RAW_BYTE_TAG, WRAPPED_STRUCT_TAG};
pub use crate::error::{ErrorKind, RuntimeError};
pub use crate::headers::{ClassId, HeapObject, ObjectHeader, TypeTag};
pub use crate::instance::{Instance, Task};
pub use crate::interpreter::{Interpreter, FRAME_SIZE};
pub use crate::method::{Method, MethodKind};
pub use crate::number::{Double, LargeInteger};
pub use crate::pointerops::ScopedRef;
pub use crate::printer::Print;
pub use crate::process::Process;
pub use crate::program::Program;
pub use crate::safeptr::{MutatorScope, ScopedPtr, TaggedCellPtr, TaggedScopedPtr};
pub use crate::scavenger::ScavengeScope;
pub use crate::snapshot::{SnapshotBuffer, SnapshotReader, SnapshotWriter};
pub use crate::stack::{FrameCallback, Stack};
pub use crate::taggedptr::{FatPtr, TaggedPtr, Value};
pub use crate::text::Text;
pub use crate::visitor::{PointerCallback, PointerRootCallback, RootCallback};
