//! Scan/filter engine for inspecting and mutating another process's memory.
//!
//! The pipeline: the region enumerator snapshots the target's mappings, the
//! scan driver streams each readable region through a fixed arena, a typed
//! comparator or JIT-compiled predicate tests every stride, and accepted
//! candidates land in the match store. Successive filters re-read the
//! matches in bulk and narrow the set; the expression language provides the
//! predicates, with `$old`, `$new` and `$addr` bound per candidate.

pub mod addr;
pub mod buffer;
pub mod comparators;
pub mod error;
pub mod expr;
pub mod jit;
pub mod process;
pub mod region;
pub mod scanner;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod streamer;
pub mod value;

pub use addr::Address;
pub use error::Error;
pub use expr::{Comparator, ComparatorKind, Signedness};
pub use jit::JitCode;
pub use process::{
    find_process_by_name, LiveProcess, ProcessPort, ProcessState, ScopedSuspend,
};
pub use region::{Protection, Region};
pub use scanner::ScanDescriptor;
pub use session::Session;
pub use snapshot::SnapshotProcess;
pub use store::{Match, MatchStore};
pub use value::{TypeSet, TypeTag, Value};
