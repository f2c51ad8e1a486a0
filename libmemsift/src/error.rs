//! Library error taxonomy.

use crate::addr::Address;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Expression or comparator text did not parse.
    #[error("parse error at offset {at}: {msg}")]
    Parse { at: usize, msg: String },

    /// A `$name` reference outside the predicate frame.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// A remote read returned an error (not a short read).
    #[error("read failed at {addr} ({len} bytes)")]
    ReadFailed { addr: Address, len: usize },

    /// A remote write returned an error or wrote fewer bytes than asked.
    #[error("write failed at {addr} ({len} bytes)")]
    WriteFailed { addr: Address, len: usize },

    /// The region table of a PID could not be read.
    #[error("region table unavailable for pid {0}")]
    Unavailable(i32),

    /// Malformed scan request: empty type set, nonsensical step, a
    /// filter-only comparator, and the like.
    #[error("invalid scan descriptor: {0}")]
    InvalidDescriptor(String),

    /// The streaming arena could not be mapped.
    #[error("out of memory mapping the scan buffer")]
    OutOfMemory,

    /// Native code emission failed.
    #[error("jit: {0}")]
    Jit(String),

    /// Snapshot file problems: sidecar I/O, JSON shape, blob layout.
    #[error("snapshot: {0}")]
    Snapshot(String),
}
