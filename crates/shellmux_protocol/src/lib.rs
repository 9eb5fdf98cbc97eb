//! Wire format for the embedded-interpreter command multiplexer.
//!
//! This crate has no knowledge of processes, threads, or memory maps — it
//! only describes bytes: the begin/end marker strings a command is framed
//! with on the interpreter's stdout, the packet written to its stdin, the
//! binary layout of the shared-memory bulk-channel header, and the error
//! kinds/status codes both `shellmux_core` and `shellmux_shm` report
//! through.

pub mod adapter;
pub mod error;
pub mod header;
pub mod marker;
pub mod status;

pub use adapter::InterpreterAdapter;
pub use error::ErrorKind;
pub use header::{BulkHeader, ChunkMeta, Direction, ExtendedBulkHeader, EXTENDED_HEADER_SIZE, HEADER_SIZE, MAGIC, VERSION};
pub use marker::{begin_marker, end_marker, PacketBuilder};
pub use status::StatusCode;

/// Command identifier: a monotonically increasing, process-wide, never
/// reused 64-bit counter. Allocated at submit time.
pub type CommandId = u64;
