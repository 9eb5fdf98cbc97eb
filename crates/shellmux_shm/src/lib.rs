//! Shared-memory bulk channel: a side door around the text multiplexer
//! for payloads too large or too hot to push through stdin/stdout.
//!
//! The mapping itself (`mapping.rs`) is platform-neutral, built on
//! `memmap2`. The named mutex and the four named events are not —
//! `sync_unix`/`sync_windows` provide the same two types
//! (`NamedMutex`, `NamedEvent`) over POSIX named semaphores and Win32
//! kernel objects respectively, selected by `cfg(unix)`/`cfg(windows)`
//! in `channel.rs`.

mod channel;
mod mapping;

#[cfg(unix)]
mod sync_unix;
#[cfg(windows)]
mod sync_windows;

pub use channel::{BulkChannel, ReadOutcome};
pub use shellmux_protocol::{Direction, ErrorKind, StatusCode};

#[cfg(feature = "chunked")]
pub use shellmux_protocol::ChunkMeta;
