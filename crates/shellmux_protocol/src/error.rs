//! Error kinds delivered through command results (never thrown to the
//! caller of `submit`/`execute`) and through bulk-channel return values.

use thiserror::Error;

/// Every error a command result or bulk-channel call can carry. `Clone`
/// so the same value can be stored in a command record and handed to
/// both the future and an optional callback without an allocation race.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// Deadline scanner fired, or a bulk operation's wait expired.
    #[error("command timed out")]
    TimedOut,

    /// Host stopped while the command was in flight.
    #[error("aborted: host is stopping")]
    Aborted,

    /// Submit arrived while the lifecycle gate is closed for an
    /// in-progress auto-restart.
    #[error("engine is restarting")]
    Restarting,

    /// Submit arrived before `start` or after a terminal `stop`.
    #[error("engine is not running")]
    NotRunning,

    /// Bulk reader observed `length > frame_bytes`, or a validity flag
    /// was false where `true` was required.
    #[error("bad shared-memory channel state: {0}")]
    BadState(String),

    /// Bulk reader's capacity is less than the stored length. `required`
    /// reports the exact length so the caller can retry with a bigger
    /// buffer.
    #[error("buffer too small: need {required} bytes")]
    BufferTooSmall { required: usize },

    /// A bulk read with a zero timeout found nothing new.
    #[error("would block")]
    WouldBlock,

    /// Payload exceeds `frame_bytes`, a null/invalid input was given, or
    /// the frame size requested at open does not match an existing
    /// mapping.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// An OS-level failure (mmap, wait, pipe, spawn).
    #[error("system error: {0}")]
    SystemError(String),
}

impl ErrorKind {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::TimedOut)
    }
}
