//! Per-command state: the record the tracker keeps from `submit` until
//! the promise resolves.

use std::time::Instant;

use shellmux_protocol::{CommandId, ErrorKind};

/// What callers of `submit`/`execute`/`execute_async` get back.
///
/// The four fields through `execution_seconds` form the minimal,
/// language-neutral result shape any caller needs. `error` is a
/// Rust-native addition carrying *why* a command failed beyond a bare
/// `success == false`, since every error kind is delivered exclusively
/// through the command's result rather than thrown back to the caller.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub success: bool,
    pub execution_seconds: f64,
    pub error: Option<ErrorKind>,
}

impl CommandResult {
    /// Build a terminal failure result for `kind`, preserving whatever
    /// output had already been captured.
    pub fn failed(kind: ErrorKind, stdout: Vec<u8>, stderr: Vec<u8>, execution_seconds: f64) -> Self {
        tracing::debug!(error = %kind, "command failed");
        Self {
            stdout,
            stderr,
            exit_code: -1,
            success: false,
            execution_seconds,
            error: Some(kind),
        }
    }

    /// Build a successful result.
    pub fn succeeded(stdout: Vec<u8>, stderr: Vec<u8>, execution_seconds: f64) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: 0,
            success: true,
            execution_seconds,
            error: None,
        }
    }
}

/// The callback type accepted by `submit`/`execute_async`. Boxed so
/// `CommandRecord` doesn't need to be generic; panics inside the
/// callback are caught and swallowed rather than unwinding into the
/// I/O pump's reader thread.
pub type Callback = Box<dyn FnOnce(&CommandResult) + Send>;

/// One-shot "promise" the tracker resolves exactly once. A thin wrapper
/// over `std::sync::mpsc` rather than a dependency on an async runtime —
/// the whole multiplexer is built on blocking OS threads, so a blocking
/// `Receiver` is the natural "future" type here.
pub struct CommandHandle {
    rx: std::sync::mpsc::Receiver<CommandResult>,
}

impl CommandHandle {
    pub(crate) fn new(rx: std::sync::mpsc::Receiver<CommandResult>) -> Self {
        Self { rx }
    }

    /// Block until the command resolves. The tracker's deadline scanner
    /// guarantees this always returns, even on timeout or `stop`.
    pub fn wait(self) -> CommandResult {
        self.rx
            .recv()
            .unwrap_or_else(|_| CommandResult::failed(ErrorKind::Aborted, Vec::new(), Vec::new(), 0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    AwaitingBegin,
    Streaming,
    Succeeded,
    TimedOut,
    Aborted,
}

/// One per in-flight command. Owned uniquely by the tracker's in-flight
/// map; the FIFO holds only the identifier.
pub struct CommandRecord {
    pub id: CommandId,
    pub begin_marker: Vec<u8>,
    pub end_marker: Vec<u8>,
    pub pre_buffer: Vec<u8>,
    pub out_buffer: Vec<u8>,
    pub err_buffer: Vec<u8>,
    pub begun: bool,
    pub timed_out: bool,
    pub state: CommandState,
    pub deadline: Option<Instant>,
    pub start: Instant,
    promise_tx: Option<std::sync::mpsc::Sender<CommandResult>>,
    callback: Option<Callback>,
}

/// Cap on how much unmatched pre-begin-marker output a single command
/// will buffer before giving up on finding the marker. Large enough to
/// hold any marker plus a reasonable amount of interpreter banner noise.
pub const PRE_BUFFER_CAP: usize = 64 * 1024;

impl CommandRecord {
    pub fn new(
        id: CommandId,
        deadline: Option<Instant>,
        promise_tx: std::sync::mpsc::Sender<CommandResult>,
        callback: Option<Callback>,
    ) -> Self {
        Self {
            id,
            begin_marker: shellmux_protocol::begin_marker(id).into_bytes(),
            end_marker: shellmux_protocol::end_marker(id).into_bytes(),
            pre_buffer: Vec::new(),
            out_buffer: Vec::new(),
            err_buffer: Vec::new(),
            begun: false,
            timed_out: false,
            state: CommandState::Queued,
            deadline,
            start: Instant::now(),
            promise_tx: Some(promise_tx),
            callback,
        }
    }

    /// Resolve the promise and fire the callback exactly once. Safe to
    /// call more than once — the second call is a no-op because the
    /// sender/callback were already taken.
    pub fn complete(&mut self, result: CommandResult) {
        if let Some(cb) = self.callback.take() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&result)));
            if outcome.is_err() {
                tracing::warn!(command_id = self.id, "command callback panicked; ignoring");
            }
        }
        if let Some(tx) = self.promise_tx.take() {
            let _ = tx.send(result);
        }
    }
}
