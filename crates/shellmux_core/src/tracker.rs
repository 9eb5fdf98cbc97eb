//! The command tracker: ID allocation, the in-flight map, the FIFO-head
//! demultiplexer, the deadline scanner, and promise/callback resolution.
//! This is the algorithmic heart of the multiplexer.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use shellmux_protocol::{CommandId, ErrorKind};

use crate::record::{Callback, CommandHandle, CommandRecord, CommandResult, CommandState, PRE_BUFFER_CAP};

/// Sentinel the engine writes to stderr immediately before it force-
/// restarts the interpreter after a fatal timeout. Any occurrence not
/// accounted for by `expected_restart_sentinels` marks the current FIFO
/// head as timed out.
pub const RESTART_SENTINEL: &str = "__VS_INTERNAL_TIMEOUT__";

struct TrackerState {
    records: HashMap<CommandId, CommandRecord>,
    fifo: VecDeque<CommandId>,
}

/// A command that just resolved, collected while the state lock is held
/// and fired once it's released — parsing happens under the lock, but
/// nothing requires the callback to run under it too.
struct Completion {
    record: CommandRecord,
    result: CommandResult,
}

pub struct Tracker {
    next_id: AtomicU64,
    state: Mutex<TrackerState>,
    /// Chunks of stderr that arrived with an empty FIFO are dropped; this
    /// counts how many bytes, so the drop is at least observable.
    pub dropped_stderr_bytes: AtomicU64,
    /// Number of upcoming restart sentinels the engine has told the
    /// tracker to expect (decremented as they're observed and stripped
    /// silently rather than treated as a real timeout signal).
    expected_restart_sentinels: AtomicU64,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(TrackerState {
                records: HashMap::new(),
                fifo: VecDeque::new(),
            }),
            dropped_stderr_bytes: AtomicU64::new(0),
            expected_restart_sentinels: AtomicU64::new(0),
        }
    }

    pub fn alloc_id(&self) -> CommandId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Tell the tracker to expect one restart sentinel on stderr without
    /// treating it as a genuine interpreter-side timeout signal. Called
    /// by the engine right before it writes the sentinel during a forced
    /// restart.
    pub fn expect_restart_sentinel(&self) {
        self.expected_restart_sentinels.fetch_add(1, Ordering::SeqCst);
    }

    /// Register a new in-flight command. Must be called, and the record
    /// inserted, *before* the corresponding packet is handed to the
    /// writer queue, so the FIFO head always matches the first
    /// unacknowledged packet.
    pub fn register(
        &self,
        id: CommandId,
        timeout: Option<Duration>,
        callback: Option<Callback>,
    ) -> CommandHandle {
        let (tx, rx) = std::sync::mpsc::channel();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut record = CommandRecord::new(id, deadline, tx, callback);
        record.state = CommandState::Queued;

        let mut state = self.state.lock().unwrap();
        state.records.insert(id, record);
        state.fifo.push_back(id);
        drop(state);

        CommandHandle::new(rx)
    }

    /// Process a chunk of bytes freshly read from the child's stdout.
    /// Demultiplexes using the FIFO head. The caller (reader thread) must
    /// not retain `chunk` past this call; everything needed is copied
    /// into per-command buffers.
    pub fn on_stdout_chunk(&self, chunk: &[u8]) {
        let mut completions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let mut carry: Vec<u8> = chunk.to_vec();

            while !carry.is_empty() {
                let Some(&head_id) = state.fifo.front() else {
                    break;
                };
                let record = state.records.get_mut(&head_id).expect("fifo/map out of sync");

                if !record.begun {
                    record.pre_buffer.extend_from_slice(&carry);
                    match memchr::memmem::find(&record.pre_buffer, &record.begin_marker) {
                        None => {
                            // Cap the pre-buffer, keeping a trailing window
                            // large enough to still contain the marker if
                            // it straddles a read boundary.
                            let keep = record.begin_marker.len().saturating_sub(1).max(PRE_BUFFER_CAP);
                            if record.pre_buffer.len() > keep {
                                let excess = record.pre_buffer.len() - keep;
                                record.pre_buffer.drain(..excess);
                            }
                            break;
                        }
                        Some(pos) => {
                            let mut rest_start = pos + record.begin_marker.len();
                            let pre = std::mem::take(&mut record.pre_buffer);
                            // Skip one optional trailing CR/LF after the marker.
                            if pre.get(rest_start) == Some(&b'\r') {
                                rest_start += 1;
                            }
                            if pre.get(rest_start) == Some(&b'\n') {
                                rest_start += 1;
                            }
                            record.begun = true;
                            record.state = CommandState::Streaming;
                            carry = pre[rest_start..].to_vec();
                            continue;
                        }
                    }
                }

                record.out_buffer.extend_from_slice(&carry);
                match memchr::memmem::find(&record.out_buffer, &record.end_marker) {
                    None => break,
                    Some(pos) => {
                        let mut rest_start = pos + record.end_marker.len();
                        let out = std::mem::take(&mut record.out_buffer);
                        if out.get(rest_start) == Some(&b'\r') {
                            rest_start += 1;
                        }
                        if out.get(rest_start) == Some(&b'\n') {
                            rest_start += 1;
                        }
                        let next_carry = out[rest_start..].to_vec();
                        record.out_buffer = out[..pos].to_vec();
                        record.state = CommandState::Succeeded;

                        state.fifo.pop_front();
                        let mut record = state.records.remove(&head_id).unwrap();
                        let success = !record.timed_out;
                        let elapsed = record.start.elapsed().as_secs_f64();
                        let result = if success {
                            CommandResult::succeeded(
                                std::mem::take(&mut record.out_buffer),
                                std::mem::take(&mut record.err_buffer),
                                elapsed,
                            )
                        } else {
                            CommandResult::failed(
                                ErrorKind::TimedOut,
                                std::mem::take(&mut record.out_buffer),
                                std::mem::take(&mut record.err_buffer),
                                elapsed,
                            )
                        };
                        completions.push(Completion { record, result });

                        carry = next_carry;
                        continue;
                    }
                }
            }
        }
        for completion in completions {
            let Completion { mut record, result } = completion;
            record.complete(result);
        }
    }

    /// Process a chunk of bytes freshly read from the child's stderr.
    /// Attributed to the current FIFO head on a best-effort basis —
    /// stderr carries no framing of its own.
    pub fn on_stderr_chunk(&self, chunk: &[u8]) {
        let stripped = self.strip_restart_sentinel(chunk);
        let mut timed_out_id = None;
        {
            let mut state = self.state.lock().unwrap();
            let Some(&head_id) = state.fifo.front() else {
                self.dropped_stderr_bytes
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                return;
            };
            let record = state.records.get_mut(&head_id).expect("fifo/map out of sync");
            record.err_buffer.extend_from_slice(&stripped.bytes);
            if stripped.unexpected_sentinel {
                record.timed_out = true;
                timed_out_id = Some(head_id);
            }
        }
        if let Some(id) = timed_out_id {
            tracing::warn!(command_id = id, "unexpected restart sentinel on stderr; failing head command");
        }
    }

    fn strip_restart_sentinel(&self, chunk: &[u8]) -> StrippedStderr {
        let needle = RESTART_SENTINEL.as_bytes();
        match memchr::memmem::find(chunk, needle) {
            None => StrippedStderr {
                bytes: chunk.to_vec(),
                unexpected_sentinel: false,
            },
            Some(pos) => {
                let mut bytes = Vec::with_capacity(chunk.len() - needle.len());
                bytes.extend_from_slice(&chunk[..pos]);
                bytes.extend_from_slice(&chunk[pos + needle.len()..]);
                let expected = self
                    .expected_restart_sentinels
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        if n > 0 {
                            Some(n - 1)
                        } else {
                            None
                        }
                    })
                    .is_ok();
                StrippedStderr {
                    bytes,
                    unexpected_sentinel: !expected,
                }
            }
        }
    }

    /// Sweep every in-flight command whose deadline has passed, fulfill
    /// each with a `TimedOut` result, and report whether any expired
    /// (the engine uses this to decide whether to kick off an
    /// auto-restart).
    pub fn scan_deadlines(&self) -> bool {
        let now = Instant::now();
        let mut completions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            let expired_ids: Vec<CommandId> = state
                .fifo
                .iter()
                .copied()
                .filter(|id| {
                    state
                        .records
                        .get(id)
                        .and_then(|r| r.deadline)
                        .is_some_and(|d| d <= now)
                })
                .collect();
            for id in &expired_ids {
                state.fifo.retain(|x| x != id);
                if let Some(mut record) = state.records.remove(id) {
                    record.timed_out = true;
                    let elapsed = record.start.elapsed().as_secs_f64();
                    let result = CommandResult::failed(
                        ErrorKind::TimedOut,
                        std::mem::take(&mut record.out_buffer),
                        std::mem::take(&mut record.err_buffer),
                        elapsed,
                    );
                    completions.push(Completion { record, result });
                }
            }
        }
        let any_expired = !completions.is_empty();
        for completion in completions {
            let Completion { mut record, result } = completion;
            record.complete(result);
        }
        any_expired
    }

    /// Fail every in-flight command with `Aborted` and clear the tracker.
    /// Used by `stop`.
    pub fn abort_all(&self) {
        let mut completions = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            state.fifo.clear();
            for (_, mut record) in state.records.drain() {
                let elapsed = record.start.elapsed().as_secs_f64();
                let result = CommandResult::failed(
                    ErrorKind::Aborted,
                    std::mem::take(&mut record.out_buffer),
                    std::mem::take(&mut record.err_buffer),
                    elapsed,
                );
                completions.push(Completion { record, result });
            }
        }
        for completion in completions {
            let Completion { mut record, result } = completion;
            record.complete(result);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().unwrap().fifo.len()
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

struct StrippedStderr {
    bytes: Vec<u8>,
    unexpected_sentinel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn single_command_roundtrip() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);

        let begin = shellmux_protocol::begin_marker(id);
        let end = shellmux_protocol::end_marker(id);
        tracker.on_stdout_chunk(format!("{begin}\nhello\n{end}\n").as_bytes());

        let result = handle.wait();
        assert!(result.success);
        assert_eq!(result.stdout, b"hello\n");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn order_preserved_across_two_commands() {
        let tracker = Tracker::new();
        let id_a = tracker.alloc_id();
        let handle_a = tracker.register(id_a, None, None);
        let id_b = tracker.alloc_id();
        let handle_b = tracker.register(id_b, None, None);

        let begin_a = shellmux_protocol::begin_marker(id_a);
        let end_a = shellmux_protocol::end_marker(id_a);
        let begin_b = shellmux_protocol::begin_marker(id_b);
        let end_b = shellmux_protocol::end_marker(id_b);

        let stream = format!("{begin_a}\na\n{end_a}\n{begin_b}\nb\n{end_b}\n");
        tracker.on_stdout_chunk(stream.as_bytes());

        assert_eq!(handle_a.wait().stdout, b"a\n");
        assert_eq!(handle_b.wait().stdout, b"b\n");
    }

    #[test]
    fn chunk_split_across_marker_boundary() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);

        let begin = shellmux_protocol::begin_marker(id);
        let end = shellmux_protocol::end_marker(id);
        let full = format!("{begin}\nhello\n{end}\n");
        let mid = full.len() / 2;
        tracker.on_stdout_chunk(full[..mid].as_bytes());
        tracker.on_stdout_chunk(full[mid..].as_bytes());

        let result = handle.wait();
        assert!(result.success);
        assert_eq!(result.stdout, b"hello\n");
    }

    #[test]
    fn stderr_attributed_to_fifo_head() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);
        tracker.on_stderr_chunk(b"warn: noisy\n");

        let begin = shellmux_protocol::begin_marker(id);
        let end = shellmux_protocol::end_marker(id);
        tracker.on_stdout_chunk(format!("{begin}\nhi\n{end}\n").as_bytes());

        let result = handle.wait();
        assert_eq!(result.stderr, b"warn: noisy\n");
    }

    #[test]
    fn stderr_with_empty_fifo_is_dropped_and_counted() {
        let tracker = Tracker::new();
        tracker.on_stderr_chunk(b"orphaned\n");
        assert_eq!(tracker.dropped_stderr_bytes.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn deadline_scan_times_out_expired_command() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, Some(Duration::from_millis(0)), None);
        std::thread::sleep(Duration::from_millis(5));
        let expired = tracker.scan_deadlines();
        assert!(expired);
        let result = handle.wait();
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error, Some(ErrorKind::TimedOut));
    }

    #[test]
    fn abort_all_fails_in_flight_commands() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);
        tracker.abort_all();
        let result = handle.wait();
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::Aborted));
    }

    #[test]
    fn expected_restart_sentinel_is_stripped_silently() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);
        tracker.expect_restart_sentinel();
        tracker.on_stderr_chunk(format!("{RESTART_SENTINEL}\n").as_bytes());

        let begin = shellmux_protocol::begin_marker(id);
        let end = shellmux_protocol::end_marker(id);
        tracker.on_stdout_chunk(format!("{begin}\nok\n{end}\n").as_bytes());

        let result = handle.wait();
        assert!(result.success);
        assert_eq!(result.stderr, b"\n");
    }

    #[test]
    fn unexpected_restart_sentinel_fails_head_command() {
        let tracker = Tracker::new();
        let id = tracker.alloc_id();
        let handle = tracker.register(id, None, None);
        tracker.on_stderr_chunk(format!("{RESTART_SENTINEL}\n").as_bytes());

        let begin = shellmux_protocol::begin_marker(id);
        let end = shellmux_protocol::end_marker(id);
        tracker.on_stdout_chunk(format!("{begin}\nok\n{end}\n").as_bytes());

        let result = handle.wait();
        assert!(!result.success);
    }
}
