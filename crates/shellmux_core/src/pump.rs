//! The I/O pump: one writer thread draining [`crate::queue::WriterQueue`]
//! into the child's stdin, and two reader threads pulling fixed-size
//! chunks off stdout/stderr into the [`crate::tracker::Tracker`].

use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::queue::WriterQueue;
use crate::tracker::Tracker;

/// Handles for the three long-lived pump threads, joined by the engine
/// on stop/restart.
pub struct Pump {
    pub writer: JoinHandle<()>,
    pub stdout_reader: JoinHandle<()>,
    pub stderr_reader: JoinHandle<()>,
}

impl Pump {
    /// Spawn the writer and both reader threads against an already-live
    /// child process's piped handles. Threads run until their source
    /// closes (EOF) or, for the writer, until `queue.stop()` drains it.
    pub fn spawn(
        stdin: ChildStdin,
        stdout: ChildStdout,
        stderr: ChildStderr,
        queue: Arc<WriterQueue>,
        tracker: Arc<Tracker>,
        reader_buffer_size: usize,
    ) -> Self {
        let writer = std::thread::Builder::new()
            .name("shellmux-writer".into())
            .spawn(move || writer_loop(stdin, queue))
            .expect("failed to spawn writer thread");

        let stdout_tracker = tracker.clone();
        let stdout_reader = std::thread::Builder::new()
            .name("shellmux-stdout-reader".into())
            .spawn(move || reader_loop(stdout, reader_buffer_size, |chunk| stdout_tracker.on_stdout_chunk(chunk)))
            .expect("failed to spawn stdout reader thread");

        let stderr_tracker = tracker;
        let stderr_reader = std::thread::Builder::new()
            .name("shellmux-stderr-reader".into())
            .spawn(move || reader_loop(stderr, reader_buffer_size, |chunk| stderr_tracker.on_stderr_chunk(chunk)))
            .expect("failed to spawn stderr reader thread");

        Self {
            writer,
            stdout_reader,
            stderr_reader,
        }
    }

    /// Block until all three pump threads have exited. Call after the
    /// child has been killed/waited and the writer queue stopped, or
    /// this blocks forever on the reader threads (they only exit at
    /// EOF).
    pub fn join(self) {
        let _ = self.writer.join();
        let _ = self.stdout_reader.join();
        let _ = self.stderr_reader.join();
    }
}

/// Drain `queue` into `stdin` until the queue is stopped and empty.
/// Retries on `Interrupted` and partial writes; any other I/O error
/// ends the loop since the child's stdin is presumed gone.
fn writer_loop(mut stdin: ChildStdin, queue: Arc<WriterQueue>) {
    while let Some(packet) = queue.pop_blocking() {
        if let Err(err) = write_all_retrying(&mut stdin, &packet) {
            tracing::warn!(%err, "writer thread: stdin write failed, stopping");
            break;
        }
    }
    tracing::debug!("writer thread exiting");
}

fn write_all_retrying(stdin: &mut ChildStdin, mut buf: &[u8]) -> std::io::Result<()> {
    while !buf.is_empty() {
        match stdin.write(buf) {
            Ok(0) => {
                return Err(std::io::Error::new(IoErrorKind::WriteZero, "child stdin closed"));
            }
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(err) if err.kind() == IoErrorKind::WouldBlock => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Read `source` in a loop using a fixed on-stack buffer, handing each
/// chunk read to `on_chunk` as a borrow — nothing here retains bytes
/// past the call; all per-command state lives in the tracker.
fn reader_loop<R: Read>(mut source: R, buffer_size: usize, mut on_chunk: impl FnMut(&[u8])) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => on_chunk(&buf[..n]),
            Err(err) if err.kind() == IoErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::warn!(%err, "reader thread: read failed, stopping");
                break;
            }
        }
    }
    tracing::debug!("reader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_loop_delivers_all_chunks_then_stops_at_eof() {
        let data = b"hello world".to_vec();
        let source = Cursor::new(data.clone());
        let mut collected = Vec::new();
        reader_loop(source, 4, |chunk| collected.extend_from_slice(chunk));
        assert_eq!(collected, data);
    }
}
