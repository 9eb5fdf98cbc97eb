//! The bulk channel's public surface: `open`/`write`/`read`, plus the
//! chunked-transfer variants gated behind the `chunked` feature.

use std::time::{Duration, Instant};

use shellmux_protocol::{BulkHeader, Direction, ErrorKind};

#[cfg(unix)]
use crate::sync_unix::{NamedEvent, NamedMutex};
#[cfg(windows)]
use crate::sync_windows::{NamedEvent, NamedMutex};

use crate::mapping::Mapping;

/// Result of a [`BulkChannel::read`] call.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// Bytes copied into the caller's buffer (empty in probe mode).
    pub data: Vec<u8>,
    /// The stored payload length, always reported even when the caller's
    /// buffer was a probe or too small.
    pub length: u64,
}

/// A memory-mapped bulk-transfer channel between two ends, `A` and `B`.
/// Both ends open the same `name`; which end is "A" and which is "B" is
/// a convention the two sides agree on out of band. Directions are
/// symmetric — either side may write either frame.
pub struct BulkChannel {
    mapping: Mapping,
    mutex: NamedMutex,
    req: [NamedEvent; 2],
    ack: [NamedEvent; 2],
    last_consumed_seq: [u64; 2],
}

fn dir_index(dir: Direction) -> usize {
    match dir {
        Direction::AToB => 0,
        Direction::BToA => 1,
    }
}

impl BulkChannel {
    /// Open (creating if absent) a named bulk channel sized for
    /// `frame_bytes` per direction. Initializes the header if this is
    /// the first opener; fails with `InvalidArg` if an existing header's
    /// `frame_bytes` disagrees with the caller's request.
    pub fn open(name: &str, frame_bytes: u64) -> Result<Self, ErrorKind> {
        let mut mapping = Mapping::open(name, frame_bytes)?;
        {
            let mut header = BulkHeader::new(mapping.header_bytes());
            if !header.is_initialized() {
                header.initialize(frame_bytes);
            } else if header.frame_bytes() != frame_bytes {
                return Err(ErrorKind::InvalidArg(format!(
                    "existing mapping has frame_bytes={}, requested {frame_bytes}",
                    header.frame_bytes()
                )));
            }
        }

        let mutex = NamedMutex::open(&format!("{name}:mtx"))?;
        let req_a2b = NamedEvent::open(&format!("{name}:ev_a2b_req"))?;
        let ack_a2b = NamedEvent::open(&format!("{name}:ev_a2b_ack"))?;
        let req_b2a = NamedEvent::open(&format!("{name}:ev_b2a_req"))?;
        let ack_b2a = NamedEvent::open(&format!("{name}:ev_b2a_ack"))?;

        Ok(Self {
            mapping,
            mutex,
            req: [req_a2b, req_b2a],
            ack: [ack_a2b, ack_b2a],
            last_consumed_seq: [0, 0],
        })
    }

    pub fn frame_bytes(&self) -> u64 {
        self.mapping.frame_bytes()
    }

    /// Write `payload` in `dir`: lock, copy the bytes, bump the sequence
    /// counter, unlock, then signal the request event and drain any
    /// stale ack left over from a previous exchange.
    pub fn write(&mut self, dir: Direction, payload: &[u8], timeout: Option<Duration>) -> Result<u64, ErrorKind> {
        if payload.len() as u64 > self.frame_bytes() {
            return Err(ErrorKind::InvalidArg(format!(
                "payload {} exceeds frame_bytes {}",
                payload.len(),
                self.frame_bytes()
            )));
        }

        self.mutex.lock(timeout)?;
        let next_seq = {
            self.mapping.frame_mut(dir)[..payload.len()].copy_from_slice(payload);
            let mut header = BulkHeader::new(self.mapping.header_bytes());
            header.set_length(dir, payload.len() as u64);
            header.bump_seq(dir)
        };
        self.mutex.unlock();

        self.req[dir_index(dir)].signal();
        self.ack[dir_index(dir)].try_consume();
        Ok(next_seq)
    }

    /// Read from `dir`. `capacity == None` requests probe mode: no bytes
    /// are copied, only the stored length is reported and the reader's
    /// last-consumed sequence is left untouched.
    pub fn read(&mut self, dir: Direction, capacity: Option<usize>, timeout: Duration) -> Result<ReadOutcome, ErrorKind> {
        let idx = dir_index(dir);
        let deadline = Instant::now() + timeout;

        if timeout.is_zero() {
            let seq_now = BulkHeader::new(self.mapping.header_bytes()).load_seq(dir);
            if seq_now <= self.last_consumed_seq[idx] {
                return Err(ErrorKind::WouldBlock);
            }
        } else {
            loop {
                let seq_now = BulkHeader::new(self.mapping.header_bytes()).load_seq(dir);
                if seq_now > self.last_consumed_seq[idx] {
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ErrorKind::TimedOut);
                }
                // A spurious wake re-enters the loop and re-checks the
                // sequence; a real wait timeout also re-checks once
                // before giving up, since the sequence and the event
                // are published independently.
                if !self.req[idx].wait(remaining)? {
                    let seq_now = BulkHeader::new(self.mapping.header_bytes()).load_seq(dir);
                    if seq_now > self.last_consumed_seq[idx] {
                        break;
                    }
                    return Err(ErrorKind::TimedOut);
                }
            }
        }

        self.mutex.lock(Some(deadline.saturating_duration_since(Instant::now())))?;
        let (length, new_seq) = {
            let header = BulkHeader::new(self.mapping.header_bytes());
            (header.length(dir), header.load_seq(dir))
        };
        if length > self.frame_bytes() {
            self.mutex.unlock();
            return Err(ErrorKind::BadState(format!("stored length {length} exceeds frame_bytes")));
        }

        let outcome = match capacity {
            None => ReadOutcome { data: Vec::new(), length },
            Some(cap) if (cap as u64) < length => {
                self.mutex.unlock();
                return Err(ErrorKind::BufferTooSmall { required: length as usize });
            }
            Some(_) => {
                let data = self.mapping.frame(dir)[..length as usize].to_vec();
                self.last_consumed_seq[idx] = new_seq;
                ReadOutcome { data, length }
            }
        };
        self.mutex.unlock();

        if capacity.is_some() {
            self.ack[idx].signal();
        }
        Ok(outcome)
    }
}

#[cfg(feature = "chunked")]
pub use chunked::*;

#[cfg(feature = "chunked")]
mod chunked {
    use super::*;
    use shellmux_protocol::{ChunkMeta, ExtendedBulkHeader};

    impl BulkChannel {
        /// Send `payload` in `dir`, splitting it into `chunk_size`
        /// pieces when it exceeds `frame_bytes`. Aborts on the first
        /// ack timeout.
        pub fn write_chunked(
            &mut self,
            dir: Direction,
            payload: &[u8],
            chunk_size: usize,
            timeout: Duration,
        ) -> Result<(), ErrorKind> {
            if chunk_size == 0 || chunk_size as u64 > self.frame_bytes() {
                return Err(ErrorKind::InvalidArg("chunk_size must be nonzero and <= frame_bytes".into()));
            }
            let total_size = payload.len() as u64;
            let chunk_count = payload.len().div_ceil(chunk_size).max(1) as u64;
            let idx = dir_index(dir);

            for (chunk_index, chunk) in payload.chunks(chunk_size).enumerate() {
                self.mutex.lock(Some(timeout))?;
                self.mapping.frame_mut(dir)[..chunk.len()].copy_from_slice(chunk);
                let meta = ChunkMeta {
                    offset: chunk_index as u64 * chunk_size as u64,
                    length: chunk.len() as u64,
                    sequence: 0,
                    valid: true,
                    chunk_index: chunk_index as u64,
                    total_size,
                    chunk_size: chunk_size as u64,
                    chunk_count,
                };
                let seq = {
                    let mut ext = ExtendedBulkHeader::new(self.mapping.header_bytes());
                    ext.set_chunk_meta(dir, &meta);
                    ext.base().bump_seq(dir)
                };
                self.mutex.unlock();

                self.req[idx].signal();
                if !self.ack[idx].wait(timeout)? {
                    return Err(ErrorKind::TimedOut);
                }
                let _ = seq;
            }
            Ok(())
        }

        /// Receive a chunked transfer in `dir`, reassembling it
        /// byte-for-byte. Blocks until `chunk_count` chunks have arrived
        /// or `timeout` elapses waiting on any single chunk.
        pub fn read_chunked(&mut self, dir: Direction, timeout: Duration) -> Result<Vec<u8>, ErrorKind> {
            let idx = dir_index(dir);
            let mut out: Vec<u8> = Vec::new();
            let mut received = 0u64;
            let mut expected_count: Option<u64> = None;

            loop {
                if !self.req[idx].wait(timeout)? {
                    return Err(ErrorKind::TimedOut);
                }

                self.mutex.lock(Some(timeout))?;
                let meta = {
                    let mut ext = ExtendedBulkHeader::new(self.mapping.header_bytes());
                    ext.chunk_meta(dir)
                };
                if !meta.valid {
                    self.mutex.unlock();
                    return Err(ErrorKind::BadState("chunk metadata not valid".into()));
                }
                if out.is_empty() {
                    out.resize(meta.total_size as usize, 0);
                }
                let start = meta.offset as usize;
                let end = start + meta.length as usize;
                out[start..end].copy_from_slice(&self.mapping.frame(dir)[..meta.length as usize]);
                self.mutex.unlock();

                self.ack[idx].signal();
                received += 1;
                expected_count = expected_count.or(Some(meta.chunk_count));
                if Some(received) >= expected_count {
                    break;
                }
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("test-{tag}-{:?}", std::thread::current().id())
    }

    #[test]
    fn bulk_round_trip() {
        let name = unique_name("roundtrip");
        let mut a = BulkChannel::open(&name, 64).expect("open a");
        let seq = a.write(Direction::AToB, &[1, 2, 3], Some(Duration::from_secs(1))).expect("write");
        assert_eq!(seq, 1);

        let outcome = a.read(Direction::AToB, Some(16), Duration::from_secs(1)).expect("read");
        assert_eq!(outcome.data, vec![1, 2, 3]);
        assert_eq!(outcome.length, 3);
    }

    #[test]
    fn probe_read_reports_length_without_consuming() {
        let name = unique_name("probe");
        let mut a = BulkChannel::open(&name, 64).expect("open a");
        a.write(Direction::AToB, &[9, 9], Some(Duration::from_secs(1))).expect("write");

        let probe = a.read(Direction::AToB, None, Duration::from_secs(1)).expect("probe");
        assert_eq!(probe.length, 2);
        assert!(probe.data.is_empty());

        let real = a.read(Direction::AToB, Some(16), Duration::from_secs(1)).expect("read");
        assert_eq!(real.data, vec![9, 9]);
    }

    #[test]
    fn oversized_payload_is_invalid_arg() {
        let name = unique_name("oversize");
        let mut a = BulkChannel::open(&name, 4).expect("open a");
        let err = a.write(Direction::AToB, &[0u8; 5], Some(Duration::from_secs(1))).unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidArg(_)));
    }

    #[cfg(feature = "chunked")]
    #[test]
    fn chunked_round_trip_reassembles_in_order() {
        let name = unique_name("chunked");
        let payload: Vec<u8> = (0u8..250).collect();

        let writer_name = name.clone();
        let writer = std::thread::spawn(move || {
            let mut chan = BulkChannel::open(&writer_name, 128).expect("open writer");
            chan.write_chunked(Direction::AToB, &payload, 100, Duration::from_secs(2)).expect("write_chunked");
        });

        let mut reader = BulkChannel::open(&name, 128).expect("open reader");
        let received = reader.read_chunked(Direction::AToB, Duration::from_secs(2)).expect("read_chunked");
        writer.join().expect("writer thread");

        let expected: Vec<u8> = (0u8..250).collect();
        assert_eq!(received, expected);
    }
}
