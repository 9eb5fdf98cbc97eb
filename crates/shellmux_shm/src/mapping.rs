//! The memory-mapped region backing a bulk channel: `[header][A→B
//! region][B→A region]`.
//!
//! Built on `memmap2` rather than raw `libc`/`winapi` mmap calls — the
//! higher-level crate buys the same zero-copy region without hand-rolled
//! platform branches for the mapping step itself (the named mutex/event
//! primitives still need platform-specific code; see
//! `sync_unix`/`sync_windows`).

use std::fs::OpenOptions;
use std::path::PathBuf;

use memmap2::MmapMut;
use shellmux_protocol::ErrorKind;

#[cfg(feature = "chunked")]
use shellmux_protocol::EXTENDED_HEADER_SIZE as HEADER_SIZE;
#[cfg(not(feature = "chunked"))]
use shellmux_protocol::HEADER_SIZE;

/// A shared, file-backed region of `HEADER_SIZE + 2 * frame_bytes` bytes.
/// Two processes opening the same `name` map the identical bytes.
pub struct Mapping {
    mmap: MmapMut,
    frame_bytes: u64,
}

/// Where named backing files live. A real deployment would use
/// `/dev/shm` on Linux or a named section on Windows; a plain temp-dir
/// file is the portable subset that both platforms honor identically
/// and is enough to exercise the protocol end to end.
fn backing_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("shellmux-shm-{name}.map"))
}

impl Mapping {
    pub fn region_len(frame_bytes: u64) -> usize {
        HEADER_SIZE + 2 * frame_bytes as usize
    }

    /// Open (creating if absent) the named mapping sized for
    /// `frame_bytes`. Does not touch the header; the caller decides
    /// whether to initialize it based on `is_initialized()`.
    pub fn open(name: &str, frame_bytes: u64) -> Result<Self, ErrorKind> {
        let path = backing_path(name);
        let len = Self::region_len(frame_bytes) as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| ErrorKind::SystemError(format!("open {}: {err}", path.display())))?;

        let current_len = file
            .metadata()
            .map_err(|err| ErrorKind::SystemError(err.to_string()))?
            .len();
        if current_len < len {
            file.set_len(len).map_err(|err| ErrorKind::SystemError(err.to_string()))?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|err| ErrorKind::SystemError(err.to_string()))?;

        Ok(Self { mmap, frame_bytes })
    }

    pub fn frame_bytes(&self) -> u64 {
        self.frame_bytes
    }

    pub fn header_bytes(&mut self) -> &mut [u8] {
        &mut self.mmap[..HEADER_SIZE]
    }

    /// The byte offset of a direction's frame within the mapping, after
    /// the header. A→B occupies the first `frame_bytes`, B→A the second.
    pub fn frame_offset(&self, dir: shellmux_protocol::Direction) -> usize {
        match dir {
            shellmux_protocol::Direction::AToB => HEADER_SIZE,
            shellmux_protocol::Direction::BToA => HEADER_SIZE + self.frame_bytes as usize,
        }
    }

    pub fn frame(&self, dir: shellmux_protocol::Direction) -> &[u8] {
        let start = self.frame_offset(dir);
        &self.mmap[start..start + self.frame_bytes as usize]
    }

    pub fn frame_mut(&mut self, dir: shellmux_protocol::Direction) -> &mut [u8] {
        let start = self.frame_offset(dir);
        &mut self.mmap[start..start + self.frame_bytes as usize]
    }
}
