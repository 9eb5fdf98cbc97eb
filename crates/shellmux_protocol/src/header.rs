//! Binary layout of the shared-memory bulk-channel header.
//!
//! Two profiles exist: the base profile treats everything past the
//! fixed fields as reserved padding; the extended profile repurposes
//! that space for a chunked-transfer protocol. Pick one per build via
//! the `shellmux_shm/chunked` cargo feature — this module only
//! describes the byte layout, not which one is active.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::{AtomicU64, Ordering};

/// `0x4D48_5356` — ASCII-ish "MHSV", the magic stamped into byte 0..4.
pub const MAGIC: u32 = 0x4D48_5356;
/// Current header version.
pub const VERSION: u32 = 1;

/// Total size of the base header, in bytes.
pub const HEADER_SIZE: usize = 128;
/// Total size of the extended (chunked-transfer) header, in bytes.
pub const EXTENDED_HEADER_SIZE: usize = 192;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_FRAME_BYTES: usize = 8;
const OFF_A_TO_B_SEQ: usize = 16;
const OFF_B_TO_A_SEQ: usize = 24;
const OFF_A_TO_B_LENGTH: usize = 32;
const OFF_B_TO_A_LENGTH: usize = 40;
/// Start of the 80-byte reserved region in the base profile (48..128).
const OFF_RESERVED: usize = 48;

/// A transfer direction across the two regions of the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Producer A, consumer B.
    AToB,
    /// Producer B, consumer A.
    BToA,
}

/// A view over the 128-byte base header embedded at the start of the
/// mapping. Does not own the bytes; all accessors read/write through the
/// borrowed slice so the same struct works whether the caller holds a
/// `&[u8]`/`&mut [u8]` from an `mmap` or a plain `Vec<u8>` in tests.
pub struct BulkHeader<'a> {
    bytes: &'a mut [u8],
}

impl<'a> BulkHeader<'a> {
    /// Wrap `bytes`, which must be at least [`HEADER_SIZE`] long.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        assert!(bytes.len() >= HEADER_SIZE, "bulk header region too small");
        Self { bytes }
    }

    pub fn magic(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[OFF_MAGIC..])
    }

    pub fn version(&self) -> u32 {
        LittleEndian::read_u32(&self.bytes[OFF_VERSION..])
    }

    /// `true` once `magic`/`version` match the expected constants.
    pub fn is_initialized(&self) -> bool {
        self.magic() == MAGIC && self.version() == VERSION
    }

    pub fn frame_bytes(&self) -> u64 {
        LittleEndian::read_u64(&self.bytes[OFF_FRAME_BYTES..])
    }

    /// Zero-fill the header and stamp magic/version/frame_bytes. Called
    /// by whichever opener observes an uninitialized mapping first.
    pub fn initialize(&mut self, frame_bytes: u64) {
        for b in self.bytes[..HEADER_SIZE].iter_mut() {
            *b = 0;
        }
        LittleEndian::write_u32(&mut self.bytes[OFF_MAGIC..], MAGIC);
        LittleEndian::write_u32(&mut self.bytes[OFF_VERSION..], VERSION);
        LittleEndian::write_u64(&mut self.bytes[OFF_FRAME_BYTES..], frame_bytes);
    }

    fn seq_offset(dir: Direction) -> usize {
        match dir {
            Direction::AToB => OFF_A_TO_B_SEQ,
            Direction::BToA => OFF_B_TO_A_SEQ,
        }
    }

    fn length_offset(dir: Direction) -> usize {
        match dir {
            Direction::AToB => OFF_A_TO_B_LENGTH,
            Direction::BToA => OFF_B_TO_A_LENGTH,
        }
    }

    /// Borrow the direction's sequence counter as an atomic so readers
    /// may peek it without holding the cross-process mutex. Request/ack
    /// events are advisory wakeups only; correctness rests on this
    /// counter.
    ///
    /// # Safety
    /// The caller must ensure `self.bytes` is 8-byte aligned at the
    /// sequence field offset, which holds for any page-aligned mapping
    /// (both offsets are multiples of 8).
    pub fn seq_atomic(&self, dir: Direction) -> &AtomicU64 {
        let offset = Self::seq_offset(dir);
        let ptr = self.bytes[offset..].as_ptr() as *mut u64;
        unsafe { AtomicU64::from_ptr(ptr) }
    }

    pub fn load_seq(&self, dir: Direction) -> u64 {
        self.seq_atomic(dir).load(Ordering::Acquire)
    }

    /// Increment the direction's sequence counter and return the new
    /// value. Must be called while holding the cross-process mutex.
    pub fn bump_seq(&self, dir: Direction) -> u64 {
        self.seq_atomic(dir).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn length(&self, dir: Direction) -> u64 {
        LittleEndian::read_u64(&self.bytes[Self::length_offset(dir)..])
    }

    pub fn set_length(&mut self, dir: Direction, length: u64) {
        let offset = Self::length_offset(dir);
        LittleEndian::write_u64(&mut self.bytes[offset..], length);
    }

    /// The 80-byte reserved region of the base profile. Untouched by
    /// this header; exposed so callers can assert it reads back as
    /// written.
    pub fn reserved(&self) -> &[u8] {
        &self.bytes[OFF_RESERVED..HEADER_SIZE]
    }
}

// --- Extended (chunked-transfer) profile ---

const CHUNK_BLOCK_SIZE: usize = 64;
const OFF_A_TO_B_CHUNK: usize = OFF_RESERVED;
const OFF_B_TO_A_CHUNK: usize = OFF_RESERVED + CHUNK_BLOCK_SIZE;

const CHUNK_OFF_OFFSET: usize = 0;
const CHUNK_OFF_LENGTH: usize = 8;
const CHUNK_OFF_SEQUENCE: usize = 16;
const CHUNK_OFF_VALID: usize = 24;
const CHUNK_OFF_INDEX: usize = 32;
const CHUNK_OFF_TOTAL_SIZE: usize = 40;
const CHUNK_OFF_CHUNK_SIZE: usize = 48;
const CHUNK_OFF_CHUNK_COUNT: usize = 56;

/// Per-direction chunk metadata, as published into the extended header's
/// reserved-turned-chunk-fields region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkMeta {
    pub offset: u64,
    pub length: u64,
    pub sequence: u64,
    pub valid: bool,
    pub chunk_index: u64,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
}

/// A view over the extended, chunked-transfer header profile. The first
/// [`HEADER_SIZE`] bytes are laid out identically to [`BulkHeader`]; the
/// region the base profile treats as reserved padding instead carries
/// two [`ChunkMeta`] blocks here, one per direction.
pub struct ExtendedBulkHeader<'a> {
    bytes: &'a mut [u8],
}

impl<'a> ExtendedBulkHeader<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        assert!(
            bytes.len() >= EXTENDED_HEADER_SIZE,
            "extended bulk header region too small"
        );
        Self { bytes }
    }

    pub fn base(&mut self) -> BulkHeader<'_> {
        BulkHeader::new(&mut self.bytes[..HEADER_SIZE])
    }

    fn chunk_block_offset(dir: Direction) -> usize {
        match dir {
            Direction::AToB => OFF_A_TO_B_CHUNK,
            Direction::BToA => OFF_B_TO_A_CHUNK,
        }
    }

    pub fn chunk_meta(&self, dir: Direction) -> ChunkMeta {
        let base = Self::chunk_block_offset(dir);
        let block = &self.bytes[base..base + CHUNK_BLOCK_SIZE];
        ChunkMeta {
            offset: LittleEndian::read_u64(&block[CHUNK_OFF_OFFSET..]),
            length: LittleEndian::read_u64(&block[CHUNK_OFF_LENGTH..]),
            sequence: LittleEndian::read_u64(&block[CHUNK_OFF_SEQUENCE..]),
            valid: LittleEndian::read_u64(&block[CHUNK_OFF_VALID..]) != 0,
            chunk_index: LittleEndian::read_u64(&block[CHUNK_OFF_INDEX..]),
            total_size: LittleEndian::read_u64(&block[CHUNK_OFF_TOTAL_SIZE..]),
            chunk_size: LittleEndian::read_u64(&block[CHUNK_OFF_CHUNK_SIZE..]),
            chunk_count: LittleEndian::read_u64(&block[CHUNK_OFF_CHUNK_COUNT..]),
        }
    }

    pub fn set_chunk_meta(&mut self, dir: Direction, meta: &ChunkMeta) {
        let base = Self::chunk_block_offset(dir);
        let block = &mut self.bytes[base..base + CHUNK_BLOCK_SIZE];
        LittleEndian::write_u64(&mut block[CHUNK_OFF_OFFSET..], meta.offset);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_LENGTH..], meta.length);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_SEQUENCE..], meta.sequence);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_VALID..], meta.valid as u64);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_INDEX..], meta.chunk_index);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_TOTAL_SIZE..], meta.total_size);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_CHUNK_SIZE..], meta.chunk_size);
        LittleEndian::write_u64(&mut block[CHUNK_OFF_CHUNK_COUNT..], meta.chunk_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_stamps_magic_and_version() {
        let mut buf = vec![0xAAu8; HEADER_SIZE];
        let mut header = BulkHeader::new(&mut buf);
        assert!(!header.is_initialized());
        header.initialize(4096);
        assert!(header.is_initialized());
        assert_eq!(header.magic(), MAGIC);
        assert_eq!(header.version(), VERSION);
        assert_eq!(header.frame_bytes(), 4096);
    }

    #[test]
    fn sequence_counters_start_at_zero_and_bump() {
        let mut buf = vec![0u8; HEADER_SIZE];
        let mut header = BulkHeader::new(&mut buf);
        header.initialize(1024);
        assert_eq!(header.load_seq(Direction::AToB), 0);
        assert_eq!(header.bump_seq(Direction::AToB), 1);
        assert_eq!(header.bump_seq(Direction::AToB), 2);
        assert_eq!(header.load_seq(Direction::BToA), 0);
    }

    #[test]
    fn length_roundtrips_per_direction() {
        let mut buf = vec![0u8; HEADER_SIZE];
        let mut header = BulkHeader::new(&mut buf);
        header.initialize(1024);
        header.set_length(Direction::AToB, 3);
        header.set_length(Direction::BToA, 9);
        assert_eq!(header.length(Direction::AToB), 3);
        assert_eq!(header.length(Direction::BToA), 9);
    }

    #[test]
    fn reserved_region_is_untouched_by_initialize() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[OFF_RESERVED] = 0x42;
        let mut header = BulkHeader::new(&mut buf);
        // initialize() zero-fills the whole header, including reserved —
        // verify the reserved slice is exactly the zeroed tail afterward.
        header.initialize(1024);
        assert!(header.reserved().iter().all(|&b| b == 0));
    }

    #[test]
    fn extended_header_chunk_meta_roundtrips() {
        let mut buf = vec![0u8; EXTENDED_HEADER_SIZE];
        let mut ext = ExtendedBulkHeader::new(&mut buf);
        ext.base().initialize(4096);
        let meta = ChunkMeta {
            offset: 0,
            length: 100,
            sequence: 1,
            valid: true,
            chunk_index: 0,
            total_size: 250,
            chunk_size: 100,
            chunk_count: 3,
        };
        ext.set_chunk_meta(Direction::AToB, &meta);
        assert_eq!(ext.chunk_meta(Direction::AToB), meta);
        assert_eq!(ext.chunk_meta(Direction::BToA), ChunkMeta::default());
    }
}
