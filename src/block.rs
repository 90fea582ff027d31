//! Block headers — metadata embedded in the heap buffer
//!
//! Every heap block starts with a 16-byte header (2 alignment units):
//!
//! ```text
//! +0  prev_size  u32 LE   size of the preceding block (units)
//! +4  size       u32 LE   size of this block incl. header (units)
//! +8  tag        u32 LE   FREE / USED magic
//! +12 reserved   u32      zero
//! ```
//!
//! The allocated flag is its own field, so sizes use the full `u32` range.
//! Headers are addressed by unit offset and read through a byte codec,
//! never by casting buffer addresses.
//!
//! Author: Moroya Sakamoto

use static_assertions::const_assert;

/// Alignment unit in bytes (machine word)
pub const UNIT: usize = 8;

/// Header size in alignment units
pub const HEADER_UNITS: u32 = 2;

/// Header size in bytes
pub const HEADER_BYTES: usize = HEADER_UNITS as usize * UNIT;

/// Smallest block worth splitting off: header + one payload unit
pub const MIN_BLOCK_UNITS: u32 = HEADER_UNITS + 1;

const TAG_FREE: u32 = 0x4545_5246; // "FREE"
const TAG_USED: u32 = 0x4445_5355; // "USED"

const_assert!(HEADER_BYTES % UNIT == 0);
const_assert!(HEADER_BYTES >= 16);

/// Allocation state of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Available for allocation
    Free,
    /// Handed out, or a sentinel
    Allocated,
    /// Tag matches neither magic
    Corrupt,
}

impl BlockState {
    fn tag(self) -> u32 {
        match self {
            BlockState::Free => TAG_FREE,
            BlockState::Allocated => TAG_USED,
            BlockState::Corrupt => 0,
        }
    }

    fn from_tag(tag: u32) -> Self {
        match tag {
            TAG_FREE => BlockState::Free,
            TAG_USED => BlockState::Allocated,
            _ => BlockState::Corrupt,
        }
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Size of the preceding block (units)
    pub prev_size: u32,
    /// Size of this block including header (units)
    pub size: u32,
    /// Allocation state
    pub state: BlockState,
}

impl BlockHeader {
    pub const fn free(prev_size: u32, size: u32) -> Self {
        Self { prev_size, size, state: BlockState::Free }
    }

    pub const fn allocated(prev_size: u32, size: u32) -> Self {
        Self { prev_size, size, state: BlockState::Allocated }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state == BlockState::Allocated
    }
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Byte offset of a unit offset
#[inline]
pub fn unit_to_byte(unit: u32) -> usize {
    unit as usize * UNIT
}

/// Byte range of the payload of a block at `unit` spanning `size` units
#[inline]
pub fn payload_range(unit: u32, size: u32) -> core::ops::Range<usize> {
    unit_to_byte(unit + HEADER_UNITS)..unit_to_byte(unit + size)
}

/// Decode the header at `unit` from a read-only buffer
pub fn read_header(bytes: &[u8], unit: u32) -> BlockHeader {
    let at = unit_to_byte(unit);
    BlockHeader {
        prev_size: read_u32(bytes, at),
        size: read_u32(bytes, at + 4),
        state: BlockState::from_tag(read_u32(bytes, at + 8)),
    }
}

/// Unit-addressed writer over the heap buffer
///
/// Callers keep every offset inside the block chain; the chain itself is
/// only ever written through this type.
pub struct Arena<'b> {
    bytes: &'b mut [u8],
}

impl<'b> Arena<'b> {
    pub fn new(bytes: &'b mut [u8]) -> Self {
        Self { bytes }
    }

    /// Total units addressable
    pub fn units(&self) -> u32 {
        (self.bytes.len() / UNIT).min(u32::MAX as usize) as u32
    }

    /// Read the header at `unit`
    pub fn header(&self, unit: u32) -> BlockHeader {
        read_header(self.bytes, unit)
    }

    /// Write the header at `unit`
    pub fn set_header(&mut self, unit: u32, header: BlockHeader) {
        let at = unit_to_byte(unit);
        write_u32(self.bytes, at, header.prev_size);
        write_u32(self.bytes, at + 4, header.size);
        write_u32(self.bytes, at + 8, header.state.tag());
        write_u32(self.bytes, at + 12, 0);
    }

    /// Patch only the back-link of the block at `unit`
    pub fn set_prev_size(&mut self, unit: u32, prev_size: u32) {
        write_u32(self.bytes, unit_to_byte(unit), prev_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_preserves_state() {
        let mut buf = [0u8; 64];
        let mut arena = Arena::new(&mut buf);
        arena.set_header(2, BlockHeader::allocated(2, 5));
        let h = arena.header(2);
        assert_eq!(h.prev_size, 2);
        assert_eq!(h.size, 5);
        assert!(h.is_allocated());
    }

    #[test]
    fn test_full_u32_size_does_not_touch_state() {
        let mut buf = [0u8; 32];
        let mut arena = Arena::new(&mut buf);
        arena.set_header(0, BlockHeader::free(0, u32::MAX));
        let h = arena.header(0);
        assert_eq!(h.size, u32::MAX);
        assert!(h.is_free());
    }

    #[test]
    fn test_zeroed_memory_is_corrupt() {
        let mut buf = [0u8; 32];
        let arena = Arena::new(&mut buf);
        assert_eq!(arena.header(0).state, BlockState::Corrupt);
    }

    #[test]
    fn test_set_prev_size_keeps_rest() {
        let mut buf = [0u8; 32];
        let mut arena = Arena::new(&mut buf);
        arena.set_header(0, BlockHeader::free(3, 4));
        arena.set_prev_size(0, 9);
        assert_eq!(arena.header(0), BlockHeader::free(9, 4));
    }

    #[test]
    fn test_payload_range_excludes_header() {
        let range = payload_range(4, 5);
        assert_eq!(range.start, 6 * UNIT);
        assert_eq!(range.len(), 3 * UNIT);
    }

    #[test]
    fn test_read_header_matches_arena() {
        let mut buf = [0u8; 48];
        Arena::new(&mut buf).set_header(1, BlockHeader::free(1, 4));
        assert_eq!(read_header(&buf, 1), BlockHeader::free(1, 4));
    }
}
