//! Static heap — segregated directional first-fit
//!
//! Manages one caller-supplied byte buffer as a chain of blocks bounded by
//! a head and a tail sentinel:
//!
//! ```text
//! | HEAD | block | block | ... | block | TAIL |
//!   small requests scan -->     <-- large requests scan
//! ```
//!
//! - Requests below the large threshold (default 256 bytes) scan forward
//!   from the head; everything else scans backward from the tail.
//! - Small allocations take the low end of a split block, large ones the
//!   high end, so the two populations grow toward each other.
//! - A remainder smaller than `MIN_BLOCK_UNITS` is handed out with the
//!   allocation instead of being split off.
//! - Free coalesces with both neighbours immediately.
//! - Every `init` takes a fresh epoch; handles carry it, so a handle from
//!   another heap or an earlier init never matches a live block.
//!
//! No locking. One owner, one thread of control.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicU32, Ordering};

use crate::block::{
    payload_range, read_header, unit_to_byte, Arena, BlockHeader, BlockState, HEADER_UNITS,
    MIN_BLOCK_UNITS, UNIT,
};
use crate::error::HeapError;
use crate::logging::TARGET_HEAP;

/// Default small/large split point in bytes
pub const DEFAULT_LARGE_THRESHOLD: usize = 256;

/// Smallest buffer `init` accepts: two sentinels plus one minimal block
pub const MIN_HEAP_BYTES: usize = (2 * HEADER_UNITS + MIN_BLOCK_UNITS) as usize * UNIT;

/// Source of init epochs; 0 is reserved for "not initialized"
static NEXT_EPOCH: AtomicU32 = AtomicU32::new(1);

fn next_epoch() -> u32 {
    loop {
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        if epoch != 0 {
            return epoch;
        }
    }
}

/// Heap tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Requests of at least this many bytes are served from the tail end
    pub large_threshold: usize,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self { large_threshold: DEFAULT_LARGE_THRESHOLD }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a live allocation
///
/// Not `Copy`: handing it back to [`Heap::free`] consumes it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a HeapBlock leaks its memory until deinit"]
pub struct HeapBlock {
    /// Unit offset of the block header
    unit: u32,
    /// Epoch of the heap init that produced it
    epoch: u32,
}

impl HeapBlock {
    /// Unit offset of the block header inside the heap buffer
    pub fn offset_units(&self) -> u32 {
        self.unit
    }
}

/// Fragment statistics (O(n) walk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentStats {
    /// Largest free block in bytes, header included
    pub largest_free: usize,
    /// Number of free blocks
    pub free_count: usize,
}

/// Heap usage snapshot; all sizes in bytes, headers included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes between the sentinels
    pub heap_size: usize,
    /// Bytes in allocated blocks
    pub used: usize,
    /// High-water mark of `used`
    pub peak_used: usize,
    /// Present only for advanced stats
    pub fragments: Option<FragmentStats>,
}

/// Static-buffer heap allocator
pub struct Heap<'a> {
    /// Managed buffer (None = not initialized)
    bytes: Option<&'a mut [u8]>,
    config: HeapConfig,
    /// Epoch of the current init (0 = none)
    epoch: u32,
    /// Unit offset of the tail sentinel
    tail: u32,
    /// Units between the sentinels
    span: u32,
    /// Units currently allocated
    used: u32,
    /// Peak of `used`
    peak: u32,
}

impl<'a> Heap<'a> {
    /// Create an uninitialized heap
    pub const fn new(config: HeapConfig) -> Self {
        Self {
            bytes: None,
            config,
            epoch: 0,
            tail: 0,
            span: 0,
            used: 0,
            peak: 0,
        }
    }

    /// Create and initialize in one step
    pub fn with_buffer(buffer: &'a mut [u8]) -> Result<Self, HeapError> {
        let mut heap = Self::new(HeapConfig::new());
        heap.init(buffer)?;
        Ok(heap)
    }

    /// Take ownership of `buffer` and lay out the sentinels
    ///
    /// Trailing bytes that do not fill a whole alignment unit are ignored.
    pub fn init(&mut self, buffer: &'a mut [u8]) -> Result<(), HeapError> {
        if self.bytes.is_some() {
            return Err(HeapError::AlreadyInitialized);
        }
        if buffer.len() < MIN_HEAP_BYTES {
            return Err(HeapError::BufferTooSmall { len: buffer.len(), min: MIN_HEAP_BYTES });
        }

        let mut arena = Arena::new(buffer);
        let tail = arena.units() - HEADER_UNITS;
        let span = tail - HEADER_UNITS;

        arena.set_header(0, BlockHeader::allocated(0, HEADER_UNITS));
        arena.set_header(HEADER_UNITS, BlockHeader::free(HEADER_UNITS, span));
        arena.set_header(tail, BlockHeader::allocated(span, HEADER_UNITS));

        self.bytes = Some(buffer);
        self.epoch = next_epoch();
        self.tail = tail;
        self.span = span;
        self.used = 0;
        self.peak = 0;

        log::debug!(
            target: TARGET_HEAP,
            "heap init: {} bytes managed, large threshold {}",
            unit_to_byte(span),
            self.config.large_threshold
        );
        Ok(())
    }

    /// Release the buffer; every outstanding handle becomes invalid
    pub fn deinit(&mut self) -> Option<&'a mut [u8]> {
        let bytes = self.bytes.take()?;
        log::debug!(
            target: TARGET_HEAP,
            "heap deinit: {} bytes still in use",
            unit_to_byte(self.used)
        );
        self.epoch = 0;
        self.tail = 0;
        self.span = 0;
        self.used = 0;
        self.peak = 0;
        Some(bytes)
    }

    pub fn is_initialized(&self) -> bool {
        self.bytes.is_some()
    }

    pub fn config(&self) -> HeapConfig {
        self.config
    }

    /// Allocate at least `size` bytes
    pub fn allocate(&mut self, size: usize) -> Result<HeapBlock, HeapError> {
        let large = size >= self.config.large_threshold;
        let tail = self.tail;
        let Some(bytes) = self.bytes.as_deref_mut() else {
            log::debug!(target: TARGET_HEAP, "alloc {} rejected: heap not initialized", size);
            return Err(HeapError::Uninitialized);
        };
        let Some(units) = request_units(size) else {
            log::debug!(target: TARGET_HEAP, "alloc {} rejected: size out of range", size);
            return Err(HeapError::SizeOutOfRange { requested: size });
        };

        let found = if large {
            find_backward(bytes, tail, units)
        } else {
            find_forward(bytes, tail, units)
        };
        let Some(unit) = found else {
            log::debug!(
                target: TARGET_HEAP,
                "alloc {} failed: no free block of {} units",
                size,
                units
            );
            return Err(HeapError::OutOfMemory { requested: size });
        };

        let (unit, taken) = carve(&mut Arena::new(bytes), unit, units, large);

        self.used += taken;
        self.peak = self.peak.max(self.used);
        log::trace!(
            target: TARGET_HEAP,
            "alloc {} -> unit {} ({} units, used {})",
            size,
            unit,
            taken,
            self.used
        );
        Ok(HeapBlock { unit, epoch: self.epoch })
    }

    /// Allocate and zero the payload
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<HeapBlock, HeapError> {
        let block = self.allocate(size)?;
        if let Some(payload) = self.payload_mut(&block) {
            payload.fill(0);
        }
        Ok(block)
    }

    /// Return a block to the heap
    ///
    /// A handle that is not a live allocation of this heap is ignored.
    pub fn free(&mut self, block: HeapBlock) {
        if !self.owns(&block) {
            log::warn!(target: TARGET_HEAP, "free of unit {} ignored: handle from another heap", block.unit);
            return;
        }
        let tail = self.tail;
        let Some(bytes) = self.bytes.as_deref_mut() else {
            log::warn!(target: TARGET_HEAP, "free of unit {} ignored: heap not initialized", block.unit);
            return;
        };
        let Some(freed) = live_header(bytes, tail, block.unit) else {
            log::warn!(target: TARGET_HEAP, "free of unit {} ignored: not a live block", block.unit);
            return;
        };

        let mut arena = Arena::new(bytes);
        let mut start = block.unit;
        let mut size = freed.size;
        let mut prev_size = freed.prev_size;

        let next = arena.header(block.unit + freed.size);
        if next.is_free() {
            size += next.size;
        }

        let prev_unit = block.unit - freed.prev_size;
        let prev = arena.header(prev_unit);
        if prev.is_free() {
            start = prev_unit;
            size += prev.size;
            prev_size = prev.prev_size;
        }

        arena.set_header(start, BlockHeader::free(prev_size, size));
        arena.set_prev_size(start + size, size);
        self.used -= freed.size;

        log::trace!(
            target: TARGET_HEAP,
            "free unit {} ({} units) -> free block at {} of {} units, used {}",
            block.unit,
            freed.size,
            start,
            size,
            self.used
        );
    }

    /// Usage snapshot; `advanced` adds an O(n) fragment walk
    pub fn stats(&self, advanced: bool) -> HeapStats {
        let Some(bytes) = self.bytes.as_deref() else {
            return HeapStats::default();
        };

        let fragments = advanced.then(|| {
            let mut frag = FragmentStats::default();
            let mut unit = HEADER_UNITS;
            while unit < self.tail {
                let h = read_header(bytes, unit);
                if h.is_free() {
                    frag.free_count += 1;
                    frag.largest_free = frag.largest_free.max(unit_to_byte(h.size));
                }
                unit += h.size.max(1);
            }
            frag
        });

        HeapStats {
            heap_size: unit_to_byte(self.span),
            used: unit_to_byte(self.used),
            peak_used: unit_to_byte(self.peak),
            fragments,
        }
    }

    /// Units currently allocated
    pub fn used_units(&self) -> u32 {
        self.used
    }

    /// Units between the sentinels
    pub fn span_units(&self) -> u32 {
        self.span
    }

    /// Usable payload bytes of a live block
    pub fn block_size(&self, block: &HeapBlock) -> Option<usize> {
        if !self.owns(block) {
            return None;
        }
        let bytes = self.bytes.as_deref()?;
        let h = live_header(bytes, self.tail, block.unit)?;
        Some(unit_to_byte(h.size - HEADER_UNITS))
    }

    /// Payload of a live block
    pub fn payload(&self, block: &HeapBlock) -> Option<&[u8]> {
        if !self.owns(block) {
            return None;
        }
        let bytes = self.bytes.as_deref()?;
        let h = live_header(bytes, self.tail, block.unit)?;
        Some(&bytes[payload_range(block.unit, h.size)])
    }

    /// Mutable payload of a live block
    pub fn payload_mut(&mut self, block: &HeapBlock) -> Option<&mut [u8]> {
        if !self.owns(block) {
            return None;
        }
        let tail = self.tail;
        let bytes = self.bytes.as_deref_mut()?;
        let h = live_header(bytes, tail, block.unit)?;
        Some(&mut bytes[payload_range(block.unit, h.size)])
    }

    /// Handle was issued by the current init of this heap
    fn owns(&self, block: &HeapBlock) -> bool {
        self.epoch != 0 && block.epoch == self.epoch
    }

    /// Walk the whole chain and verify its invariants
    ///
    /// Forward sizes must land exactly on the tail, every back-link must
    /// match, no two neighbours may both be free, and the allocated units
    /// must add up to the used counter.
    pub fn check_integrity(&self) -> Result<(), HeapError> {
        let bytes = self.bytes.as_deref().ok_or(HeapError::Uninitialized)?;

        let head = read_header(bytes, 0);
        if !head.is_allocated() || head.size != HEADER_UNITS {
            return Err(HeapError::Corrupted { unit: 0 });
        }

        let mut prev = head;
        let mut unit = HEADER_UNITS;
        let mut allocated = 0u32;
        while unit < self.tail {
            let h = read_header(bytes, unit);
            if h.state == BlockState::Corrupt
                || h.size < MIN_BLOCK_UNITS
                || h.prev_size != prev.size
                || (h.is_free() && prev.is_free())
            {
                return Err(HeapError::Corrupted { unit });
            }
            if h.is_allocated() {
                allocated += h.size;
            }
            prev = h;
            unit += h.size;
        }

        let tail = read_header(bytes, self.tail);
        if unit != self.tail
            || !tail.is_allocated()
            || tail.prev_size != prev.size
            || allocated != self.used
        {
            return Err(HeapError::Corrupted { unit: self.tail });
        }
        Ok(())
    }
}

/// Header + payload units for a request; None if zero or unrepresentable
fn request_units(size: usize) -> Option<u32> {
    if size == 0 {
        return None;
    }
    let payload = size.checked_add(UNIT - 1)? / UNIT;
    let units = payload.checked_add(HEADER_UNITS as usize)?;
    u32::try_from(units).ok()
}

/// First free block of at least `units`, scanning up from the head
fn find_forward(bytes: &[u8], tail: u32, units: u32) -> Option<u32> {
    let mut unit = HEADER_UNITS;
    while unit < tail {
        let h = read_header(bytes, unit);
        if h.is_free() && h.size >= units {
            return Some(unit);
        }
        unit += h.size;
    }
    None
}

/// First free block of at least `units`, scanning down from the tail
fn find_backward(bytes: &[u8], tail: u32, units: u32) -> Option<u32> {
    let mut unit = tail;
    loop {
        unit -= read_header(bytes, unit).prev_size;
        if unit == 0 {
            return None;
        }
        let h = read_header(bytes, unit);
        if h.is_free() && h.size >= units {
            return Some(unit);
        }
    }
}

/// Allocate `units` out of the free block at `unit`, splitting when the
/// remainder can stand alone. Returns the allocated block and its size.
fn carve(arena: &mut Arena<'_>, unit: u32, units: u32, large: bool) -> (u32, u32) {
    let block = arena.header(unit);
    let next = unit + block.size;
    let remainder = block.size - units;

    if remainder < MIN_BLOCK_UNITS {
        arena.set_header(unit, BlockHeader::allocated(block.prev_size, block.size));
        return (unit, block.size);
    }

    if large {
        let alloc = unit + remainder;
        arena.set_header(unit, BlockHeader::free(block.prev_size, remainder));
        arena.set_header(alloc, BlockHeader::allocated(remainder, units));
        arena.set_prev_size(next, units);
        (alloc, units)
    } else {
        let rest = unit + units;
        arena.set_header(unit, BlockHeader::allocated(block.prev_size, units));
        arena.set_header(rest, BlockHeader::free(units, remainder));
        arena.set_prev_size(next, remainder);
        (unit, units)
    }
}

/// Header at `unit` if it is a live allocation linked into the chain
///
/// Both neighbours must point back at it, so a stale or foreign handle
/// whose offset lands inside some payload is rejected.
fn live_header(bytes: &[u8], tail: u32, unit: u32) -> Option<BlockHeader> {
    if unit < HEADER_UNITS || unit >= tail {
        return None;
    }
    let h = read_header(bytes, unit);
    if !h.is_allocated() || h.size < MIN_BLOCK_UNITS || h.prev_size > unit {
        return None;
    }
    let next = unit.checked_add(h.size).filter(|&n| n <= tail)?;
    let before = read_header(bytes, unit - h.prev_size);
    let after = read_header(bytes, next);
    (before.size == h.prev_size && after.prev_size == h.size).then_some(h)
}
