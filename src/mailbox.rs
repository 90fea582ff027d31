//! Mailboxes — bounded SPSC FIFO of fixed-size slots
//!
//! One heap allocation holds a small header followed by the slot ring:
//!
//! ```text
//! +0  head       u32   next slot to write
//! +4  tail       u32   next slot to read
//! +8  count      u32   occupied slots
//! +12 capacity   u32   slot count
//! +16 slot_size  u32   bytes per slot
//! +24 slots      capacity * slot_size bytes
//! ```
//!
//! `post` and `try_take` never block and never overwrite: a full mailbox
//! rejects the post, an empty one rejects the take, and neither touches
//! the ring on failure.
//!
//! No internal locking. Producer and consumer must never run physically
//! concurrently (e.g. the producer runs only in a non-reentrant interrupt
//! that the consumer masks). `post` and `try_take` both borrow the heap
//! mutably, so safe callers cannot overlap them.
//!
//! Author: Moroya Sakamoto

use core::convert::Infallible;
use core::fmt;

use static_assertions::const_assert;

use crate::block::UNIT;
use crate::error::MailboxError;
use crate::heap::{Heap, HeapBlock};
use crate::logging::TARGET_MAILBOX;

/// Header bytes in front of the slot ring
pub const MAILBOX_HEADER_BYTES: usize = 24;

const_assert!(MAILBOX_HEADER_BYTES % UNIT == 0);
const_assert!(MAILBOX_HEADER_BYTES >= 5 * 4);

const OFF_HEAD: usize = 0;
const OFF_TAIL: usize = 4;
const OFF_COUNT: usize = 8;
const OFF_CAPACITY: usize = 12;
const OFF_SLOT_SIZE: usize = 16;

/// Ring bookkeeping, decoded from the allocation header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ring {
    head: u32,
    tail: u32,
    count: u32,
    capacity: u32,
    slot_size: u32,
}

impl Ring {
    /// Decode the header; None unless it describes a ring that fits `bytes`
    fn read(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..MAILBOX_HEADER_BYTES)?;
        let field = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&header[at..at + 4]);
            u32::from_le_bytes(raw)
        };
        let ring = Self {
            head: field(OFF_HEAD),
            tail: field(OFF_TAIL),
            count: field(OFF_COUNT),
            capacity: field(OFF_CAPACITY),
            slot_size: field(OFF_SLOT_SIZE),
        };
        ring.fits(bytes.len()).then_some(ring)
    }

    fn fits(&self, len: usize) -> bool {
        let span = (self.capacity as usize)
            .checked_mul(self.slot_size as usize)
            .and_then(|ring| ring.checked_add(MAILBOX_HEADER_BYTES));
        self.capacity > 0
            && self.slot_size > 0
            && self.head < self.capacity
            && self.tail < self.capacity
            && self.count <= self.capacity
            && span.is_some_and(|span| span <= len)
    }

    fn write(&self, bytes: &mut [u8]) {
        for (at, value) in [
            (OFF_HEAD, self.head),
            (OFF_TAIL, self.tail),
            (OFF_COUNT, self.count),
            (OFF_CAPACITY, self.capacity),
            (OFF_SLOT_SIZE, self.slot_size),
        ] {
            bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Byte range of slot `idx` within the allocation
    fn slot(&self, idx: u32) -> core::ops::Range<usize> {
        let start = MAILBOX_HEADER_BYTES + idx as usize * self.slot_size as usize;
        start..start + self.slot_size as usize
    }

    fn next(&self, idx: u32) -> u32 {
        (idx + 1) % self.capacity
    }
}

/// Handle to a heap-backed mailbox
///
/// Every operation takes the heap that created it.
#[derive(Debug)]
#[must_use = "a mailbox must be destroyed to release its heap block"]
pub struct Mailbox {
    block: HeapBlock,
}

impl Mailbox {
    /// Allocate a mailbox of `slot_count` slots of `slot_size` bytes
    pub fn create(heap: &mut Heap<'_>, slot_count: usize, slot_size: usize) -> Result<Self, MailboxError> {
        if slot_count == 0 || slot_size == 0 {
            log::debug!(target: TARGET_MAILBOX, "create rejected: {} x {} bytes", slot_count, slot_size);
            return Err(MailboxError::InvalidArgument);
        }
        let (Ok(capacity), Ok(slot_bytes)) = (u32::try_from(slot_count), u32::try_from(slot_size)) else {
            return Err(MailboxError::InvalidArgument);
        };
        let total = slot_count
            .checked_mul(slot_size)
            .and_then(|ring| ring.checked_add(MAILBOX_HEADER_BYTES))
            .ok_or(MailboxError::InvalidArgument)?;

        let block = heap.allocate(total)?;
        let ring = Ring { head: 0, tail: 0, count: 0, capacity, slot_size: slot_bytes };
        let Some(bytes) = heap.payload_mut(&block) else {
            heap.free(block);
            return Err(MailboxError::StaleHandle);
        };
        ring.write(bytes);

        log::debug!(
            target: TARGET_MAILBOX,
            "created mailbox at unit {}: {} x {} bytes",
            block.offset_units(),
            slot_count,
            slot_size
        );
        Ok(Self { block })
    }

    /// Copy one slot's worth of `data` in at the head
    ///
    /// Only the first `slot_size` bytes of `data` are used.
    pub fn post(&self, heap: &mut Heap<'_>, data: &[u8]) -> Result<(), MailboxError> {
        let bytes = heap.payload_mut(&self.block).ok_or(MailboxError::StaleHandle)?;
        let mut ring = checked_ring(bytes)?;

        let slot_size = ring.slot_size as usize;
        if data.len() < slot_size {
            return Err(MailboxError::BufferTooShort { len: data.len(), slot_size });
        }
        if ring.count >= ring.capacity {
            log::debug!(target: TARGET_MAILBOX, "post rejected: mailbox full ({})", ring.capacity);
            return Err(MailboxError::Full);
        }

        bytes[ring.slot(ring.head)].copy_from_slice(&data[..slot_size]);
        ring.head = ring.next(ring.head);
        ring.count += 1;
        ring.write(bytes);
        Ok(())
    }

    /// Copy the oldest slot into `out` and release it
    ///
    /// `out` must hold at least `slot_size` bytes; only that prefix is written.
    pub fn try_take(&self, heap: &mut Heap<'_>, out: &mut [u8]) -> Result<(), MailboxError> {
        let bytes = heap.payload_mut(&self.block).ok_or(MailboxError::StaleHandle)?;
        let mut ring = checked_ring(bytes)?;

        let slot_size = ring.slot_size as usize;
        if out.len() < slot_size {
            return Err(MailboxError::BufferTooShort { len: out.len(), slot_size });
        }
        if ring.count == 0 {
            return Err(MailboxError::Empty);
        }

        out[..slot_size].copy_from_slice(&bytes[ring.slot(ring.tail)]);
        ring.tail = ring.next(ring.tail);
        ring.count -= 1;
        ring.write(bytes);
        Ok(())
    }

    /// At least one slot is occupied
    pub fn has_data(&self, heap: &Heap<'_>) -> bool {
        self.len(heap) > 0
    }

    /// Occupied slots (0 if the storage is gone)
    pub fn len(&self, heap: &Heap<'_>) -> usize {
        self.ring(heap).map_or(0, |r| r.count as usize)
    }

    pub fn is_empty(&self, heap: &Heap<'_>) -> bool {
        self.len(heap) == 0
    }

    pub fn is_full(&self, heap: &Heap<'_>) -> bool {
        self.ring(heap).is_some_and(|r| r.count == r.capacity)
    }

    pub fn capacity(&self, heap: &Heap<'_>) -> usize {
        self.ring(heap).map_or(0, |r| r.capacity as usize)
    }

    pub fn slot_size(&self, heap: &Heap<'_>) -> usize {
        self.ring(heap).map_or(0, |r| r.slot_size as usize)
    }

    /// Release the storage, discarding queued items
    pub fn destroy(self, heap: &mut Heap<'_>) {
        self.destroy_with(heap, |_| {});
    }

    /// Hand every queued item to `on_item`, oldest first, then release
    /// the storage
    ///
    /// With the `std` feature a panicking `on_item` is caught; draining
    /// continues and the storage is always released. Returns how many
    /// items were delivered.
    pub fn destroy_with<F>(self, heap: &mut Heap<'_>, mut on_item: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        self.try_destroy_with(heap, |item| {
            on_item(item);
            Ok::<(), Infallible>(())
        })
    }

    /// Like [`destroy_with`](Self::destroy_with) for a callback that can fail
    ///
    /// An `Err` from `on_item` is logged and draining moves on to the next
    /// item. Returns how many items were accepted. A mailbox whose header no
    /// longer describes a valid ring is released without draining.
    pub fn try_destroy_with<F, E>(self, heap: &mut Heap<'_>, mut on_item: F) -> usize
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: fmt::Debug,
    {
        let mut delivered = 0;
        match heap.payload(&self.block).map(|bytes| (Ring::read(bytes), bytes)) {
            Some((Some(ring), bytes)) => {
                let mut idx = ring.tail;
                for _ in 0..ring.count {
                    if deliver(&mut on_item, &bytes[ring.slot(idx)]) {
                        delivered += 1;
                    }
                    idx = ring.next(idx);
                }
                log::debug!(
                    target: TARGET_MAILBOX,
                    "destroying mailbox at unit {}: drained {} of {} items",
                    self.block.offset_units(),
                    delivered,
                    ring.count
                );
            }
            Some((None, _)) => {
                log::warn!(
                    target: TARGET_MAILBOX,
                    "mailbox at unit {} has a damaged header; released without draining",
                    self.block.offset_units()
                );
            }
            None => {
                log::warn!(target: TARGET_MAILBOX, "destroy of stale mailbox handle");
            }
        }
        heap.free(self.block);
        delivered
    }

    fn ring(&self, heap: &Heap<'_>) -> Option<Ring> {
        heap.payload(&self.block).and_then(Ring::read)
    }
}

fn checked_ring(bytes: &[u8]) -> Result<Ring, MailboxError> {
    Ring::read(bytes).ok_or_else(|| {
        log::warn!(target: TARGET_MAILBOX, "mailbox header is damaged");
        MailboxError::StaleHandle
    })
}

#[cfg(any(test, feature = "std"))]
fn deliver<F, E>(on_item: &mut F, item: &[u8]) -> bool
where
    F: FnMut(&[u8]) -> Result<(), E>,
    E: fmt::Debug,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_item(item))) {
        Ok(outcome) => accepted(outcome),
        Err(_) => {
            log::warn!(target: TARGET_MAILBOX, "drain callback panicked; continuing");
            false
        }
    }
}

#[cfg(not(any(test, feature = "std")))]
fn deliver<F, E>(on_item: &mut F, item: &[u8]) -> bool
where
    F: FnMut(&[u8]) -> Result<(), E>,
    E: fmt::Debug,
{
    accepted(on_item(item))
}

fn accepted<E: fmt::Debug>(outcome: Result<(), E>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(err) => {
            log::warn!(target: TARGET_MAILBOX, "drain callback failed: {:?}; continuing", err);
            false
        }
    }
}
