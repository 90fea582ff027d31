//! Error types — every failure is an ordinary return value
//!
//! Nothing in the kernel abstraction layer panics on bad input or
//! exhaustion. Callers inspect the `Err` and carry on.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

/// Heap allocator failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("Heap not initialized")]
    Uninitialized,

    #[error("Heap already initialized")]
    AlreadyInitialized,

    #[error("Heap buffer too small: {len} bytes (need at least {min})")]
    BufferTooSmall { len: usize, min: usize },

    #[error("Request of {requested} bytes is out of range")]
    SizeOutOfRange { requested: usize },

    #[error("Out of heap memory (requested: {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("Block chain corrupted at unit {unit}")]
    Corrupted { unit: u32 },
}

/// Periodic scheduler failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedError {
    #[error("Scheduler not started")]
    Uninitialized,

    #[error("Schedule table full ({capacity} entries)")]
    TableFull { capacity: usize },
}

/// Mailbox failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    #[error("Slot count and slot size must be non-zero")]
    InvalidArgument,

    #[error("Mailbox full")]
    Full,

    #[error("Mailbox empty")]
    Empty,

    #[error("Buffer of {len} bytes is shorter than slot size {slot_size}")]
    BufferTooShort { len: usize, slot_size: usize },

    #[error("Mailbox storage is no longer a live heap allocation")]
    StaleHandle,

    #[error("Heap: {0}")]
    Heap(#[from] HeapError),
}

/// Crate-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KalError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

pub type Result<T> = core::result::Result<T, KalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_error_converts_through_mailbox() {
        let err: MailboxError = HeapError::OutOfMemory { requested: 64 }.into();
        assert_eq!(err, MailboxError::Heap(HeapError::OutOfMemory { requested: 64 }));

        let top: KalError = err.into();
        assert!(matches!(top, KalError::Mailbox(MailboxError::Heap(_))));
    }

    #[test]
    fn test_error_messages() {
        let err = SchedError::TableFull { capacity: 8 };
        assert_eq!(err.to_string(), "Schedule table full (8 entries)");

        let err = HeapError::OutOfMemory { requested: 512 };
        assert_eq!(err.to_string(), "Out of heap memory (requested: 512 bytes)");
    }
}
