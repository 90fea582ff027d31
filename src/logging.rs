//! Diagnostics — `log` backend forwarding to a text sink
//!
//! Every component logs through the `log` facade under its own target.
//! `SinkLogger` hands matching records to the host's output routine (UART,
//! RTT, semihosting, stdout in tests) and filters them by a runtime
//! [`DebugMask`]. No sink installed means no output and no cost beyond the
//! level check.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use log::{LevelFilter, Log, Metadata, Record};

pub(crate) const TARGET_HEAP: &str = "kal::heap";
pub(crate) const TARGET_SCHED: &str = "kal::sched";
pub(crate) const TARGET_MAILBOX: &str = "kal::mailbox";
pub(crate) const TARGET_KAL: &str = "kal::core";

bitflags! {
    /// Diagnostic categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugMask: u32 {
        /// Heap allocator
        const HEAP    = 1 << 0;
        /// Periodic scheduler
        const SCHED   = 1 << 1;
        /// Mailbox queues
        const MAILBOX = 1 << 2;
        /// Context setup and teardown
        const CORE    = 1 << 3;
        /// Records from outside this crate
        const OTHER   = 1 << 4;
    }
}

impl DebugMask {
    /// Category a log target belongs to
    pub fn for_target(target: &str) -> DebugMask {
        match target {
            TARGET_HEAP => DebugMask::HEAP,
            TARGET_SCHED => DebugMask::SCHED,
            TARGET_MAILBOX => DebugMask::MAILBOX,
            TARGET_KAL => DebugMask::CORE,
            _ => DebugMask::OTHER,
        }
    }
}

/// Host output routine
pub type DebugSink = fn(&Record<'_>);

/// `log::Log` implementation writing to a [`DebugSink`]
///
/// Meant to live in a `static` so it can be installed with
/// `log::set_logger`.
pub struct SinkLogger {
    sink: DebugSink,
    max_level: LevelFilter,
    mask: AtomicU32,
}

impl SinkLogger {
    /// Sink with every category enabled up to `Debug`
    pub const fn new(sink: DebugSink) -> Self {
        Self::with_mask(sink, LevelFilter::Debug, DebugMask::all())
    }

    pub const fn with_mask(sink: DebugSink, max_level: LevelFilter, mask: DebugMask) -> Self {
        Self {
            sink,
            max_level,
            mask: AtomicU32::new(mask.bits()),
        }
    }

    pub fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    pub fn mask(&self) -> DebugMask {
        DebugMask::from_bits_truncate(self.mask.load(Ordering::Relaxed))
    }

    /// Replace the category mask, returning the previous one
    pub fn set_mask(&self, mask: DebugMask) -> DebugMask {
        DebugMask::from_bits_truncate(self.mask.swap(mask.bits(), Ordering::Relaxed))
    }

    /// Install as the global logger
    ///
    /// Returns false if another logger was installed first.
    pub fn install(&'static self) -> bool {
        match log::set_logger(self) {
            Ok(()) => {
                log::set_max_level(self.max_level);
                true
            }
            Err(_) => false,
        }
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
            && self.mask().contains(DebugMask::for_target(metadata.target()))
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            (self.sink)(record);
        }
    }

    fn flush(&self) {}
}
