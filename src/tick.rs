//! Tick sources — hardware-abstract millisecond counters
//!
//! The scheduler only ever sees a 32-bit millisecond tick that wraps.
//! On real hardware this wraps SysTick (Cortex-M) or MTIME (RISC-V);
//! for host tests and simulation use [`SoftTicker`].
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicU32, Ordering};

/// Plain tick callback: current millisecond tick, wrapping at `u32::MAX`
pub type TickFn = fn() -> u32;

/// Anything that can report the current millisecond tick
pub trait TickSource {
    fn now_ms(&self) -> u32;
}

impl TickSource for TickFn {
    fn now_ms(&self) -> u32 {
        self()
    }
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Software tick counter
///
/// Atomic so a simulated timer interrupt can advance it through a shared
/// reference while the main loop reads it.
pub struct SoftTicker {
    /// Current tick (ms)
    ticks: AtomicU32,
    /// Wraparound count
    wraps: AtomicU32,
}

impl SoftTicker {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start at an arbitrary tick (e.g. just below the wrap point)
    pub const fn starting_at(ms: u32) -> Self {
        Self {
            ticks: AtomicU32::new(ms),
            wraps: AtomicU32::new(0),
        }
    }

    /// Advance time by `ms` milliseconds
    pub fn advance(&self, ms: u32) {
        let old = self.ticks.fetch_add(ms, Ordering::AcqRel);
        if old.checked_add(ms).is_none() {
            self.wraps.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of times the counter rolled over
    pub fn wraps(&self) -> u32 {
        self.wraps.load(Ordering::Relaxed)
    }

    /// Reset to zero
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Release);
        self.wraps.store(0, Ordering::Relaxed);
    }

    /// Elapsed ms since a reference tick, wraparound-safe
    pub fn elapsed_since(&self, reference: u32) -> u32 {
        self.now_ms().wrapping_sub(reference)
    }
}

impl Default for SoftTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SoftTicker {
    fn now_ms(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }
}
