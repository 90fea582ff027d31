//! Kal — top-level context
//!
//! Bundles the heap, the periodic scheduler and the tick source into one
//! owned instance built from a [`KalConfig`]. Several independent
//! instances can coexist (one per test, one per simulated node).
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::AtomicBool;

use crate::error::Result;
use crate::heap::{Heap, HeapConfig, HeapStats};
use crate::logging::{SinkLogger, TARGET_KAL};
use crate::mailbox::Mailbox;
use crate::scheduler::{PeriodicFn, Scheduler, SchedulerConfig};
use crate::tick::TickFn;

/// Environment hooks and tuning
#[derive(Clone, Copy)]
pub struct KalConfig {
    /// Millisecond tick source; without one, time stands still
    pub tick_source: Option<TickFn>,
    /// Diagnostic sink, installed as the global `log` backend
    pub diagnostics: Option<&'static SinkLogger>,
    pub heap: HeapConfig,
    pub scheduler: SchedulerConfig,
}

impl KalConfig {
    pub const fn new() -> Self {
        Self {
            tick_source: None,
            diagnostics: None,
            heap: HeapConfig::new(),
            scheduler: SchedulerConfig::new(),
        }
    }

    pub const fn with_tick_source(mut self, tick_source: TickFn) -> Self {
        self.tick_source = Some(tick_source);
        self
    }

    pub const fn with_diagnostics(mut self, logger: &'static SinkLogger) -> Self {
        self.diagnostics = Some(logger);
        self
    }
}

impl Default for KalConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn frozen_tick() -> u32 {
    0
}

/// Kernel abstraction layer instance
pub struct Kal<'a, C = usize> {
    /// Heap allocator
    pub heap: Heap<'a>,
    /// Periodic scheduler
    pub scheduler: Scheduler<C>,
    tick_source: TickFn,
}

impl<'a, C> Kal<'a, C> {
    /// Install diagnostics, take `buffer` as the heap and start the scheduler
    pub fn new(config: KalConfig, buffer: &'a mut [u8]) -> Result<Self> {
        if let Some(logger) = config.diagnostics {
            if !logger.install() {
                log::debug!(target: TARGET_KAL, "diagnostic sink not installed: logger already set");
            }
        }

        let mut heap = Heap::new(config.heap);
        heap.init(buffer)?;

        let tick_source = config.tick_source.unwrap_or(frozen_tick);
        let mut scheduler = Scheduler::new(config.scheduler);
        scheduler.start(tick_source());

        log::info!(
            target: TARGET_KAL,
            "kal up: {} byte heap, tick source {}",
            heap.stats(false).heap_size,
            if config.tick_source.is_some() { "external" } else { "none" }
        );
        Ok(Self { heap, scheduler, tick_source })
    }

    /// Current millisecond tick
    pub fn now_ms(&self) -> u32 {
        (self.tick_source)()
    }

    /// One scheduler pass at the current tick
    pub fn poll(&mut self) -> usize {
        let now = self.now_ms();
        self.scheduler.run_one_pass(now)
    }

    /// Scheduler passes until `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool) -> u64 {
        let source = self.tick_source;
        self.scheduler.run(&source, stop)
    }

    pub fn register_periodic(&mut self, callback: PeriodicFn<C>, context: C, period_ms: u32) -> Result<()> {
        Ok(self.scheduler.register_periodic(callback, context, period_ms)?)
    }

    pub fn unregister(&mut self, callback: PeriodicFn<C>, context: &C) -> bool
    where
        C: PartialEq,
    {
        self.scheduler.unregister(callback, context)
    }

    /// Heap-backed mailbox of `slot_count` slots of `slot_size` bytes
    pub fn create_mailbox(&mut self, slot_count: usize, slot_size: usize) -> Result<Mailbox> {
        Ok(Mailbox::create(&mut self.heap, slot_count, slot_size)?)
    }

    /// Snapshot of heap and scheduler state
    pub fn stats(&self, advanced: bool) -> KalStats {
        KalStats {
            heap: self.heap.stats(advanced),
            periodic_entries: self.scheduler.len(),
            passes: self.scheduler.passes(),
            callbacks_fired: self.scheduler.fired(),
        }
    }

    /// Tear down and hand the heap buffer back
    pub fn shutdown(mut self) -> Option<&'a mut [u8]> {
        log::info!(target: TARGET_KAL, "kal down after {} passes", self.scheduler.passes());
        self.heap.deinit()
    }
}

/// Aggregate statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KalStats {
    pub heap: HeapStats,
    /// Registered periodic entries
    pub periodic_entries: usize,
    /// Scheduler passes executed
    pub passes: u64,
    /// Callbacks fired across all passes
    pub callbacks_fired: u64,
}
