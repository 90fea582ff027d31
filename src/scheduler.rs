//! Periodic scheduler — tick-driven cooperative callbacks
//!
//! Each pass measures the ticks elapsed since the previous pass (wrapping
//! `u32` arithmetic, so counter rollover needs no special case) and feeds
//! them to every entry in registration order. An entry whose accumulator
//! reaches its period fires exactly once and restarts from zero.
//!
//! Passes never overlap and callbacks never run concurrently. A callback
//! must not wait on state that only another callback can change.
//!
//! Author: Moroya Sakamoto

use core::sync::atomic::{AtomicBool, Ordering};

use crate::entry::ScheduleEntry;
use crate::error::SchedError;
use crate::logging::TARGET_SCHED;
use crate::tick::TickSource;

pub use crate::entry::{PeriodicFn, MAX_ENTRIES};

/// Default lower bound for periods (ms)
pub const DEFAULT_MIN_PERIOD_MS: u32 = 1;

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Requested periods below this are raised to it
    pub min_period_ms: u32,
}

impl SchedulerConfig {
    pub const fn new() -> Self {
        Self { min_period_ms: DEFAULT_MIN_PERIOD_MS }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-table periodic scheduler
///
/// `C` is the context type handed to callbacks; unregistration matches on
/// callback and context equality.
pub struct Scheduler<C = usize> {
    /// Static entry table, compacted: `entries[..len]` are all `Some`
    entries: [Option<ScheduleEntry<C>>; MAX_ENTRIES],
    /// Number of registered entries
    len: usize,
    /// Tick seen by the previous pass
    last_tick: u32,
    /// Set by `start`
    initialized: bool,
    config: SchedulerConfig,
    /// Passes executed
    passes: u64,
    /// Callbacks fired
    fired: u64,
}

impl<C> Scheduler<C> {
    /// Create an empty, not yet started scheduler
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            entries: [const { None }; MAX_ENTRIES],
            len: 0,
            last_tick: 0,
            initialized: false,
            config,
            passes: 0,
            fired: 0,
        }
    }

    /// Mark the scheduler ready and take `now` as the reference tick
    ///
    /// Calling it again resynchronizes the reference tick, so ticks that
    /// passed while the host was not running passes are not counted.
    pub fn start(&mut self, now: u32) {
        self.last_tick = now;
        self.initialized = true;
        log::debug!(target: TARGET_SCHED, "scheduler started at tick {}", now);
    }

    pub fn is_started(&self) -> bool {
        self.initialized
    }

    /// Register `callback` to run every `period_ms` ticks with `context`
    pub fn register_periodic(
        &mut self,
        callback: PeriodicFn<C>,
        context: C,
        period_ms: u32,
    ) -> Result<(), SchedError> {
        if !self.initialized {
            log::debug!(target: TARGET_SCHED, "register rejected: scheduler not started");
            return Err(SchedError::Uninitialized);
        }
        if self.len >= MAX_ENTRIES {
            log::warn!(target: TARGET_SCHED, "register rejected: table full ({} entries)", MAX_ENTRIES);
            return Err(SchedError::TableFull { capacity: MAX_ENTRIES });
        }

        let period = period_ms.max(self.config.min_period_ms);
        self.entries[self.len] = Some(ScheduleEntry::new(callback, context, period));
        self.len += 1;
        log::debug!(
            target: TARGET_SCHED,
            "registered slot {} period {} ms",
            self.len - 1,
            period
        );
        Ok(())
    }

    /// Remove the first entry matching `callback` and `context`
    ///
    /// Later entries shift down one slot, keeping their order. Returns
    /// whether anything was removed.
    pub fn unregister(&mut self, callback: PeriodicFn<C>, context: &C) -> bool
    where
        C: PartialEq,
    {
        let Some(idx) = self.entries[..self.len]
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.matches(callback, context)))
        else {
            return false;
        };

        for i in idx..self.len - 1 {
            self.entries[i] = self.entries[i + 1].take();
        }
        self.entries[self.len - 1] = None;
        self.len -= 1;
        log::debug!(target: TARGET_SCHED, "unregistered slot {}", idx);
        true
    }

    /// Run one pass at tick `now`; returns how many callbacks fired
    pub fn run_one_pass(&mut self, now: u32) -> usize {
        if !self.initialized {
            return 0;
        }
        let elapsed = now.wrapping_sub(self.last_tick);
        self.last_tick = now;
        self.passes += 1;

        let mut fired = 0;
        for entry in self.entries[..self.len].iter_mut().flatten() {
            if entry.advance(elapsed) {
                fired += 1;
            }
        }
        self.fired += fired as u64;

        if fired > 0 {
            log::trace!(target: TARGET_SCHED, "pass at {}: {} fired (+{} ms)", now, fired, elapsed);
        }
        fired
    }

    /// Run passes until `stop` is raised; returns passes executed
    ///
    /// The host owns the loop: set `stop` from a callback context, an
    /// interrupt, or the tick source, then call `run` again to resume.
    pub fn run<T: TickSource>(&mut self, ticks: &T, stop: &AtomicBool) -> u64 {
        if !self.initialized {
            self.start(ticks.now_ms());
        }
        let mut passes = 0u64;
        while !stop.load(Ordering::Acquire) {
            self.run_one_pass(ticks.now_ms());
            passes += 1;
            core::hint::spin_loop();
        }
        log::debug!(target: TARGET_SCHED, "run loop stopped after {} passes", passes);
        passes
    }

    /// Run exactly `passes` passes, advancing `step_ms` each (testing)
    pub fn run_for(&mut self, passes: u32, step_ms: u32) -> usize {
        let mut now = self.last_tick;
        let mut fired = 0;
        for _ in 0..passes {
            now = now.wrapping_add(step_ms);
            fired += self.run_one_pass(now);
        }
        fired
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_ENTRIES
    }

    /// Whether an exact (callback, context) registration exists
    pub fn is_registered(&self, callback: PeriodicFn<C>, context: &C) -> bool
    where
        C: PartialEq,
    {
        self.iter().any(|e| e.matches(callback, context))
    }

    /// Entry at `idx` in registration order
    pub fn get(&self, idx: usize) -> Option<&ScheduleEntry<C>> {
        self.entries[..self.len].get(idx)?.as_ref()
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry<C>> {
        self.entries[..self.len].iter().flatten()
    }

    /// Accumulator of the entry at `idx`
    pub fn accumulator(&self, idx: usize) -> Option<u32> {
        self.get(idx).map(ScheduleEntry::accumulated)
    }

    /// Tick seen by the latest pass
    pub fn last_tick(&self) -> u32 {
        self.last_tick
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new(SchedulerConfig::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::SoftTicker;

    fn bump(count: &mut u32) {
        *count += 1;
    }

    fn bump_twice(count: &mut u32) {
        *count += 2;
    }

    fn started() -> Scheduler<u32> {
        let mut sched = Scheduler::default();
        sched.start(0);
        sched
    }

    #[test]
    fn test_scheduler_empty() {
        let sched: Scheduler<u32> = started();
        assert!(sched.is_empty());
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn test_register_requires_start() {
        let mut sched: Scheduler<u32> = Scheduler::default();
        assert_eq!(sched.register_periodic(bump, 0, 10), Err(SchedError::Uninitialized));
        assert_eq!(sched.run_one_pass(100), 0);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_fires_once_on_overrun() {
        let mut sched = started();
        sched.register_periodic(bump, 0, 100).unwrap();

        assert_eq!(sched.run_one_pass(350), 1);
        assert_eq!(*sched.get(0).unwrap().context(), 1);
        assert_eq!(sched.accumulator(0), Some(0));
    }

    #[test]
    fn test_accumulates_below_period() {
        let mut sched = started();
        sched.register_periodic(bump, 0, 100).unwrap();

        assert_eq!(sched.run_one_pass(40), 0);
        assert_eq!(sched.accumulator(0), Some(40));
        assert_eq!(sched.run_one_pass(99), 0);
        assert_eq!(sched.accumulator(0), Some(99));
        assert_eq!(sched.run_one_pass(100), 1);
        assert_eq!(sched.accumulator(0), Some(0));
    }

    #[test]
    fn test_wraparound_elapsed() {
        let mut sched: Scheduler<u32> = Scheduler::default();
        sched.start(u32::MAX - 4);
        sched.register_periodic(bump, 0, 10).unwrap();

        assert_eq!(sched.run_one_pass(5), 1);
        assert_eq!(*sched.get(0).unwrap().context(), 1);
    }

    #[test]
    fn test_ninth_registration_fails() {
        let mut sched = started();
        for i in 0..MAX_ENTRIES as u32 {
            sched.register_periodic(bump, i, 10 + i).unwrap();
        }
        assert!(sched.is_full());
        assert_eq!(
            sched.register_periodic(bump, 99, 10),
            Err(SchedError::TableFull { capacity: MAX_ENTRIES })
        );
        assert_eq!(sched.len(), MAX_ENTRIES);
        for (i, entry) in sched.iter().enumerate() {
            assert_eq!(*entry.context(), i as u32);
            assert_eq!(entry.period(), 10 + i as u32);
        }
    }

    #[test]
    fn test_min_period_clamp() {
        let mut sched: Scheduler<u32> = Scheduler::new(SchedulerConfig { min_period_ms: 5 });
        sched.start(0);
        sched.register_periodic(bump, 0, 0).unwrap();
        sched.register_periodic(bump, 1, 20).unwrap();
        assert_eq!(sched.get(0).unwrap().period(), 5);
        assert_eq!(sched.get(1).unwrap().period(), 20);
    }

    #[test]
    fn test_unregister_compacts_in_order() {
        let mut sched = started();
        sched.register_periodic(bump, 1, 10).unwrap();
        sched.register_periodic(bump, 2, 10).unwrap();
        sched.register_periodic(bump, 3, 10).unwrap();

        assert!(sched.unregister(bump, &2));
        assert_eq!(sched.len(), 2);
        assert_eq!(*sched.get(0).unwrap().context(), 1);
        assert_eq!(*sched.get(1).unwrap().context(), 3);
        assert!(sched.get(2).is_none());
    }

    #[test]
    fn test_unregister_needs_exact_match() {
        let mut sched = started();
        sched.register_periodic(bump, 1, 10).unwrap();

        assert!(!sched.unregister(bump_twice, &1));
        assert!(!sched.unregister(bump, &2));
        assert_eq!(sched.len(), 1);
        assert!(sched.is_registered(bump, &1));
    }

    #[test]
    fn test_registration_order_within_pass() {
        use core::sync::atomic::AtomicU32;

        static SEQ: AtomicU32 = AtomicU32::new(0);

        fn stamp(slot: &mut u32) {
            *slot = SEQ.fetch_add(1, Ordering::Relaxed);
        }

        let mut sched: Scheduler<u32> = Scheduler::default();
        sched.start(0);
        sched.register_periodic(stamp, u32::MAX, 10).unwrap();
        sched.register_periodic(stamp, u32::MAX - 1, 10).unwrap();
        sched.register_periodic(stamp, u32::MAX - 2, 10).unwrap();
        assert_eq!(sched.run_one_pass(10), 3);

        let order: [u32; 3] = core::array::from_fn(|i| *sched.get(i).unwrap().context());
        assert!(order[0] < order[1] && order[1] < order[2]);
    }

    #[test]
    fn test_run_for_counts() {
        let mut sched = started();
        sched.register_periodic(bump, 0, 10).unwrap();
        sched.register_periodic(bump_twice, 0, 25).unwrap();

        let fired = sched.run_for(100, 5);
        // 500 ms: 50 firings of the 10 ms entry, 20 of the 25 ms entry
        assert_eq!(sched.get(0).unwrap().context(), &50);
        assert_eq!(sched.get(1).unwrap().context(), &40);
        assert_eq!(fired, 70);
        assert_eq!(sched.passes(), 100);
        assert_eq!(sched.fired(), 70);
    }

    #[test]
    fn test_run_stops_on_flag() {
        struct StopAfter<'a> {
            ticker: SoftTicker,
            stop: &'a AtomicBool,
            limit: u32,
        }

        impl TickSource for StopAfter<'_> {
            fn now_ms(&self) -> u32 {
                self.ticker.advance(1);
                let now = self.ticker.now_ms();
                if now >= self.limit {
                    self.stop.store(true, Ordering::Release);
                }
                now
            }
        }

        let stop = AtomicBool::new(false);
        let source = StopAfter { ticker: SoftTicker::new(), stop: &stop, limit: 100 };
        let mut sched: Scheduler<u32> = Scheduler::default();
        sched.start(0);
        sched.register_periodic(bump, 0, 10).unwrap();

        let passes = sched.run(&source, &stop);
        assert_eq!(passes, 100);
        assert_eq!(*sched.get(0).unwrap().context(), 10);

        // Restart after stopping
        stop.store(false, Ordering::Release);
        let source = StopAfter { ticker: SoftTicker::starting_at(100), stop: &stop, limit: 120 };
        assert_eq!(sched.run(&source, &stop), 20);
        assert_eq!(*sched.get(0).unwrap().context(), 12);
    }
}
