//! Schedule entries — static, no-alloc periodic callback descriptors
//!
//! Each entry pairs a plain `fn` callback with a caller-owned context
//! value and a period in ticks. The accumulator counts ticks since the
//! entry last fired.
//!
//! Author: Moroya Sakamoto

/// Maximum entries one scheduler can hold
pub const MAX_ENTRIES: usize = 8;

/// Periodic callback — receives only its own context
pub type PeriodicFn<C> = fn(&mut C);

/// One periodic registration
pub struct ScheduleEntry<C> {
    /// Ticks accumulated since last firing
    pub(crate) accumulated: u32,
    /// Period in ticks (ms)
    pub(crate) period: u32,
    /// Callback
    pub(crate) callback: PeriodicFn<C>,
    /// Opaque context handed to the callback
    pub(crate) context: C,
}

impl<C> ScheduleEntry<C> {
    pub fn new(callback: PeriodicFn<C>, context: C, period: u32) -> Self {
        Self {
            accumulated: 0,
            period,
            callback,
            context,
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn accumulated(&self) -> u32 {
        self.accumulated
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Same callback and an equal context
    pub fn matches(&self, callback: PeriodicFn<C>, context: &C) -> bool
    where
        C: PartialEq,
    {
        self.callback as usize == callback as usize && self.context == *context
    }

    /// Add `elapsed` ticks; fire once and clear if the period is reached
    ///
    /// Any whole periods beyond the first are dropped, not replayed.
    pub(crate) fn advance(&mut self, elapsed: u32) -> bool {
        self.accumulated = self.accumulated.saturating_add(elapsed);
        if self.accumulated < self.period {
            return false;
        }
        (self.callback)(&mut self.context);
        self.accumulated = 0;
        true
    }
}
