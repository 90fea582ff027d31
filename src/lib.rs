//! baremetal-kal — Kernel Abstraction Layer for OS-less protocol stacks
//!
//! Three primitive services for a stack running on a bare-metal main loop:
//! - Static heap: directional first-fit over one caller-supplied buffer
//! - Periodic scheduler: tick-driven callbacks, 8 fixed slots
//! - Mailboxes: bounded SPSC FIFO of fixed-size slots, backed by the heap
//!
//! Everything is synchronous and single-threaded. Nothing here locks,
//! blocks or spawns.
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod block;
pub mod entry;
pub mod error;
pub mod heap;
pub mod kal;
pub mod logging;
pub mod mailbox;
pub mod scheduler;
pub mod tick;

pub use entry::{PeriodicFn, ScheduleEntry, MAX_ENTRIES};
pub use error::{HeapError, KalError, MailboxError, Result, SchedError};
pub use heap::{FragmentStats, Heap, HeapBlock, HeapConfig, HeapStats};
pub use kal::{Kal, KalConfig, KalStats};
pub use logging::{DebugMask, DebugSink, SinkLogger};
pub use mailbox::Mailbox;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use tick::{SoftTicker, TickFn, TickSource};
