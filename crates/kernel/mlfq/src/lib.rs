//! Per-CPU multi-level feedback queue scheduler.
//!
//! Every CPU owns one [`Scheduler`]. Runnable threads live in two
//! priority-bucketed [`RunQueue`]s, `active` and `expired`, plus a FIFO of
//! freshly created threads (`just_queued`). A thread that uses up its slice is
//! demoted by one priority level and parked in `expired`; when `active` runs
//! dry the two queues trade places and `just_queued` is drained into the new
//! `active`. Between swaps, dispatching strictly alternates between
//! `just_queued` and `active`.
//!
//! The scheduler only decides. Switching machine contexts is left to the
//! caller, which gets stable pointers to both thread descriptors in a
//! [`Switch`].
//!
//! All operations on one scheduler must run with local interrupts disabled on
//! the CPU that owns it; no locking happens here.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub use self::{
    priority::Priority,
    run_queue::{EnqueueMode, RunQueue},
    scheduler::{
        DispatchSource, Placement, QueueLengths, SchedConfig, Scheduler, Switch, Tick,
    },
    thread::{PrioHistogram, Thread, ThreadId, ThreadState, ThreadStats},
};

mod priority;
mod run_queue;
mod scheduler;
mod thread;
