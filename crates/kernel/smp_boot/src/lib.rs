//! Secondary CPU bring-up and inter-processor interrupts.
//!
//! The bootstrap CPU starts the other CPUs one at a time with the
//! INIT-SIPI handshake: INIT parks the target in wait-for-SIPI, and the SIPI
//! makes it execute real-mode code at a 4KiB aligned low-memory address.
//! Every wait in the protocol is bounded by a [`PollBudget`], and any CPU
//! that does not come up is reported as a [`BringupError`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::sync::atomic::{AtomicUsize, Ordering};

pub use self::{
    bringup::{
        BringupConfig, BringupError, BringupReport, CpuBringup, bootstrap_index,
        start_secondary_cpus,
    },
    handoff::Handoff,
    ipi::{Apic, DeliveryMode, Destination, Icr, IcrFlags, Ipi, SipiVector, broadcast_halt},
    params::{SmpBootParams, TableRegister},
    poll::{Delay, PollBudget, poll_with_timeout},
};

mod bringup;
mod handoff;
mod ipi;
mod params;
mod poll;

/// A CPU found in the machine's topology tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    pub apic_id: u32,
    /// `true` for the CPU that booted the system.
    pub bootstrap: bool,
}

/// Number of CPUs that have finished their startup path.
///
/// Starts at one, for the bootstrap CPU.
#[derive(Debug)]
pub struct AliveCpus(AtomicUsize);

impl Default for AliveCpus {
    fn default() -> Self {
        Self::new()
    }
}

impl AliveCpus {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Counts the calling CPU as alive and returns the new total.
    pub fn mark_alive(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of alive CPUs. Lock-free, safe to call while panicking.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}
