//! Periodic local APIC timer and its interrupt entry.
//!
//! The entry stub saves the caller-saved registers, calls the tick handler
//! and returns through `cute_irq_return`. Threads switched out by the
//! handler resume at that label too, which is how fresh threads get started.

use core::{
    arch::global_asm,
    sync::atomic::{AtomicU32, Ordering},
};

use x86_64::VirtAddr;

use super::{apic, pit};
use crate::{
    param::{HZ, TICKS_IRQ_VECTOR},
    thread,
};

const CALIBRATION_MS: u32 = 10;

/// APIC timer counts per scheduler tick.
static COUNTS_PER_TICK: AtomicU32 = AtomicU32::new(0);

global_asm!(
    ".global cute_timer_entry",
    "cute_timer_entry:",
    "push rax",
    "push rcx",
    "push rdx",
    "push rdi",
    "push rsi",
    "push r8",
    "push r9",
    "push r10",
    "push r11",
    "cld",
    "call {handler}",
    ".global cute_irq_return",
    "cute_irq_return:",
    "pop r11",
    "pop r10",
    "pop r9",
    "pop r8",
    "pop rsi",
    "pop rdi",
    "pop rdx",
    "pop rcx",
    "pop rax",
    "iretq",
    handler = sym handle_tick,
);

unsafe extern "C" {
    fn cute_timer_entry();
    fn cute_irq_return();
}

/// Address the IDT points the tick vector at.
pub fn entry_addr() -> VirtAddr {
    VirtAddr::new(cute_timer_entry as usize as u64)
}

/// Address a switched-out thread resumes at.
pub fn irq_return_addr() -> u64 {
    cute_irq_return as usize as u64
}

extern "C" fn handle_tick() {
    // acknowledge first: the handler may switch away and not come back
    // for a while.
    apic::eoi();
    thread::tick();
}

/// Measures the APIC timer frequency against the PIT.
pub fn calibrate() {
    apic::write(apic::TIMER_DIVIDE, apic::TIMER_DIVIDE_BY_16);
    apic::write(apic::LVT_TIMER, apic::LVT_MASKED);
    apic::write(apic::TIMER_INITIAL, u32::MAX);
    pit::mdelay(CALIBRATION_MS);
    let elapsed = u32::MAX - apic::read(apic::TIMER_CURRENT);
    apic::write(apic::TIMER_INITIAL, 0);

    let per_second = u64::from(elapsed) * u64::from(1000 / CALIBRATION_MS);
    let per_tick = u32::try_from(per_second / u64::from(HZ))
        .unwrap_or(u32::MAX)
        .max(1);
    COUNTS_PER_TICK.store(per_tick, Ordering::Relaxed);
    log::info!("APIC timer: {per_second} counts/s, {per_tick} per tick at {HZ}Hz");
}

/// Starts periodic ticks on this CPU.
pub fn init_this_cpu() {
    let per_tick = COUNTS_PER_TICK.load(Ordering::Relaxed);
    assert!(per_tick > 0, "APIC timer not calibrated");
    apic::write(apic::TIMER_DIVIDE, apic::TIMER_DIVIDE_BY_16);
    apic::write(
        apic::LVT_TIMER,
        u32::from(TICKS_IRQ_VECTOR) | apic::LVT_TIMER_PERIODIC,
    );
    apic::write(apic::TIMER_INITIAL, per_tick);
}
