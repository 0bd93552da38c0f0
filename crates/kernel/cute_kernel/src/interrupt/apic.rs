//! Local APIC driver.

use core::{
    ptr,
    sync::atomic::{AtomicU64, Ordering},
};

use smp_boot::{Apic, IcrFlags, Ipi};
use vcell::VolatileCell;
use x86_64::{PhysAddr, registers::model_specific::Msr};

use crate::{cpu, memory::mmio, param::SPURIOUS_VECTOR};

const IA32_APIC_BASE: u32 = 0x1b;
const APIC_BASE_ENABLE: u64 = 1 << 11;
const APIC_BASE_MASK: u64 = 0x000f_ffff_ffff_f000;

// register offsets.

/// local APIC id
const ID: usize = 0x20;
/// task priority register
const TPR: usize = 0x80;
/// end of interrupt
const EOI: usize = 0xb0;
/// spurious interrupt vector register
const SPIV: usize = 0xf0;
const SPIV_ENABLE: u32 = 1 << 8;
/// interrupt command register, low dword
const ICR_LOW: usize = 0x300;
/// interrupt command register, high dword
const ICR_HIGH: usize = 0x310;
/// LVT timer register
pub(super) const LVT_TIMER: usize = 0x320;
pub(super) const LVT_MASKED: u32 = 1 << 16;
pub(super) const LVT_TIMER_PERIODIC: u32 = 1 << 17;
/// timer initial count
pub(super) const TIMER_INITIAL: usize = 0x380;
/// timer current count
pub(super) const TIMER_CURRENT: usize = 0x390;
/// timer divide configuration
pub(super) const TIMER_DIVIDE: usize = 0x3e0;
pub(super) const TIMER_DIVIDE_BY_16: u32 = 0b0011;

/// Registers are 32 bits wide, 16 bytes apart.
#[repr(C, align(16))]
struct Register {
    value: VolatileCell<u32>,
}

/// Virtual address of the register page. Same on every CPU.
static BASE: AtomicU64 = AtomicU64::new(0);

fn reg(offset: usize) -> Option<&'static Register> {
    let base = BASE.load(Ordering::Acquire);
    if base == 0 {
        return None;
    }
    let reg = ptr::with_exposed_provenance::<Register>(base as usize + offset);
    Some(unsafe { &*reg })
}

pub(super) fn read(offset: usize) -> u32 {
    reg(offset).map_or(0, |r| r.value.get())
}

pub(super) fn write(offset: usize, value: u32) {
    if let Some(r) = reg(offset) {
        r.value.set(value);
    }
}

/// Maps the register page and enables the bootstrap CPU's APIC.
pub fn init() {
    let mut msr = Msr::new(IA32_APIC_BASE);
    let apic_base = unsafe { msr.read() };
    let phys = PhysAddr::new(apic_base & APIC_BASE_MASK);
    let virt = mmio::map(phys);
    BASE.store(virt.as_u64(), Ordering::Release);
    log::debug!("local APIC at {:#x}", phys.as_u64());
    init_this_cpu();
}

/// Enables this CPU's APIC and records its id.
pub fn init_this_cpu() {
    let mut msr = Msr::new(IA32_APIC_BASE);
    unsafe {
        let value = msr.read();
        msr.write(value | APIC_BASE_ENABLE);
    }

    write(TPR, 0);
    write(SPIV, SPIV_ENABLE | u32::from(SPURIOUS_VECTOR));
    write(LVT_TIMER, LVT_MASKED);

    cpu::current().set_apic_id(local_id());
}

pub fn local_id() -> u32 {
    read(ID) >> 24
}

/// Signals the end of the interrupt being handled.
pub fn eoi() {
    write(EOI, 0);
}

/// Returns `true` once the APIC registers are reachable.
pub fn is_ready() -> bool {
    BASE.load(Ordering::Acquire) != 0
}

/// The calling CPU's local APIC, for sending IPIs.
pub struct LocalApic;

impl Apic for LocalApic {
    fn local_apic_id(&self) -> u32 {
        local_id()
    }

    fn send_ipi(&mut self, ipi: Ipi) {
        let icr = ipi.icr();
        // writing the low dword sends the IPI.
        write(ICR_HIGH, icr.high);
        write(ICR_LOW, icr.low);
    }

    fn ipi_acknowledged(&self) -> bool {
        !IcrFlags::from_bits_truncate(read(ICR_LOW)).contains(IcrFlags::DELIVERY_PENDING)
    }
}
