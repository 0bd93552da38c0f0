//! Per-CPU state, reached through the GS segment base.

use core::{
    arch::asm,
    cell::UnsafeCell,
    mem::offset_of,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering},
};

use irq_lock::{IrqNesting, LocalCpu};
use mlfq::{Scheduler, Thread};
use smp_boot::Handoff;
use x86_64::{
    VirtAddr,
    instructions::{self, interrupts},
    registers::model_specific::GsBase,
};

use crate::{
    boot,
    param::NCPU,
    thread::{KThread, ThreadArch},
};

static CPUS: [PerCpu; NCPU] = [const { PerCpu::new() }; NCPU];

/// Per-CPU state.
///
/// The GS base of every CPU points at its own entry, whose first word
/// points back at it.
#[repr(C)]
pub struct PerCpu {
    self_ptr: AtomicPtr<PerCpu>,
    /// Index into the CPU table.
    id: AtomicUsize,
    apic_id: AtomicU32,
    /// The thread running on this CPU. Null until the CPU is schedulable.
    current: AtomicPtr<KThread>,
    /// Lock nesting of the startup path, before any thread exists.
    boot_nesting: IrqNesting,
    /// Bootstrap thread of a secondary CPU, allocated by the bootstrap CPU.
    boot_thread: Handoff<KThread>,
    /// Only touched by this CPU, with interrupts disabled.
    sched: UnsafeCell<Option<Scheduler<ThreadArch>>>,
    /// Target of the GS-relative accessor test.
    #[cfg(feature = "self-test")]
    scratch: UnsafeCell<u64>,
}

const _: () = assert!(offset_of!(PerCpu, self_ptr) == 0);

/// Offset of the self-test scratch word from the GS base.
#[cfg(feature = "self-test")]
pub const SCRATCH_OFFSET: usize = offset_of!(PerCpu, scratch);

unsafe impl Sync for PerCpu {}

impl PerCpu {
    const fn new() -> Self {
        Self {
            self_ptr: AtomicPtr::new(ptr::null_mut()),
            id: AtomicUsize::new(0),
            apic_id: AtomicU32::new(0),
            current: AtomicPtr::new(ptr::null_mut()),
            boot_nesting: IrqNesting::new(),
            boot_thread: Handoff::new(),
            sched: UnsafeCell::new(None),
            #[cfg(feature = "self-test")]
            scratch: UnsafeCell::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    pub fn apic_id(&self) -> u32 {
        self.apic_id.load(Ordering::Relaxed)
    }

    pub fn set_apic_id(&self, apic_id: u32) {
        self.apic_id.store(apic_id, Ordering::Relaxed);
    }

    /// Address of this entry, as loaded into the GS base.
    pub fn as_addr(&self) -> u64 {
        ptr::from_ref(self).addr() as u64
    }

    /// Marks `thread` as the one running on this CPU.
    pub fn set_current(&self, thread: NonNull<KThread>) {
        self.current.store(thread.as_ptr(), Ordering::Release);
    }

    /// Returns this CPU's scheduler.
    ///
    /// # Safety
    ///
    /// Must be called on this CPU with interrupts disabled, and the returned
    /// reference must be gone before interrupts are enabled again.
    #[expect(clippy::mut_from_ref)]
    pub unsafe fn scheduler(&self) -> Option<&mut Scheduler<ThreadArch>> {
        unsafe { (*self.sched.get()).as_mut() }
    }

    /// Installs this CPU's scheduler.
    ///
    /// # Safety
    ///
    /// Same as [`Self::scheduler()`].
    #[expect(clippy::mut_from_ref)]
    pub unsafe fn install_scheduler(&self, sched: Scheduler<ThreadArch>) -> &mut Scheduler<ThreadArch> {
        let slot = unsafe { &mut *self.sched.get() };
        assert!(slot.is_none(), "CPU#{} is already schedulable", self.id());
        slot.insert(sched)
    }

    fn nesting(&self) -> &IrqNesting {
        match NonNull::new(self.current.load(Ordering::Acquire)) {
            // threads are never freed.
            Some(thread) => unsafe { &(*Thread::arch_ptr(thread).as_ptr()).irq },
            None => &self.boot_nesting,
        }
    }

    /// Lock nesting of the startup path.
    pub fn boot_nesting(&self) -> &IrqNesting {
        &self.boot_nesting
    }

    /// Slot for the bootstrap thread this CPU adopts when it starts.
    pub fn boot_thread(&self) -> &Handoff<KThread> {
        &self.boot_thread
    }
}

/// Prepares the entry of CPU `id` in the CPU table and returns it.
pub fn setup(id: usize) -> &'static PerCpu {
    let cpu = &CPUS[id];
    cpu.self_ptr
        .store(ptr::from_ref(cpu).cast_mut(), Ordering::Relaxed);
    cpu.id.store(id, Ordering::Relaxed);
    cpu
}

/// Sets up the bootstrap CPU's entry and points its GS base at it.
///
/// # Panics
///
/// Panics if the machine has more CPUs than the CPU table holds.
pub fn init_bootstrap() {
    let cpus = boot::cpus();
    let id = match smp_boot::bootstrap_index(&cpus) {
        Ok(id) => id,
        Err(e) => panic!("{e}"),
    };
    let cpu = setup(id);
    if let Some(info) = cpus.get(id) {
        cpu.set_apic_id(info.apic_id);
    }
    GsBase::write(VirtAddr::new(cpu.as_addr()));
}

/// Returns this CPU's entry.
///
/// Threads never move between CPUs, so the result stays valid even if
/// interrupts are enabled.
pub fn current() -> &'static PerCpu {
    let cpu: *const PerCpu;
    unsafe {
        asm!(
            "mov {}, gs:[0]",
            out(reg) cpu,
            options(nostack, preserves_flags, readonly),
        );
        &*cpu
    }
}

/// Returns current CPU's ID.
pub fn id() -> usize {
    current().id()
}

/// Returns this CPU's entry, or `None` before the GS base is set up.
pub fn try_current() -> Option<&'static PerCpu> {
    (GsBase::read().as_u64() != 0).then(current)
}

/// Returns current CPU's ID, or `None` before the GS base is set up.
pub fn try_id() -> Option<usize> {
    try_current().map(PerCpu::id)
}

/// Stops this CPU for good.
pub fn halt_forever() -> ! {
    loop {
        interrupts::disable();
        instructions::hlt();
    }
}

/// Waits for interrupts forever.
pub fn idle_loop() -> ! {
    loop {
        interrupts::enable_and_hlt();
    }
}

/// The CPU executing the caller.
pub struct X86Cpu;

impl LocalCpu for X86Cpu {
    fn interrupts_enabled() -> bool {
        interrupts::are_enabled()
    }

    fn enable_interrupts() {
        interrupts::enable();
    }

    fn disable_interrupts() {
        interrupts::disable();
    }

    fn nesting() -> &'static IrqNesting {
        // the console locks before the bootstrap CPU has a GS base.
        static EARLY_NESTING: IrqNesting = IrqNesting::new();
        try_current().map_or(&EARLY_NESTING, PerCpu::nesting)
    }
}
