//! Secondary CPU startup and the panic-time halt broadcast.

use alloc::vec;
use core::{
    ptr,
    sync::atomic::{AtomicU16, Ordering},
};

use smp_boot::{AliveCpus, BringupConfig, SipiVector, SmpBootParams, TableRegister};
use x86_64::{
    PhysAddr, VirtAddr,
    instructions::{
        segmentation::{CS, DS, ES, SS, Segment as _},
        tables::{self, lgdt, lidt},
    },
    registers::control::{Cr3, Cr3Flags},
    structures::{DescriptorTablePointer, gdt::SegmentSelector, paging::PhysFrame},
};

use crate::{
    boot, cpu,
    interrupt::{self, apic::LocalApic, pit::Pit, timer},
    memory::{self, phys_to_virt},
    param::{HALT_CPU_IPI_VECTOR, KSTACK_SIZE, SMPBOOT_PARAMS, SMPBOOT_START},
    thread,
};

mod trampoline;

static ALIVE: AliveCpus = AliveCpus::new();

/// Segment selectors of the bootstrap CPU, reused by the others.
static KERNEL_CS: AtomicU16 = AtomicU16::new(0);
static KERNEL_SS: AtomicU16 = AtomicU16::new(0);

/// Number of CPUs that finished their startup path.
pub fn alive_cpu_count() -> usize {
    ALIVE.count()
}

/// Asks every other alive CPU to halt. Used when panicking.
pub fn broadcast_halt() {
    if interrupt::apic::is_ready() {
        smp_boot::broadcast_halt(&mut LocalApic, &ALIVE, HALT_CPU_IPI_VECTOR);
    }
}

fn params() -> *mut SmpBootParams {
    phys_to_virt(PhysAddr::new(u64::from(SMPBOOT_PARAMS))).as_mut_ptr()
}

fn table_register(ptr: &DescriptorTablePointer) -> TableRegister {
    TableRegister::new(ptr.base.as_u64(), ptr.limit)
}

/// Starts every other CPU, one at a time.
///
/// # Panics
///
/// Panics if any CPU fails to come up.
pub fn start_secondary_cpus() {
    let cpus = boot::cpus();
    if cpus.len() <= 1 {
        log::info!("single CPU system");
        return;
    }

    let start = match SipiVector::new(SMPBOOT_START) {
        Ok(start) => start,
        Err(e) => panic!("{e}"),
    };
    let trampoline_cr3 = match trampoline::install() {
        Ok(cr3) => cr3,
        Err(e) => panic!("{e}"),
    };

    KERNEL_CS.store(CS::get_reg().0, Ordering::Relaxed);
    KERNEL_SS.store(SS::get_reg().0, Ordering::Relaxed);
    let gdt = table_register(&tables::sgdt());
    let idt = table_register(&interrupt::idt_pointer());
    let kernel_cr3 = memory::kernel_pml4().as_u64();

    let result = smp_boot::start_secondary_cpus(
        &mut LocalApic,
        &mut Pit,
        &BringupConfig::default(),
        &cpus,
        start,
        &ALIVE,
        |index, info| {
            let percpu = cpu::setup(index);
            percpu.set_apic_id(info.apic_id);
            // the target cannot allocate before it is schedulable; its
            // bootstrap thread owns the stack it starts on.
            let stack = vec![0_u8; KSTACK_SIZE].into_boxed_slice();
            let stack_top = (stack.as_ptr_range().end.addr() as u64) & !0xf;
            percpu
                .boot_thread()
                .put(thread::new_boot_thread(index, Some(stack)));
            unsafe {
                ptr::write_volatile(
                    params(),
                    SmpBootParams {
                        trampoline_cr3,
                        kernel_cr3,
                        gdt,
                        idt,
                        stack_top,
                        percpu: percpu.as_addr(),
                        entry: secondary_start as usize as u64,
                    },
                );
            }
        },
    );

    match result {
        Ok(report) => log::info!(
            "{} CPUs alive, {} SIPI retries",
            ALIVE.count(),
            report.retries()
        ),
        Err(e) => panic!("SMP bring-up failed: {e}"),
    }
}

/// Long-mode entry of secondary CPUs, on the stack and GS base set up by
/// the trampoline.
extern "C" fn secondary_start() -> ! {
    // the parameter block is reused for the next CPU once this one is alive.
    let params = unsafe { ptr::read_volatile(params()) };

    unsafe {
        lgdt(&DescriptorTablePointer {
            limit: params.gdt.limit(),
            base: VirtAddr::new(params.gdt.base()),
        });
        let data = SegmentSelector(KERNEL_SS.load(Ordering::Relaxed));
        CS::set_reg(SegmentSelector(KERNEL_CS.load(Ordering::Relaxed)));
        SS::set_reg(data);
        DS::set_reg(data);
        ES::set_reg(data);
        Cr3::write(
            PhysFrame::containing_address(PhysAddr::new(params.kernel_cr3)),
            Cr3Flags::empty(),
        );
        lidt(&DescriptorTablePointer {
            limit: params.idt.limit(),
            base: VirtAddr::new(params.idt.base()),
        });
    }

    thread::init_this_cpu_as_schedulable();
    interrupt::apic::init_this_cpu();
    ALIVE.mark_alive();
    log::info!("CPU#{} up, apic_id={}", cpu::id(), cpu::current().apic_id());

    #[cfg(feature = "self-test")]
    crate::self_test::run_on_secondary();

    timer::init_this_cpu();
    interrupt::enable();

    cpu::idle_loop();
}
