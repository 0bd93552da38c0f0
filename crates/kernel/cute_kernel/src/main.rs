#![feature(abi_x86_interrupt)]
#![no_std]
#![no_main]

use cute_kernel_params as param;

extern crate alloc;

mod boot;
mod console;
mod cpu;
mod interrupt;
mod memory;
mod smp;
mod sync;
mod thread;

// Limine jumps here on the bootstrap CPU, with interrupts disabled.
#[unsafe(no_mangle)]
extern "C" fn kmain() -> ! {
    interrupt::disable();

    console::init();
    println!();
    println!("cute kernel is booting");
    println!();

    boot::init(); // bootloader responses
    cpu::init_bootstrap(); // per-CPU area and GS base
    memory::init(); // memory map summary
    interrupt::init(); // IDT, legacy PIC masked
    interrupt::apic::init(); // local APIC of this CPU
    interrupt::timer::calibrate(); // APIC timer against the PIT
    thread::init_this_cpu_as_schedulable();
    smp::start_secondary_cpus();
    log::info!(
        "boot complete: {} CPUs alive, heap used={}KiB",
        smp::alive_cpu_count(),
        memory::heap::used() / 1024
    );

    #[cfg(feature = "self-test")]
    self_test::run_on_bootstrap();

    interrupt::timer::init_this_cpu(); // periodic ticks
    interrupt::enable();

    cpu::idle_loop();
}
