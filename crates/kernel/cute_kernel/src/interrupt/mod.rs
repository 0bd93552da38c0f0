//! Interrupt descriptor table and CPU exception handlers.

use x86_64::{
    instructions::{self, interrupts, port::Port},
    registers::control::Cr2,
    structures::{
        DescriptorTablePointer,
        idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode},
    },
};

use crate::{
    cpu,
    param::{HALT_CPU_IPI_VECTOR, SPURIOUS_VECTOR, TICKS_IRQ_VECTOR},
};

pub mod apic;
pub mod pit;
pub mod timer;

/// Shared by all CPUs. Written once by the bootstrap CPU in [`init()`].
static mut IDT: InterruptDescriptorTable = InterruptDescriptorTable::new();

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xa1;

pub fn enable() {
    interrupts::enable();
}

pub fn disable() {
    interrupts::disable();
}

/// Fills in the IDT and loads it on the bootstrap CPU.
pub fn init() {
    // everything arrives through the local APIC.
    unsafe {
        Port::<u8>::new(PIC1_DATA).write(0xff);
        Port::<u8>::new(PIC2_DATA).write(0xff);
    }

    let idt = unsafe { &mut *(&raw mut IDT) };
    idt.divide_error.set_handler_fn(divide_error);
    idt.breakpoint.set_handler_fn(breakpoint);
    idt.invalid_opcode.set_handler_fn(invalid_opcode);
    idt.double_fault.set_handler_fn(double_fault);
    idt.general_protection_fault
        .set_handler_fn(general_protection_fault);
    idt.page_fault.set_handler_fn(page_fault);
    unsafe {
        idt[TICKS_IRQ_VECTOR].set_handler_addr(timer::entry_addr());
    }
    idt[HALT_CPU_IPI_VECTOR].set_handler_fn(halt_cpu);
    idt[SPURIOUS_VECTOR].set_handler_fn(spurious);

    load();
}

/// Loads the shared IDT on this CPU.
pub fn load() {
    let idt = unsafe { &*(&raw const IDT) };
    idt.load();
}

/// The IDT pointer to hand to secondary CPUs.
pub fn idt_pointer() -> DescriptorTablePointer {
    instructions::tables::sidt()
}

extern "x86-interrupt" fn divide_error(frame: InterruptStackFrame) {
    panic!("divide error\n{frame:#?}");
}

extern "x86-interrupt" fn breakpoint(frame: InterruptStackFrame) {
    log::warn!("breakpoint at {:#x}", frame.instruction_pointer.as_u64());
}

extern "x86-interrupt" fn invalid_opcode(frame: InterruptStackFrame) {
    panic!("invalid opcode\n{frame:#?}");
}

extern "x86-interrupt" fn double_fault(frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("double fault\n{frame:#?}");
}

extern "x86-interrupt" fn general_protection_fault(frame: InterruptStackFrame, error_code: u64) {
    panic!("general protection fault: error_code={error_code:#x}\n{frame:#?}");
}

extern "x86-interrupt" fn page_fault(frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    let addr = Cr2::read_raw();
    panic!("page fault: addr={addr:#x}, error_code={error_code:?}\n{frame:#?}");
}

/// Another CPU panicked.
extern "x86-interrupt" fn halt_cpu(_frame: InterruptStackFrame) {
    cpu::halt_forever();
}

extern "x86-interrupt" fn spurious(_frame: InterruptStackFrame) {}
