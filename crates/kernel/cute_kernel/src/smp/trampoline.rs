//! Real-mode entry of secondary CPUs.
//!
//! A SIPI starts the target CPU in real mode at [`SMPBOOT_START`]. The
//! trampoline copied there switches to protected mode, then to long mode on
//! temporary page tables that identity map the first 2MiB and share the
//! kernel's higher half. It finally loads the stack and GS base from the
//! [`SmpBootParams`] block and jumps to the kernel entry.

use core::{arch::global_asm, ptr};

use smp_boot::SmpBootParams;
use x86_64::{
    PhysAddr,
    structures::paging::{PageTable, PageTableFlags},
};

use crate::{
    boot,
    memory::{kernel_pml4, phys_to_virt},
    param::{SMPBOOT_END, SMPBOOT_PAGE_TABLES, SMPBOOT_PARAMS, SMPBOOT_START},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrampolineError {
    #[error("SMP boot area {start:#x}..{end:#x} is not usable memory")]
    AreaNotUsable { start: u32, end: u32 },
    #[error("SMP trampoline too large: {0} bytes")]
    TooLarge(usize),
}

global_asm!(
    ".pushsection .text.smpboot, \"ax\"",
    ".global cute_smpboot_start",
    "cute_smpboot_start:",
    ".code16",
    "cli",
    "cld",
    "movw %cs, %ax",
    "movw %ax, %ds",
    "lgdtl (smpboot_gdt_ptr - cute_smpboot_start)",
    "movl %cr0, %eax",
    "orl $1, %eax", // PE
    "movl %eax, %cr0",
    "ljmpl $0x08, ${start} + (smpboot_protected - cute_smpboot_start)",
    ".code32",
    "smpboot_protected:",
    "movw $0x10, %ax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "movl %cr4, %eax",
    "orl $(1 << 5), %eax", // PAE
    "movl %eax, %cr4",
    "movl ({params} + {p_trampoline_cr3}), %eax",
    "movl %eax, %cr3",
    "movl $0xc0000080, %ecx", // EFER
    "rdmsr",
    "orl $(1 << 8), %eax", // LME
    "wrmsr",
    "movl %cr0, %eax",
    "orl $(1 << 31), %eax", // PG
    "movl %eax, %cr0",
    "ljmpl $0x18, ${start} + (smpboot_long - cute_smpboot_start)",
    ".code64",
    "smpboot_long:",
    "xorl %eax, %eax",
    "movw %ax, %ds",
    "movw %ax, %es",
    "movw %ax, %ss",
    "movq ({params} + {p_stack_top}), %rsp",
    "movl $0xc0000101, %ecx", // GS base
    "movl ({params} + {p_percpu}), %eax",
    "movl ({params} + {p_percpu} + 4), %edx",
    "wrmsr",
    "movq ({params} + {p_entry}), %rax",
    "pushq $0",
    "jmpq *%rax",
    ".balign 8",
    "smpboot_gdt:",
    ".quad 0",
    ".quad 0x00cf9a000000ffff", // 0x08: 32-bit code
    ".quad 0x00cf92000000ffff", // 0x10: data
    ".quad 0x00af9a000000ffff", // 0x18: 64-bit code
    "smpboot_gdt_ptr:",
    ".word smpboot_gdt_ptr - smpboot_gdt - 1",
    ".long {start} + (smpboot_gdt - cute_smpboot_start)",
    ".global cute_smpboot_end",
    "cute_smpboot_end:",
    ".popsection",
    start = const SMPBOOT_START,
    params = const SMPBOOT_PARAMS,
    p_trampoline_cr3 = const SmpBootParams::TRAMPOLINE_CR3,
    p_stack_top = const SmpBootParams::STACK_TOP,
    p_percpu = const SmpBootParams::PERCPU,
    p_entry = const SmpBootParams::ENTRY,
    options(att_syntax),
);

unsafe extern "C" {
    static cute_smpboot_start: u8;
    static cute_smpboot_end: u8;
}

const PAGE_SIZE: usize = 4096;

fn table_at(phys: u32) -> &'static mut PageTable {
    let table = phys_to_virt(PhysAddr::new(u64::from(phys))).as_mut_ptr::<PageTable>();
    unsafe {
        table.write(PageTable::new());
        &mut *table
    }
}

/// Copies the trampoline into low memory and builds its page tables.
///
/// Returns the physical address of the trampoline's top-level table.
pub fn install() -> Result<u64, TrampolineError> {
    let (start, end) = (u64::from(SMPBOOT_START), u64::from(SMPBOOT_END));
    if !boot::usable_regions().any(|(base, len)| base <= start && end <= base + len) {
        return Err(TrampolineError::AreaNotUsable {
            start: SMPBOOT_START,
            end: SMPBOOT_END,
        });
    }

    let src = &raw const cute_smpboot_start;
    let len = (&raw const cute_smpboot_end).addr() - src.addr();
    if len > PAGE_SIZE {
        return Err(TrampolineError::TooLarge(len));
    }
    let dst = phys_to_virt(PhysAddr::new(u64::from(SMPBOOT_START))).as_mut_ptr::<u8>();
    unsafe {
        ptr::copy_nonoverlapping(src, dst, len);
    }

    let pml4_phys = SMPBOOT_PAGE_TABLES;
    let pdpt_phys = pml4_phys + 0x1000;
    let pd_phys = pdpt_phys + 0x1000;
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

    let pd = table_at(pd_phys);
    pd[0].set_addr(PhysAddr::new(0), flags | PageTableFlags::HUGE_PAGE);
    let pdpt = table_at(pdpt_phys);
    pdpt[0].set_addr(PhysAddr::new(u64::from(pd_phys)), flags);
    let pml4 = table_at(pml4_phys);
    pml4[0].set_addr(PhysAddr::new(u64::from(pdpt_phys)), flags);

    // the kernel image, heap and direct map all live in the higher half.
    let kernel = unsafe { &*phys_to_virt(kernel_pml4()).as_ptr::<PageTable>() };
    for (entry, kernel_entry) in pml4.iter_mut().zip(kernel.iter()).skip(256) {
        *entry = kernel_entry.clone();
    }

    Ok(u64::from(pml4_phys))
}
