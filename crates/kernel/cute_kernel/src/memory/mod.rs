//! Physical memory access through the higher-half direct map.

use x86_64::{
    PhysAddr, VirtAddr,
    registers::control::Cr3,
    structures::paging::{OffsetPageTable, PageTable},
};

use crate::{boot, param::HEAP_SIZE};

pub mod frame;
pub mod heap;
pub mod mmio;

/// Returns the direct-map address of `phys`.
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new(boot::hhdm_offset() + phys.as_u64())
}

/// Physical address of the active top-level page table.
pub fn kernel_pml4() -> PhysAddr {
    Cr3::read().0.start_address()
}

/// Returns the active page table.
///
/// # Safety
///
/// The caller must not create a second mapper while the returned one is
/// alive.
unsafe fn active_page_table() -> OffsetPageTable<'static> {
    let pml4 = phys_to_virt(kernel_pml4()).as_mut_ptr::<PageTable>();
    let offset = VirtAddr::new(boot::hhdm_offset());
    unsafe { OffsetPageTable::new(&mut *pml4, offset) }
}

pub fn init() {
    let usable: u64 = boot::usable_regions().map(|(_, len)| len).sum();
    log::info!(
        "memory: usable={}KiB, heap={}KiB, hhdm={:#x}",
        usable / 1024,
        HEAP_SIZE / 1024,
        boot::hhdm_offset()
    );
}
