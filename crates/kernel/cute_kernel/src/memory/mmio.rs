//! Uncached mappings of device registers.

use x86_64::{
    PhysAddr, VirtAddr,
    structures::paging::{
        Mapper, Page, PageTableFlags, PhysFrame, Size4KiB, mapper::MapToError,
    },
};

use super::{active_page_table, frame::BootFrameAllocator, phys_to_virt};
use crate::sync::SpinLock;

static MAPPER_LOCK: SpinLock<()> = SpinLock::new(());

/// Maps the 4KiB page at `phys` into the direct map, uncached, and returns
/// its address.
///
/// Pages the bootloader already mapped are left as they are.
pub fn map(phys: PhysAddr) -> VirtAddr {
    let frame = PhysFrame::<Size4KiB>::containing_address(phys);
    let virt = phys_to_virt(frame.start_address());
    let page = Page::<Size4KiB>::containing_address(virt);
    let flags = PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::NO_CACHE
        | PageTableFlags::WRITE_THROUGH
        | PageTableFlags::NO_EXECUTE;

    let _guard = MAPPER_LOCK.lock();
    let mut table = unsafe { active_page_table() };
    match unsafe { table.map_to(page, frame, flags, &mut BootFrameAllocator) } {
        Ok(flush) => flush.flush(),
        Err(MapToError::PageAlreadyMapped(_) | MapToError::ParentEntryHugePage) => {}
        Err(MapToError::FrameAllocationFailed) => {
            panic!("out of frames while mapping {:#x}", phys.as_u64());
        }
    }
    virt + (phys.as_u64() - frame.start_address().as_u64())
}
