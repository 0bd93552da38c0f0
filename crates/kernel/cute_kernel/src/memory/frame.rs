//! Physical frames for page tables, taken from usable memory.
//!
//! Frames below 1MiB are left alone; the SMP trampoline lives there.

use x86_64::{
    PhysAddr,
    structures::paging::{FrameAllocator, PhysFrame, Size4KiB},
};

use crate::{boot, sync::SpinLock};

const LOW_MEMORY_END: u64 = 0x10_0000;
const FRAME_SIZE: u64 = 4096;
const FRAME_BYTES: usize = 4096;

struct Cursor {
    region: usize,
    next: u64,
}

static CURSOR: SpinLock<Cursor> = SpinLock::new(Cursor { region: 0, next: 0 });

/// Hands out zeroed frames from the memory map, never to be returned.
pub struct BootFrameAllocator;

unsafe impl FrameAllocator<Size4KiB> for BootFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let mut cursor = CURSOR.lock();
        loop {
            let (base, len) = boot::usable_regions().nth(cursor.region)?;
            let start = cursor
                .next
                .max(base)
                .max(LOW_MEMORY_END)
                .next_multiple_of(FRAME_SIZE);
            if start + FRAME_SIZE <= base + len {
                cursor.next = start + FRAME_SIZE;
                let frame = PhysFrame::containing_address(PhysAddr::new(start));
                let virt = super::phys_to_virt(frame.start_address());
                unsafe {
                    virt.as_mut_ptr::<u8>().write_bytes(0, FRAME_BYTES);
                }
                return Some(frame);
            }
            cursor.region += 1;
            cursor.next = 0;
        }
    }
}
