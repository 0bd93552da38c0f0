use core::mem::{offset_of, size_of};

use dataview::Pod;
use static_assertions::const_assert_eq;

/// Operand of `lgdt`/`lidt`.
///
/// The limit is placed right before the 8-byte aligned base, so the
/// pseudo-descriptor starts at [`TableRegister::OPERAND`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod)]
pub struct TableRegister {
    _pad: [u16; 3],
    limit: u16,
    base: u64,
}

impl TableRegister {
    /// Offset of the 10-byte `lgdt`/`lidt` operand.
    pub const OPERAND: usize = offset_of!(Self, limit);

    #[must_use]
    pub const fn new(base: u64, limit: u16) -> Self {
        Self {
            _pad: [0; 3],
            limit,
            base,
        }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub const fn limit(&self) -> u16 {
        self.limit
    }
}

/// Block the bootstrap CPU fills in before sending a SIPI.
///
/// It lives at a fixed low-memory address next to the trampoline, which
/// reads it by offset while still in real mode and protected mode.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod)]
pub struct SmpBootParams {
    /// Physical address of the trampoline's temporary PML4.
    pub trampoline_cr3: u64,
    /// Physical address of the kernel's PML4.
    pub kernel_cr3: u64,
    pub gdt: TableRegister,
    pub idt: TableRegister,
    /// Initial `rsp` of the new CPU.
    pub stack_top: u64,
    /// Value loaded into the GS base MSR.
    pub percpu: u64,
    /// 64-bit entry point, called with the stack above.
    pub entry: u64,
}

impl SmpBootParams {
    pub const TRAMPOLINE_CR3: usize = offset_of!(Self, trampoline_cr3);
    pub const KERNEL_CR3: usize = offset_of!(Self, kernel_cr3);
    pub const GDT: usize = offset_of!(Self, gdt);
    pub const IDT: usize = offset_of!(Self, idt);
    pub const STACK_TOP: usize = offset_of!(Self, stack_top);
    pub const PERCPU: usize = offset_of!(Self, percpu);
    pub const ENTRY: usize = offset_of!(Self, entry);
}

const_assert_eq!(size_of::<TableRegister>(), 16);
const_assert_eq!(TableRegister::OPERAND, 6);
const_assert_eq!(size_of::<SmpBootParams>(), 0x48);
const_assert_eq!(SmpBootParams::STACK_TOP, 0x30);
const_assert_eq!(SmpBootParams::ENTRY, 0x40);

#[cfg(test)]
mod tests {
    use dataview::DataView;

    use super::*;

    #[test]
    fn fields_are_readable_by_offset() {
        let mut params = SmpBootParams {
            kernel_cr3: 0x1234_5000,
            stack_top: 0xffff_8000_0001_0000,
            entry: 0xffff_ffff_8000_1000,
            ..SmpBootParams::default()
        };
        params.gdt = TableRegister::new(0xffff_8000_0000_2000, 0x37);

        let view = DataView::from(&params);
        assert_eq!(view.read::<u64>(SmpBootParams::KERNEL_CR3), 0x1234_5000);
        assert_eq!(
            view.read::<u64>(SmpBootParams::STACK_TOP),
            0xffff_8000_0001_0000
        );
        assert_eq!(view.read::<u64>(SmpBootParams::ENTRY), 0xffff_ffff_8000_1000);

        let operand = SmpBootParams::GDT + TableRegister::OPERAND;
        assert_eq!(view.read::<u16>(operand), 0x37);
        assert_eq!(view.read::<u64>(operand + 2), 0xffff_8000_0000_2000);
    }
}
