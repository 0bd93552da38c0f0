//! Stack layout shared by the timer interrupt path and thread creation.
//!
//! The timer entry stub pushes the caller-saved registers on top of the frame
//! the CPU pushed, calls the tick handler, and on return pops them again and
//! executes `iretq`. The address of that return sequence is the resumption
//! point of every switched-out thread: the context switch saves callee-saved
//! registers plus `rsp`, and `ret`s into whatever sits at the saved `rsp`.
//!
//! A new thread is made to look exactly like one that was preempted by the
//! timer: its stack top holds a hand-made [`IrqContext`] whose `rip` is the
//! entry routine, preceded by the address of the interrupt return sequence.
//!
//! ```text
//!  top      +--------------------+
//!           | on_return          |  <- rsp at entry (top - 8)
//!  top - 8  +--------------------+
//!           | IrqContext         |  ss, rsp, rflags, cs, rip, rax .. r11
//!  top - 120+--------------------+
//!           | resume             |  <- SavedContext::rsp
//!  top - 128+--------------------+
//! ```

#![cfg_attr(not(test), no_std)]

use core::mem::{offset_of, size_of};

use dataview::{DataView, Pod};
use static_assertions::const_assert_eq;

/// `RFLAGS.IF`.
pub const RFLAGS_IF: u64 = 1 << 9;

/// `RFLAGS` bit 1, reads as one.
pub const RFLAGS_RESERVED: u64 = 1 << 1;

/// Flags a fresh thread starts with.
pub const DEFAULT_RFLAGS: u64 = RFLAGS_RESERVED | RFLAGS_IF;

/// Registers saved on interrupt entry, lowest address first.
///
/// `r11` .. `rax` are pushed by the entry stub, `rip` .. `ss` by the CPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
pub struct IrqContext {
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const_assert_eq!(size_of::<IrqContext>(), 0x70);
const_assert_eq!(offset_of!(IrqContext, rax), 0x40);
const_assert_eq!(offset_of!(IrqContext, rip), 0x48);
const_assert_eq!(offset_of!(IrqContext, ss), 0x68);

impl IrqContext {
    /// Value of registers a fresh thread must not rely on.
    pub const POISON: u64 = 0xdead_feed_dead_feed;

    /// Number of general-purpose registers pushed by the entry stub.
    pub const PUSHED_REGS: usize = 9;

    const fn poisoned() -> Self {
        Self {
            r11: Self::POISON,
            r10: Self::POISON,
            r9: Self::POISON,
            r8: Self::POISON,
            rsi: Self::POISON,
            rdi: Self::POISON,
            rdx: Self::POISON,
            rcx: Self::POISON,
            rax: Self::POISON,
            rip: Self::POISON,
            cs: Self::POISON,
            rflags: Self::POISON,
            rsp: Self::POISON,
            ss: Self::POISON,
        }
    }
}

/// Where a fresh thread starts and what surrounds its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshEntry {
    /// Entry routine.
    pub entry: u64,
    /// Return address seen by the entry routine.
    pub on_return: u64,
    /// Interrupt return sequence of the timer entry stub.
    pub resume: u64,
    /// Kernel code segment selector.
    pub code_segment: u16,
    /// Stack segment selector.
    pub stack_segment: u16,
}

/// Machine state of a thread that is not on CPU.
///
/// Only ever built by [`SavedContext::running()`], then filled by the
/// context switch, or by [`SavedContext::from_fresh_entry()`].
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub struct SavedContext {
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rsp: u64,
}

const_assert_eq!(size_of::<SavedContext>(), 0x38);

impl SavedContext {
    pub const RBP: usize = offset_of!(Self, rbp);
    pub const RBX: usize = offset_of!(Self, rbx);
    pub const R12: usize = offset_of!(Self, r12);
    pub const R13: usize = offset_of!(Self, r13);
    pub const R14: usize = offset_of!(Self, r14);
    pub const R15: usize = offset_of!(Self, r15);
    pub const RSP: usize = offset_of!(Self, rsp);

    /// Bytes a fresh thread's stack top is filled with.
    pub const FRESH_FRAME_SIZE: usize = 2 * size_of::<u64>() + size_of::<IrqContext>();

    /// Context of the code path running right now.
    ///
    /// Holds nothing until the context switch saves into it.
    #[must_use]
    pub const fn running() -> Self {
        Self {
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: 0,
        }
    }

    /// Lays out a fresh thread's stack top and returns its context.
    ///
    /// The top of the thread's stack is the last 16-byte aligned address
    /// inside `stack`.
    ///
    /// # Panics
    ///
    /// Panics if `stack` cannot hold the initial frame.
    #[must_use]
    pub fn from_fresh_entry(stack: &mut [u8], entry: &FreshEntry) -> Self {
        let base = stack.as_ptr().addr() as u64;
        let top = (base + stack.len() as u64) & !0xf;
        let top_offset = top
            .checked_sub(base)
            .and_then(|o| usize::try_from(o).ok())
            .filter(|&o| o >= Self::FRESH_FRAME_SIZE);
        let Some(top_offset) = top_offset else {
            panic!("stack too small for a fresh thread");
        };

        let word = size_of::<u64>();
        let frame_offset = top_offset - word - size_of::<IrqContext>();
        let resume_offset = frame_offset - word;

        let frame = IrqContext {
            rip: entry.entry,
            cs: u64::from(entry.code_segment),
            rflags: DEFAULT_RFLAGS,
            rsp: top - word as u64,
            ss: u64::from(entry.stack_segment),
            ..IrqContext::poisoned()
        };

        let view = DataView::from_mut(stack);
        *view.get_mut::<u64>(top_offset - word) = entry.on_return;
        *view.get_mut::<IrqContext>(frame_offset) = frame;
        *view.get_mut::<u64>(resume_offset) = entry.resume;

        Self {
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rsp: base + resume_offset as u64,
        }
    }

    /// Saved stack pointer. Points at the resumption address.
    #[must_use]
    pub fn stack_pointer(&self) -> u64 {
        self.rsp
    }
}
