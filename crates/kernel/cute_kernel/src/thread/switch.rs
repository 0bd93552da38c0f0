use core::arch::naked_asm;

use stack_protocol::SavedContext;

/// Saves current registers in `old`, loads from `new`.
///
/// Returns into whatever `new`'s stack pointer points at: the tick handler
/// of a switched-out thread, or the interrupt return of a fresh one.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(old: *mut SavedContext, new: *const SavedContext) {
    naked_asm!(
        "mov [rdi + {c_rbp}], rbp",
        "mov [rdi + {c_rbx}], rbx",
        "mov [rdi + {c_r12}], r12",
        "mov [rdi + {c_r13}], r13",
        "mov [rdi + {c_r14}], r14",
        "mov [rdi + {c_r15}], r15",
        "mov [rdi + {c_rsp}], rsp",
        "mov rbp, [rsi + {c_rbp}]",
        "mov rbx, [rsi + {c_rbx}]",
        "mov r12, [rsi + {c_r12}]",
        "mov r13, [rsi + {c_r13}]",
        "mov r14, [rsi + {c_r14}]",
        "mov r15, [rsi + {c_r15}]",
        "mov rsp, [rsi + {c_rsp}]",
        "ret",
        c_rbp = const SavedContext::RBP,
        c_rbx = const SavedContext::RBX,
        c_r12 = const SavedContext::R12,
        c_r13 = const SavedContext::R13,
        c_r14 = const SavedContext::R14,
        c_r15 = const SavedContext::R15,
        c_rsp = const SavedContext::RSP,
    )
}
