//! Locks for kernel code.

use crate::cpu::X86Cpu;

pub type SpinLock<T> = irq_lock::SpinLock<T, X86Cpu>;
pub type SpinLockGuard<'a, T> = irq_lock::SpinLockGuard<'a, T, X86Cpu>;
