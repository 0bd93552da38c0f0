#![no_std]

/// Maximum number of CPUs.
pub const NCPU: usize = 32;

/// Timer interrupts per second.
pub const HZ: u32 = 250;

/// Length of a scheduling slice, in ticks.
pub const RR_INTERVAL: u32 = 2;

/// Lowest thread priority. Dispatched last.
pub const MIN_PRIO: u8 = 0;

/// Highest thread priority.
pub const MAX_PRIO: u8 = 19;

/// Priority of new threads and of each CPU's bootstrap thread.
pub const DEFAULT_PRIO: u8 = 10;

/// Number of priority levels.
pub const PRIO_LEVELS: usize = (MAX_PRIO - MIN_PRIO) as usize + 1;

/// Size of a kernel thread stack.
pub const KSTACK_SIZE: usize = 16 * 1024;

/// Size of the kernel heap arena.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Maximum length of a kernel thread name.
pub const THREAD_NAME_LEN: usize = 16;

/// Delivery-status polls before an IPI counts as not acknowledged.
pub const IPI_ACK_POLLS: u32 = 100;

/// Delay between two delivery-status polls, in milliseconds.
pub const IPI_ACK_POLL_INTERVAL_MS: u32 = 1;

/// Settle time between INIT and the first SIPI, in milliseconds.
pub const INIT_SETTLE_MS: u32 = 10;

/// SIPI sends per secondary CPU before bring-up fails.
pub const SIPI_ATTEMPTS: u32 = 3;

/// Time a started CPU has to report itself alive, in milliseconds.
pub const ALIVE_TIMEOUT_MS: u32 = 1000;

/// Ticks between two scheduler statistics reports.
pub const SCHED_STATS_INTERVAL: u64 = HZ as u64;

/// Vector of the periodic scheduler tick.
pub const TICKS_IRQ_VECTOR: u8 = 0x20;

/// Vector of the IPI that halts a CPU after a panic elsewhere.
pub const HALT_CPU_IPI_VECTOR: u8 = 0xf1;

/// Local APIC spurious interrupt vector.
pub const SPURIOUS_VECTOR: u8 = 0xff;

/// Physical address the secondary CPUs start executing at.
///
/// Must be 4KiB aligned and inside `[SIPI_START_MIN, SIPI_START_MAX]`.
pub const SMPBOOT_START: u32 = 0x1_0000;

/// Lowest physical address a SIPI may point at.
pub const SIPI_START_MIN: u32 = 0x1_0000;

/// Highest physical address a SIPI may point at.
pub const SIPI_START_MAX: u32 = 0x9_0000;

/// Physical address of the parameter block read by the trampoline.
pub const SMPBOOT_PARAMS: u32 = SMPBOOT_START + 0x1000;

/// Physical address of the temporary page tables used by the trampoline.
///
/// Three consecutive pages: PML4, PDPT and PD.
pub const SMPBOOT_PAGE_TABLES: u32 = SMPBOOT_START + 0x2000;

/// End of the low memory window used by the bring-up trampoline.
pub const SMPBOOT_END: u32 = SMPBOOT_PAGE_TABLES + 0x3000;
