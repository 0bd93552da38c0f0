//! Kernel threads on top of the per-CPU MLFQ scheduler.
//!
//! Threads never leave the CPU that created them and never exit. A thread
//! only loses the CPU to the timer tick, so every switched-out thread sits
//! in the tick handler, and a fresh thread is built to look like one.

use alloc::{boxed::Box, vec};
use core::ptr::NonNull;

use arrayvec::ArrayString;
use irq_lock::IrqNesting;
use mlfq::{SchedConfig, Scheduler, Thread, ThreadId, Tick};
use stack_protocol::{FreshEntry, SavedContext};
use x86_64::instructions::{
    interrupts,
    segmentation::{CS, SS, Segment as _},
};

use crate::{
    cpu,
    interrupt::timer,
    param::{KSTACK_SIZE, THREAD_NAME_LEN},
};

#[cfg(feature = "sched-stats")]
mod stats;
mod switch;

pub type KThread = Thread<ThreadArch>;

/// Machine side of a kernel thread.
pub struct ThreadArch {
    /// Saved registers while the thread is off CPU.
    pub context: SavedContext,
    /// Lock nesting of this thread.
    pub irq: IrqNesting,
    name: ArrayString<THREAD_NAME_LEN>,
    /// `None` for the bootstrap CPU's first thread, which runs on the stack
    /// the bootloader gave it.
    _stack: Option<Box<[u8]>>,
}

impl ThreadArch {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Truncates `name` to fit, on a character boundary.
fn short_name(name: &str) -> ArrayString<THREAD_NAME_LEN> {
    let mut short = ArrayString::new();
    for c in name.chars() {
        if short.try_push(c).is_err() {
            break;
        }
    }
    short
}

/// Builds the descriptor of CPU `cpu_id`'s bootstrap thread.
///
/// `stack` is the stack that CPU starts on, if it came from the heap.
pub fn new_boot_thread(cpu_id: usize, stack: Option<Box<[u8]>>) -> Box<KThread> {
    let mut name = ArrayString::<THREAD_NAME_LEN>::new();
    let _ = core::fmt::write(&mut name, format_args!("boot{cpu_id}"));
    Box::new(Thread::new(ThreadArch {
        context: SavedContext::running(),
        irq: IrqNesting::new(),
        name,
        _stack: stack,
    }))
}

/// Turns the code path running on this CPU into its bootstrap thread and
/// sets up the CPU's scheduler around it.
///
/// Secondary CPUs adopt the descriptor the bootstrap CPU left in their
/// per-CPU slot; the bootstrap CPU builds its own.
///
/// Must be called once per CPU, before its timer starts ticking, with no
/// spin lock held.
pub fn init_this_cpu_as_schedulable() {
    interrupts::without_interrupts(|| {
        let cpu = cpu::current();
        assert_eq!(
            cpu.boot_nesting().depth(),
            0,
            "CPU#{} holds a lock while becoming schedulable",
            cpu.id()
        );

        let bootstrap = cpu
            .boot_thread()
            .take()
            .unwrap_or_else(|| new_boot_thread(cpu.id(), None));

        let sched = unsafe { cpu.install_scheduler(Scheduler::new(bootstrap, SchedConfig::default())) };
        cpu.set_current(NonNull::from(sched.current_mut()));
        let bootstrap = sched.current();
        log::debug!(
            "schedulable, bootstrap thread {} ({})",
            bootstrap.id(),
            bootstrap.arch().name()
        );
    });
}

/// Creates a kernel thread running `entry` and queues it on this CPU.
///
/// The thread starts with interrupts enabled.
///
/// # Panics
///
/// Panics if this CPU has not been made schedulable.
pub fn create_kernel_thread(name: &str, entry: extern "C" fn() -> !) -> ThreadId {
    let mut stack = vec![0; KSTACK_SIZE].into_boxed_slice();
    let context = SavedContext::from_fresh_entry(
        &mut stack,
        &FreshEntry {
            entry: entry as usize as u64,
            on_return: kthread_returned as usize as u64,
            resume: timer::irq_return_addr(),
            code_segment: CS::get_reg().0,
            stack_segment: SS::get_reg().0,
        },
    );
    let thread = Box::new(Thread::new(ThreadArch {
        context,
        irq: IrqNesting::new(),
        name: short_name(name),
        _stack: Some(stack),
    }));
    let id = thread.id();

    interrupts::without_interrupts(|| {
        let cpu = cpu::current();
        let Some(sched) = (unsafe { cpu.scheduler() }) else {
            panic!("CPU#{} is not schedulable", cpu.id());
        };
        sched.enqueue_new_or_woken(thread);
    });
    log::debug!("created thread {id} ({name})");
    id
}

/// Where an entry routine would return to.
extern "C" fn kthread_returned() -> ! {
    panic!("kernel thread returned from its entry routine");
}

/// Runs the scheduler for one timer tick, switching threads if it says so.
///
/// Called from the timer interrupt, with interrupts disabled.
pub fn tick() {
    let cpu = cpu::current();
    let Some(sched) = (unsafe { cpu.scheduler() }) else {
        return;
    };
    let tick = sched.tick();

    #[cfg(feature = "sched-stats")]
    stats::report_if_due(cpu.id(), sched);

    let Tick::Switch(decided) = tick else {
        return;
    };

    #[cfg(feature = "sched-trace")]
    {
        let next = unsafe { decided.next().as_ref() };
        log::trace!(
            "switch {} -> {} ({}) prio={} from={}",
            decided.prev_id(),
            decided.next_id(),
            next.arch().name(),
            decided.priority(),
            decided.source(),
        );
    }

    let prev = unsafe { Thread::arch_ptr(decided.prev()) }.as_ptr();
    let next = unsafe { Thread::arch_ptr(decided.next()) }.as_ptr();
    cpu.set_current(decided.next());
    unsafe {
        switch::switch(&raw mut (*prev).context, &raw const (*next).context);
    }
}

#[cfg(feature = "self-test")]
pub fn current_name() -> ArrayString<THREAD_NAME_LEN> {
    interrupts::without_interrupts(|| {
        let cpu = cpu::current();
        unsafe { cpu.scheduler() }.map_or_else(ArrayString::new, |sched| {
            short_name(sched.current().arch().name())
        })
    })
}
