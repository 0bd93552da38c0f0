//! Formatted console output

use core::{
    fmt::{self, Write as _},
    mem,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    console, cpu, interrupt, smp,
    sync::{SpinLock, SpinLockGuard},
};

// lock to avoid interleaving concurrent print's.
struct Print {
    locking: AtomicBool,
    lock: SpinLock<()>,
}

static PRINT: Print = Print {
    locking: AtomicBool::new(true),
    lock: SpinLock::new(()),
};

impl Print {
    fn lock(&self) -> Writer {
        let guard = self
            .locking
            .load(Ordering::Relaxed)
            .then(|| self.lock.lock());
        Writer { _guard: guard }
    }
}

struct Writer<'a> {
    _guard: Option<SpinLockGuard<'a, ()>>,
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            console::put_char(c);
        }
        Ok(())
    }
}

pub fn _print(args: fmt::Arguments) {
    let mut writer = PRINT.lock();
    let _ = writer.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        #[expect(clippy::used_underscore_items)]
        $crate::console::print::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    static PANIC_LOCK: SpinLock<()> = SpinLock::new(());

    interrupt::disable();

    // only the first CPU to panic reports; the rest stop here. The lock is
    // never released.
    let Some(guard) = PANIC_LOCK.try_lock() else {
        cpu::halt_forever();
    };
    mem::forget(guard);

    smp::broadcast_halt();

    // the lock may be held by a CPU that was just halted.
    PRINT.locking.store(false, Ordering::Relaxed);
    match cpu::try_id() {
        Some(id) => println!("CPU#{id}-PANIC: {info}"),
        None => println!("CPU#?-PANIC: {info}"),
    }

    cpu::halt_forever();
}
