//! `log` records, printed to the console with the calling CPU's id.

use log::{LevelFilter, Log, Metadata, Record};

use crate::{cpu, println};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

const MAX_LEVEL: LevelFilter = if cfg!(feature = "sched-trace") {
    LevelFilter::Trace
} else if cfg!(feature = "log-debug") {
    LevelFilter::Debug
} else {
    LevelFilter::Info
};

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= MAX_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match cpu::try_id() {
            Some(id) => println!("CPU#{id} {:<5} {}", record.level(), record.args()),
            None => println!("CPU#? {:<5} {}", record.level(), record.args()),
        }
    }

    fn flush(&self) {}
}

pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(MAX_LEVEL);
    }
}
