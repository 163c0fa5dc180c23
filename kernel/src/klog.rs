//! `log` crate facade wired to the kernel console.
//!
//! Subsystems use `log::{trace, debug, info, warn, error}` rather than
//! calling [`crate::kprintln`] directly, so verbosity can be filtered
//! uniformly at one boundary instead of sprinkling `#[cfg]`s through the
//! kernel.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level_tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::kprintln!(
            "[{level}] {target}: {args}",
            level = level_tag,
            target = record.target(),
            args = record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger as the global `log` backend.
///
/// Must be called once during early boot, after [`crate::print::init`] has
/// set up the console sink. Calling this twice is a programming error and
/// is reported (not panicked on) via the `log` crate's own `SetLoggerError`.
pub fn init(level: LevelFilter) {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .ok();
}
