//! `log` facade wiring (SPEC_FULL "Ambient stack: Logging"), grounded in the
//! teacher's `utils/logger.rs` (`CluuLogger`): a `log::Log` impl that writes
//! every record to the architecture's serial port. Kernel code logs task
//! lifecycle events, allocator OOM, and integrity-check failures at
//! `warn`/`error`, and routine scheduling decisions at `trace`, matching the
//! level split SPEC_FULL calls for.
//!
//! Unlike the teacher, which filters at `Level::Info` unconditionally, this
//! logger's max level is configurable via [`init`] so a debug build can ask
//! for `trace`-level scheduler chatter without a recompile.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        #[cfg(target_arch = "x86_64")]
        {
            let mut writer = crate::arch::x86_64::peripheral::uart_16550::SerialWriter;
            let _ = writeln!(writer, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs [`KernelLogger`] as the global `log` sink and sets the max
/// level. Must be called exactly once, before any other subsystem logs
/// (`gdt::init`, `idt::init`, `quanta_kernel::init`, ...). Panics if a
/// logger was already installed — a second call is always a programming
/// error at boot, not a recoverable condition.
pub fn init(level: LevelFilter) {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .expect("logger already initialized");
    log::info!("logger: initialized at level {:?}", level);
}

/// Convenience for boot code that wants the default verbosity
/// (`Level::Info`), mirroring the teacher's `logger::init(true)` call site.
pub fn init_default() {
    init(LevelFilter::Info);
}
