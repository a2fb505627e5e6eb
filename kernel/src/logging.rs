//! Log backend of the kernel. Records are written to a [`Console`] with a
//! colored marker giving their level. Messages printed by user processes
//! use the `user` target and are written without marker.
use core::fmt::Write;

/// Where log messages end up, usually a serial port or the screen.
pub trait Console: Sync {
    fn write(&self, message: &str);
}

struct Logger {
    console: &'static dyn Console,
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut writer = Writer(self.console);
        if record.target() == "user" {
            _ = write!(writer, "{}", record.args());
            return;
        }
        let level = match record.level() {
            log::Level::Error => "\x1B[1m\x1b[31m[!]\x1b[0m",
            log::Level::Warn => "\x1B[1m\x1b[33m[-]\x1b[0m",
            log::Level::Info => "\x1B[1m\x1b[32m[*]\x1b[0m",
            log::Level::Debug => "\x1B[1m\x1b[34m[#]\x1b[0m",
            log::Level::Trace => "\x1B[1m\x1b[35m[~]\x1b[0m",
        };
        _ = writeln!(writer, "{} {}", level, record.args());
    }

    fn flush(&self) {}
}

struct Writer(&'static dyn Console);

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.write(s);
        Ok(())
    }
}

static LOGGER: spin::Once<Logger> = spin::Once::new();

/// Setup the logging subsystem. All log submitted to the logging subsystem
/// will be ignored until this function is called.
///
/// # Errors
/// Returns an error if a logger was already installed.
pub fn setup(console: &'static dyn Console) -> Result<(), log::SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { console });
    log::set_logger(logger)?;
    log::set_max_level(log::LevelFilter::Info);
    log::trace!("Logger initialized");
    Ok(())
}
