//! A [`log`] front-end for kernels that have no logger of their own yet.
//!
//! The allocator itself only talks to the `log` facade, this module just
//! makes those records visible through whatever output the kernel has.

use core::fmt;
use spin::Mutex;

/// Function that receives every formatted log line.
pub type Sink = fn(fmt::Arguments<'_>);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

struct Logger;

impl log::Log for Logger {
    #[allow(unused_variables)]
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        #[cfg(any(debug_assertions, feature = "logging"))]
        return true;
        #[cfg(all(not(debug_assertions), not(feature = "logging")))]
        return metadata.level() <= log::Level::Info;
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mod_path = record
            .module_path_static()
            .or_else(|| record.module_path())
            .unwrap_or("<n/a>");

        let sink = *SINK.lock();
        if let Some(sink) = sink {
            sink(format_args!(
                "[ {:>5} ] [{}] {}\n",
                record.level(),
                mod_path,
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

/// Install the logger, sending every line to `sink`.
///
/// Fails if any logger was installed before.
pub fn init(sink: Sink) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    *SINK.lock() = Some(sink);
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
