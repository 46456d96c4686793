use cfg_if::cfg_if;

#[cfg(feature = "logger")]
struct Logger;

#[cfg(feature = "logger")]
impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        use std::io::Write;

        if self.enabled(record.metadata()) {
            let level = match record.level() {
                log::Level::Error => "\x1b[1m\x1b[31m[!]\x1b[0m",
                log::Level::Warn => "\x1b[1m\x1b[33m[-]\x1b[0m",
                log::Level::Info => "\x1b[1m\x1b[32m[*]\x1b[0m",
                log::Level::Debug => "\x1b[1m\x1b[34m[#]\x1b[0m",
                log::Level::Trace => "\x1b[1m[~]\x1b[0m",
            };

            let _ = writeln!(std::io::stderr().lock(), "{} {}", level, record.args());
        }
    }

    fn flush(&self) {}
}

/// Initialize the logger. This function should be called before any other
/// logging function, and is a no-op if the `logger` feature is disabled or
/// another logger was already installed by the host.
pub fn setup() {
    cfg_if!(
        if #[cfg(feature = "logger")] {
            if log::set_logger(&Logger).is_ok() {
                log::set_max_level(log::LevelFilter::Debug);
            }
        }
    );
}
