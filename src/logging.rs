//! Colored, timestamped logging setup, adapted from `CANSocket`'s
//! `setup_logging` in the teacher crate into a standalone initializer any
//! binary built on this crate can call once at startup.

use colored::Colorize;
use fern::colors::{Color, ColoredLevelConfig};

/// Installs a `fern` dispatcher that writes level-colored, timestamped log
/// lines to stdout. Safe to call more than once; later calls are no-ops
/// once a global logger is already set.
pub fn init() {
    let colors_line = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::White)
        .debug(Color::Green)
        .trace(Color::Blue);

    let _ = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}{}[{}][{}] {}",
                format_args!("\x1B[{}m", colors_line.get_color(&record.level()).to_fg_str()),
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(std::io::stdout())
        .apply();
}

/// Formats a bare string with the same level coloring `init()` uses, for
/// callers that print directly instead of going through `log`.
pub fn colorize(level: log::Level, text: &str) -> colored::ColoredString {
    match level {
        log::Level::Error => text.red(),
        log::Level::Warn => text.yellow(),
        log::Level::Info => text.white(),
        log::Level::Debug => text.green(),
        log::Level::Trace => text.blue(),
    }
}
