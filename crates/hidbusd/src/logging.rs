// Colorized wrappers for logging

use colored::Colorize;
use fern::Dispatch;
use log::{Level, SetLoggerError};

#[inline(always)]
pub(crate) fn format_log(message: &str) -> String {
    let now = chrono::Local::now().format("%Y.%m.%d %H:%M:%S").to_string();
    format!("[{now}] {message}")
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        let message = $crate::logging::format_log(&format!($($arg)*));
        log::error!("{}", message.bright_red());
    }
}

#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        let message = $crate::logging::format_log(&format!($($arg)*));
        log::info!("{message}");
    }
}

#[macro_export]
macro_rules! print_debug {
    ($($arg:tt)*) => {
        let message = $crate::logging::format_log(&format!($($arg)*));
        log::debug!("{}", message.dimmed());
    }
}

#[macro_export]
macro_rules! print_warning {
    ($($arg:tt)*) => {
        let message = $crate::logging::format_log(&format!($($arg)*));
        log::warn!("{}", message.bright_yellow());
    }
}

fn level_tag(level: Level) -> String {
    let tag = format!("{level:<5}");
    match level {
        Level::Error => tag.bright_red().to_string(),
        Level::Warn => tag.bright_yellow().to_string(),
        Level::Info => tag.green().to_string(),
        Level::Debug | Level::Trace => tag.dimmed().to_string(),
    }
}

/// Setup the logger. Library records get a timestamp and level tag, the
/// daemon's own macros format themselves.
pub fn setup(verbose: bool, no_color: bool) -> Result<(), SetLoggerError> {
    if no_color {
        colored::control::set_override(false);
    }

    let log_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let library_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    Dispatch::new()
        .format(|out, message, record| {
            if record.target().starts_with("hidbusd") {
                out.finish(format_args!("{message}"));
            } else {
                let line = format!("{} {}: {message}", level_tag(record.level()), record.target());
                out.finish(format_args!("{}", format_log(&line)));
            }
        })
        .level(log::LevelFilter::Error)
        .level_for("hidbus", library_level)
        .level_for("hidbus_report", library_level)
        .level_for("hidbusd", log_level)
        .chain(std::io::stdout())
        .apply()
}
