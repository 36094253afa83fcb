//! File-based logging for conductor runs.
//!
//! The engine appends to `~/.conductor/conductor.log`: run lifecycle and
//! checkpoints at INFO, recoverable conditions (retries, timeouts, lost
//! workers) at WARN, dispatch decisions and store writes at DEBUG. Debug
//! output is off unless `CONDUCTOR_DEBUG=1` is set or `init_with_debug(true)`
//! is called; before `init` every log call is a no-op.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// Severity of a log line. Lines above the configured maximum are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }
}

/// Initialize logging to `~/.conductor/conductor.log`.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging, optionally forcing debug output.
///
/// `CONDUCTOR_DEBUG=1` (or `true`) in the environment enables debug output
/// as well. The log file is truncated per process.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("CONDUCTOR_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let max = if debug || env_debug {
        Level::Debug
    } else {
        Level::Info
    };
    MAX_LEVEL.store(max as u8, Ordering::SeqCst);

    if let Some(dir) = dirs::home_dir().map(|h| h.join(".conductor")) {
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("conductor.log");
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

/// Append one line at the given level.
///
/// Intended for the `clog*` macros rather than direct use. A no-op before
/// `init` or when the level is filtered out.
pub fn write_line(level: Level, msg: &str) {
    if (level as u8) > MAX_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    let path = match LOG_PATH.get() {
        Some(path) => path,
        None => return,
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.tag(), msg);
    }
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::write_line($crate::log::Level::Info, &format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::write_line($crate::log::Level::Error, &format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::write_line($crate::log::Level::Warn, &format!($($arg)*))
    };
}

/// Log macro for DEBUG level (filtered out unless debug mode is enabled).
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        $crate::log::write_line($crate::log::Level::Debug, &format!($($arg)*))
    };
}
