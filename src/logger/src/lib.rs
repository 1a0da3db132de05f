// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A small logging backend behind the `log` facade. Writes to stderr or to
//! a file, depending on the debug config section. `configure_logging`
//! installs the global logger and hands back a `Drain` which the process
//! flushes on shutdown.

pub use log::{debug, error, info, trace, warn, Level, LevelFilter};

use config::DebugConfig;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log an unrecoverable error and terminate the process.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        log::logger().flush();
        std::process::exit(1);
    }};
}

pub trait Drain: Send {
    /// Flush any buffered log output.
    fn flush(&mut self);
}

enum Target {
    Stderr,
    File(Mutex<File>),
}

struct Logger {
    level: LevelFilter,
    target: Target,
}

impl Logger {
    fn write_line(&self, record: &log::Record) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let line = format!(
            "{}.{:06} {} [{}] {}\n",
            now.as_secs(),
            now.subsec_micros(),
            record.level(),
            record.target(),
            record.args()
        );
        match &self.target {
            Target::Stderr => {
                let _ = std::io::stderr().write_all(line.as_bytes());
            }
            Target::File(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
        }
    }
}

impl log::Log for LogHandle {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.inner.level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.inner.write_line(record);
        }
    }

    fn flush(&self) {
        if let Target::File(file) = &self.inner.target {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

#[derive(Clone)]
pub struct LogHandle {
    inner: Arc<Logger>,
}

impl Drain for LogHandle {
    fn flush(&mut self) {
        log::Log::flush(self);
    }
}

/// Install the global logger according to the debug config section. Returns
/// a drain which should be flushed before the process exits. Installing a
/// second time is a no-op which still returns a usable drain.
pub fn configure_logging<T: DebugConfig>(config: &T) -> Box<dyn Drain> {
    let debug = config.debug();

    let target = match debug.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| {
                    eprintln!("could not open log file {}: {}", path, e);
                    std::process::exit(1);
                });
            Target::File(Mutex::new(file))
        }
        None => Target::Stderr,
    };

    let handle = LogHandle {
        inner: Arc::new(Logger {
            level: debug.log_level(),
            target,
        }),
    };

    log::set_max_level(debug.log_level());
    let _ = log::set_boxed_logger(Box::new(handle.clone()));

    Box::new(handle)
}
