use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    NONE,
    INFO,
    DEBUG,
}

impl LogLevel {
    fn to_string(&self) -> &str {
        match self {
            LogLevel::NONE => "NONE",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
        }
    }
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::NONE,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::NONE,
    }
}

/// Output sink for simulation reports. One instance per run, handed to every
/// component that prints.
pub struct Logger {
    level: LogLevel,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Logger {
    pub fn new(ulevel: u64) -> Self {
        Self::with_sink(ulevel, Box::new(io::stdout()))
    }

    pub fn to_file(ulevel: u64, path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create log file {}", path.display()))?;
        Ok(Self::with_sink(ulevel, Box::new(BufWriter::new(file))))
    }

    pub fn with_sink(ulevel: u64, sink: Box<dyn Write + Send>) -> Self {
        Logger {
            level: to_loglevel(ulevel),
            sink: Mutex::new(sink),
        }
    }

    pub fn silent() -> Self {
        Self::with_sink(0, Box::new(io::sink()))
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.level && self.level != LogLevel::NONE
    }

    pub fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "[{}] {}", level.to_string(), args);
        }
    }

    pub fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

#[macro_export]
macro_rules! log {
    // usage: log!(logger, "a {} event", "clock")
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        $logger.log($level, format_args!($($arg)+));
    }};
}
#[macro_export]
macro_rules! info {
    ($logger:expr, $($arg:tt)+) => ( $crate::log!($logger, $crate::sim::log::LogLevel::INFO, $($arg)+); )
}
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($arg:tt)+) => ( $crate::log!($logger, $crate::sim::log::LogLevel::DEBUG, $($arg)+); )
}
