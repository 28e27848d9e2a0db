// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A small backend for the `log` facade. Messages are written to stderr with
//! a unix timestamp, the level, and an optional label identifying the
//! process.

pub use log::Level;
use log::{Log, Metadata, Record, SetLoggerError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Builder-style logger in the usual shape:
///
/// ```
/// use logger::{Level, Logger};
///
/// Logger::new()
///     .label("tern")
///     .level(Level::Info)
///     .init()
///     .expect("failed to initialize logger");
/// ```
pub struct Logger {
    label: Option<String>,
    level: Level,
}

impl Logger {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            label: None,
            level: Level::Info,
        }
    }

    /// Set a label which prefixes every message, typically the binary name.
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    /// Set the maximum level which will be logged.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Register this logger as the global backend for the `log` facade.
    pub fn init(self) -> Result<(), SetLoggerError> {
        log::set_max_level(self.level.to_level_filter());
        log::set_boxed_logger(Box::new(self))
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        match &self.label {
            Some(label) => eprintln!(
                "{}.{:03} {} [{}] {}",
                now.as_secs(),
                now.subsec_millis(),
                record.level(),
                label,
                record.args()
            ),
            None => eprintln!(
                "{}.{:03} {} {}",
                now.as_secs(),
                now.subsec_millis(),
                record.level(),
                record.args()
            ),
        }
    }

    fn flush(&self) {}
}
