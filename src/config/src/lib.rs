// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Configuration for the tern server.
//!
//! The file format is an ordered multi-map: one entry per line, a key
//! followed by whitespace-separated parameters. The same key may appear any
//! number of times and entry order is preserved, which matters for keys such
//! as `MapUrl` where earlier entries take precedence. `#` starts a comment,
//! double quotes group a parameter containing whitespace, backslash escapes
//! the next character (a backslash at end of line continues the entry), and
//! `include <file>` splices another file in place.

#[macro_use]
extern crate log;

mod file;
mod options;

pub use file::{ConfigEntry, ConfigFile};
pub use options::{ListenSpec, ServerOptions, TlsSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: &'static str },
    #[error("too many include levels (limit {0})")]
    IncludeDepth(usize),
    #[error("invalid value \"{value}\" for {key}")]
    BadValue { key: String, value: String },
    #[error("invalid number of parameters ({got}) in {key}")]
    BadArity { key: String, got: usize },
    #[error("{0}")]
    Invalid(String),
}
