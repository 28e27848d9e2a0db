// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::time::Duration;

/// Bound on a single stream operation.
///
/// `Indefinite` waits for readiness forever, `Immediate` fails with
/// `ErrorKind::TimedOut` if the operation is not ready right now, and
/// `Millis` waits up to the given number of milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Indefinite,
    Immediate,
    Millis(u64),
}

impl Timeout {
    /// The value handed to `poll(2)`.
    pub(crate) fn poll_timeout(&self) -> libc::c_int {
        match self {
            Timeout::Indefinite => -1,
            Timeout::Immediate => 0,
            Timeout::Millis(ms) => (*ms).min(libc::c_int::MAX as u64) as libc::c_int,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::Immediate
        } else {
            Timeout::Millis(d.as_millis().max(1) as u64)
        }
    }
}
