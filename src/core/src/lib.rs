// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The serving core of the tern application server.
//!
//! Listener threads accept connections and enqueue them as [`Job`]s on a
//! bounded blocking queue. Worker threads consume jobs, run one
//! request/reply cycle through the protocol seam traits, and either close
//! the connection or park it with the keep-alive poller, which returns it
//! to the queue when more bytes arrive. A supervisor grows the worker pool
//! between the configured bounds whenever a producer finds every worker
//! busy, and a once-per-second timer drives housekeeping and the shutdown
//! fanout.

#[macro_use]
extern crate log;

mod job;
mod listener;
mod poller;
mod server;
mod timer;
mod worker;
mod workers;

pub use job::Job;
pub use server::{Handle, Server, ServerBuilder};
pub use workers::WorkerSet;

pub(crate) const THREAD_PREFIX: &str = "tern";

/// Periodic housekeeping hook for the session scope holder. The core calls
/// `check_session_timeout` once per second from the timer thread.
pub trait SessionSweeper: Send + Sync {
    fn check_session_timeout(&self);
}
