// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::job::Job;
use crate::poller::PollerHandle;
use crate::workers::WorkerSet;
use crate::SessionSweeper;
use common::Shutdown;
use queue::BoundedQueue;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(1);

/// Once-per-second housekeeping: sweep expired session scopes, run the
/// request-time watchdog, and on shutdown fan the stop signal out to every
/// primitive something might be blocked on.
pub(crate) struct Timer {
    pub queue: Arc<BoundedQueue<Job>>,
    pub workers: Arc<WorkerSet>,
    pub poller: PollerHandle,
    pub sweeper: Option<Arc<dyn SessionSweeper>>,
    pub shutdown: Shutdown,
    pub max_request_time: Duration,
}

impl Timer {
    pub(crate) fn run(self) {
        while !self.shutdown.is_set() {
            std::thread::sleep(TICK);
            if self.shutdown.is_set() {
                break;
            }

            if let Some(sweeper) = &self.sweeper {
                sweeper.check_session_timeout();
            }

            // a request over its time budget is fatal for the process, but
            // through the orderly shutdown path rather than an abort
            if let Some(id) = self.workers.watchdog(self.max_request_time) {
                error!(
                    "worker {} exceeded the request time budget; shutting down",
                    id
                );
                self.shutdown.set();
            }
        }

        // shutdown fanout: unblock the supervisor, blocked consumers, and
        // the poller so each can observe the flag immediately
        self.queue.signal_no_idle();
        self.queue.release_consumers();
        self.poller.wake();

        info!("timer stopped");
    }
}
