// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::job::Job;
use common::Shutdown;
use net::Timeout;
use queue::BoundedQueue;
use std::io::ErrorKind;
use std::sync::Arc;

// bound on one blocking accept so the stop flag is observed promptly
const ACCEPT_WAIT: Timeout = Timeout::Millis(500);

/// Accept loop for one listening endpoint. Each accepted connection is
/// wrapped in a job (the TLS handshake, if any, runs inline in the accept)
/// and handed to the queue; a full queue blocks the loop, which is the
/// backpressure path. On shutdown the thread exits and the listening socket
/// closes with it.
pub(crate) struct Listener {
    listener: net::Listener,
    queue: Arc<BoundedQueue<Job>>,
    shutdown: Shutdown,
    handshake_timeout: Timeout,
    keep_alive_max: usize,
}

impl Listener {
    pub(crate) fn new(
        listener: net::Listener,
        queue: Arc<BoundedQueue<Job>>,
        shutdown: Shutdown,
        handshake_timeout: Timeout,
        keep_alive_max: usize,
    ) -> Self {
        Self {
            listener,
            queue,
            shutdown,
            handshake_timeout,
            keep_alive_max,
        }
    }

    pub(crate) fn run(self) {
        let addr = self.listener.local_addr();

        while !self.shutdown.is_set() {
            match self.listener.accept(ACCEPT_WAIT, self.handshake_timeout) {
                Ok(stream) => {
                    self.queue.put(Job::new(stream, self.keep_alive_max));
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    // a failed handshake or a transient accept error affects
                    // one connection only
                    debug!("accept on {} failed: {}", addr, e);
                }
            }
        }

        info!("listener on {} stopped", addr);
    }
}
