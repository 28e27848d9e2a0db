// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::job::Job;
use crate::poller::PollerHandle;
use crate::workers::{WorkerSet, WorkerState};
use common::Shutdown;
use net::Timeout;
use protocol_common::{Compose, Execute, Parse};
use queue::BoundedQueue;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

// bound on one blocking dequeue so the stop flag is observed promptly
const IDLE_WAIT: Duration = Duration::from_millis(500);

// how long a worker must sit idle before it offers to retire
const IDLE_GRACE: Duration = Duration::from_secs(10);

/// Everything a worker thread needs, bundled so the supervisor can spawn
/// additional workers after startup.
pub(crate) struct WorkerContext<P, Req, Rsp, D> {
    pub parser: P,
    pub dispatcher: Arc<D>,
    pub queue: Arc<BoundedQueue<Job>>,
    pub poller: PollerHandle,
    pub shutdown: Shutdown,
    /// Set once every producer thread (listeners, poller) has exited, so a
    /// worker knows an empty queue is empty for good.
    pub producers_done: Shutdown,
    pub read_timeout: Timeout,
    pub write_timeout: Timeout,
    pub keep_alive_timeout: Duration,
    pub buffer_size: usize,
    pub _marker: PhantomData<fn() -> (Req, Rsp)>,
}

impl<P: Clone, Req, Rsp, D> Clone for WorkerContext<P, Req, Rsp, D> {
    fn clone(&self) -> Self {
        Self {
            parser: self.parser.clone(),
            dispatcher: self.dispatcher.clone(),
            queue: self.queue.clone(),
            poller: self.poller.clone(),
            shutdown: self.shutdown.clone(),
            producers_done: self.producers_done.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            keep_alive_timeout: self.keep_alive_timeout,
            buffer_size: self.buffer_size,
            _marker: PhantomData,
        }
    }
}

enum Disposition {
    Close,
    Park(Job),
}

/// A consumer thread: dequeue a job, run request/reply cycles on it, then
/// close the connection or park it for keep-alive reuse. Workers above the
/// pool minimum retire themselves after a grace period of idleness.
pub(crate) struct Worker<P, Req, Rsp, D> {
    pub id: usize,
    pub ctx: WorkerContext<P, Req, Rsp, D>,
    pub workers: Arc<WorkerSet>,
    pub state: Arc<WorkerState>,
}

impl<P, Req, Rsp, D> Worker<P, Req, Rsp, D>
where
    P: Parse<Req>,
    Rsp: Compose,
    D: Execute<Req, Rsp>,
{
    pub(crate) fn run(mut self) {
        let mut idle_since = Instant::now();

        loop {
            // after the stop flag, keep consuming until every producer has
            // exited and the queue is drained: a last job can arrive behind
            // our observation of the flag and must not be dropped
            if self.ctx.shutdown.is_set()
                && self.ctx.producers_done.is_set()
                && self.ctx.queue.is_empty()
            {
                break;
            }

            match self.ctx.queue.get_timeout(IDLE_WAIT) {
                Some(job) => {
                    self.state.set_busy();
                    let disposition = self.process(job);
                    self.state.set_idle();

                    if let Disposition::Park(job) = disposition {
                        let keep_alive = self.ctx.keep_alive_timeout;
                        // a send failure means the poller is gone and the
                        // dropped job closes the connection
                        let _ = self.ctx.poller.park(job, keep_alive);
                    }

                    idle_since = Instant::now();
                }
                None => {
                    if !self.ctx.shutdown.is_set()
                        && idle_since.elapsed() >= IDLE_GRACE
                        && self.workers.try_retire(self.id)
                    {
                        debug!("worker {} retired after idle grace period", self.id);
                        return;
                    }
                }
            }
        }

        self.workers.exited(self.id);
    }

    /// Serve requests on one connection until it has no complete buffered
    /// request left, then decide between closing and parking. Pipelined
    /// requests already in the buffer are served back to back; readiness
    /// for anything beyond them is the poller's business.
    fn process(&mut self, mut job: Job) -> Disposition {
        loop {
            job.stream_mut().set_timeout(self.ctx.read_timeout);

            let request = loop {
                if !job.buffer().is_empty() {
                    match self.ctx.parser.parse(job.buffer()) {
                        Ok(parsed) => {
                            let consumed = parsed.consumed();
                            let request = parsed.into_inner();
                            job.consume(consumed);
                            break request;
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(e) => {
                            warn!("closing connection: {}", e);
                            return Disposition::Close;
                        }
                    }
                }

                match job.fill(self.ctx.buffer_size) {
                    Ok(0) => return Disposition::Close,
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::TimedOut => {
                        debug!("request read timed out");
                        return Disposition::Close;
                    }
                    Err(e) => {
                        warn!("request read failed: {}", e);
                        return Disposition::Close;
                    }
                }
            };

            let mut response = self.ctx.dispatcher.execute(&request);

            // whatever the reply says about the connection must match what
            // happens to it: fold the server-side reuse budget into the
            // reply before it is composed
            if !job.may_keep_alive() || self.ctx.shutdown.is_set() {
                response.hangup();
            }

            let mut out = Vec::with_capacity(self.ctx.buffer_size);
            response.compose(&mut out);

            job.stream_mut().set_timeout(self.ctx.write_timeout);
            if let Err(e) = job.stream_mut().write_all(&out) {
                if e.kind() == ErrorKind::TimedOut {
                    debug!("reply write timed out");
                } else {
                    warn!("reply write failed: {}", e);
                }
                return Disposition::Close;
            }

            if response.should_hangup() || self.ctx.shutdown.is_set() {
                return Disposition::Close;
            }
            job.note_reuse();

            if !job.buffer().is_empty() {
                continue;
            }

            // a TLS stream may hold already-decrypted bytes the descriptor
            // will never report readiness for; probe before parking
            job.stream_mut().set_timeout(Timeout::Immediate);
            match job.fill(self.ctx.buffer_size) {
                Ok(0) => return Disposition::Close,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Disposition::Park(job);
                }
                Err(e) => {
                    warn!("connection probe failed: {}", e);
                    return Disposition::Close;
                }
            }
        }
    }
}
