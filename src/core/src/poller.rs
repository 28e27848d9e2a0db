// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::job::Job;
use common::Shutdown;
use crossbeam_channel::{Receiver, Sender};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use queue::BoundedQueue;
use slab::Slab;
use std::io::Result;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAKER_TOKEN: Token = Token(usize::MAX);

// upper bound on one poll so the stop flag is observed promptly
const MAX_WAIT: Duration = Duration::from_millis(500);

const NEVENT: usize = 1024;

struct Parked {
    job: Job,
    expires: Instant,
}

/// Producer side of the poller: workers hand idle keep-alive jobs in
/// through a mailbox and wake the poller thread so the new descriptor joins
/// the next poll.
#[derive(Clone)]
pub struct PollerHandle {
    mailbox: Sender<Parked>,
    waker: Arc<Waker>,
}

impl PollerHandle {
    /// Park a job until its connection becomes readable or `keep_alive`
    /// elapses. Fails only when the poller has already shut down, in which
    /// case the job is dropped and the connection closes.
    pub(crate) fn park(&self, job: Job, keep_alive: Duration) -> std::result::Result<(), ()> {
        let parked = Parked {
            job,
            expires: Instant::now() + keep_alive,
        };

        self.mailbox.send(parked).map_err(|_| ())?;
        let _ = self.waker.wake();
        Ok(())
    }

    pub(crate) fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// The single thread multiplexing readiness across every parked keep-alive
/// connection. The registry has exactly one writer (this thread); parking
/// producers only touch the mailbox.
pub(crate) struct Poller {
    poll: Poll,
    parked: Slab<Parked>,
    mailbox: Receiver<Parked>,
    queue: Arc<BoundedQueue<Job>>,
    shutdown: Shutdown,
}

impl Poller {
    pub(crate) fn new(
        queue: Arc<BoundedQueue<Job>>,
        shutdown: Shutdown,
    ) -> Result<(Self, PollerHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = crossbeam_channel::unbounded();

        let poller = Self {
            poll,
            parked: Slab::new(),
            mailbox: rx,
            queue,
            shutdown,
        };

        let handle = PollerHandle { mailbox: tx, waker };

        Ok((poller, handle))
    }

    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(NEVENT);

        loop {
            let timeout = self.next_deadline().min(MAX_WAIT);
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() != std::io::ErrorKind::Interrupted {
                    error!("poller error: {}", e);
                }
            }

            if self.shutdown.is_set() {
                break;
            }

            // readable connections go back to the queue for a worker; a
            // full queue blocks here, which is backpressure by design
            for event in events.iter() {
                let token = event.token();
                if token == WAKER_TOKEN || !self.parked.contains(token.0) {
                    continue;
                }

                let parked = self.parked.remove(token.0);
                self.deregister(&parked.job);
                self.queue.put(parked.job);
            }

            self.expire();
            self.admit();
        }

        // close every parked connection and whatever is still in the mailbox
        let parked = self.parked.len();
        if parked > 0 {
            debug!("closing {} parked connections", parked);
        }
        for (_token, entry) in self.parked.iter() {
            self.deregister(&entry.job);
        }
        self.parked.clear();
        while self.mailbox.try_recv().is_ok() {}

        info!("poller stopped");
    }

    fn deregister(&self, job: &Job) {
        let fd = job.as_raw_fd();
        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
    }

    /// Drop connections whose keep-alive deadline passed without readiness.
    fn expire(&mut self) {
        let now = Instant::now();

        let expired: Vec<usize> = self
            .parked
            .iter()
            .filter(|(_, entry)| entry.expires <= now)
            .map(|(token, _)| token)
            .collect();

        for token in expired {
            let entry = self.parked.remove(token);
            self.deregister(&entry.job);
            trace!("closing keep-alive connection after idle timeout");
        }
    }

    /// Move newly parked jobs from the mailbox into the registry.
    fn admit(&mut self) {
        while let Ok(parked) = self.mailbox.try_recv() {
            let entry = self.parked.vacant_entry();
            let token = Token(entry.key());
            let fd = parked.job.as_raw_fd();

            match self
                .poll
                .registry()
                .register(&mut SourceFd(&fd), token, Interest::READABLE)
            {
                Ok(()) => {
                    entry.insert(parked);
                }
                Err(e) => {
                    // dropping the job closes the connection
                    warn!("cannot park connection: {}", e);
                }
            }
        }
    }

    fn next_deadline(&self) -> Duration {
        let now = Instant::now();
        self.parked
            .iter()
            .map(|(_, entry)| entry.expires.saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::{Stream, TcpStream, Timeout};
    use std::io::Write;

    fn connected_job() -> (std::net::TcpStream, Job) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let mut stream = Stream::from(TcpStream::new(accepted).unwrap());
        stream.set_timeout(Timeout::Millis(1000));
        (client, Job::new(stream, 8))
    }

    #[test]
    fn parked_job_returns_on_readiness() {
        let queue = Arc::new(BoundedQueue::new(8));
        let shutdown = Shutdown::new();
        let (poller, handle) = Poller::new(queue.clone(), shutdown.clone()).unwrap();
        let thread = std::thread::spawn(move || poller.run());

        let (mut client, job) = connected_job();
        handle.park(job, Duration::from_secs(30)).unwrap();

        // no readiness, no job
        assert!(queue.get_timeout(Duration::from_millis(200)).is_none());

        client.write_all(b"more").unwrap();
        let mut job = queue
            .get_timeout(Duration::from_secs(2))
            .expect("job did not come back from the poller");
        assert_eq!(job.fill(64).unwrap(), 4);
        assert_eq!(job.buffer(), b"more");

        shutdown.set();
        handle.wake();
        thread.join().unwrap();
    }

    #[test]
    fn expired_job_is_closed_not_requeued() {
        let queue: Arc<BoundedQueue<Job>> = Arc::new(BoundedQueue::new(8));
        let shutdown = Shutdown::new();
        let (poller, handle) = Poller::new(queue.clone(), shutdown.clone()).unwrap();
        let thread = std::thread::spawn(move || poller.run());

        let (client, job) = connected_job();
        handle.park(job, Duration::from_millis(100)).unwrap();

        // after expiry the server side is closed: the client sees EOF
        std::thread::sleep(Duration::from_millis(300));
        assert!(queue.is_empty());

        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 1];
        let n = std::io::Read::read(&mut &client, &mut buf).unwrap();
        assert_eq!(n, 0);

        shutdown.set();
        handle.wake();
        thread.join().unwrap();
    }

    #[test]
    fn shutdown_closes_parked_jobs() {
        let queue: Arc<BoundedQueue<Job>> = Arc::new(BoundedQueue::new(8));
        let shutdown = Shutdown::new();
        let (poller, handle) = Poller::new(queue.clone(), shutdown.clone()).unwrap();
        let thread = std::thread::spawn(move || poller.run());

        let (client, job) = connected_job();
        handle.park(job, Duration::from_secs(30)).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        shutdown.set();
        handle.wake();
        thread.join().unwrap();

        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 1];
        let n = std::io::Read::read(&mut &client, &mut buf).unwrap();
        assert_eq!(n, 0);
    }
}
