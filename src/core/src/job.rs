// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use net::Stream;
use std::io::{Read, Result};
use std::os::unix::io::{AsRawFd, RawFd};

/// One client connection and its in-flight request state: the unit of work
/// that moves between the queue, a worker, and the keep-alive poller. A job
/// is owned by exactly one of those at any instant and the connection
/// closes when the job is dropped.
pub struct Job {
    stream: Stream,
    buffer: Vec<u8>,
    keep_alive_remaining: usize,
}

impl Job {
    pub(crate) fn new(stream: Stream, keep_alive_max: usize) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            keep_alive_remaining: keep_alive_max,
        }
    }

    /// Read up to `chunk` more bytes from the connection into the request
    /// buffer. `Ok(0)` means the peer closed the connection.
    pub(crate) fn fill(&mut self, chunk: usize) -> Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + chunk, 0);

        match self.stream.read(&mut self.buffer[start..]) {
            Ok(n) => {
                self.buffer.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop the first `n` buffered bytes; bytes beyond them belong to the
    /// next pipelined request.
    pub(crate) fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
    }

    pub(crate) fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Whether the connection's reuse budget allows another request.
    pub(crate) fn may_keep_alive(&self) -> bool {
        self.keep_alive_remaining > 0
    }

    pub(crate) fn note_reuse(&mut self) {
        self.keep_alive_remaining = self.keep_alive_remaining.saturating_sub(1);
    }
}

impl AsRawFd for Job {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::{TcpStream, Timeout};
    use std::io::Write;

    fn job_pair(keep_alive_max: usize) -> (std::net::TcpStream, Job) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let mut stream = Stream::from(TcpStream::new(accepted).unwrap());
        stream.set_timeout(Timeout::Millis(1000));
        (client, Job::new(stream, keep_alive_max))
    }

    #[test]
    fn fill_appends_and_consume_drains() {
        let (mut client, mut job) = job_pair(1);

        client.write_all(b"abcdef").unwrap();
        assert_eq!(job.fill(4096).unwrap(), 6);
        assert_eq!(job.buffer(), b"abcdef");

        job.consume(4);
        assert_eq!(job.buffer(), b"ef");

        client.write_all(b"gh").unwrap();
        job.fill(4096).unwrap();
        assert_eq!(job.buffer(), b"efgh");
    }

    #[test]
    fn keep_alive_budget_counts_down() {
        let (_client, mut job) = job_pair(2);

        assert!(job.may_keep_alive());
        job.note_reuse();
        assert!(job.may_keep_alive());
        job.note_reuse();
        assert!(!job.may_keep_alive());
    }
}
