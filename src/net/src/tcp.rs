// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

/// A plaintext connection with blocking-with-timeout semantics. The
/// underlying socket is non-blocking; operations which would block wait for
/// readiness up to the stream's [`Timeout`].
pub struct TcpStream {
    inner: std::net::TcpStream,
    timeout: Timeout,
}

impl TcpStream {
    /// Wrap an accepted or connected socket. The socket is switched to
    /// non-blocking mode; the initial timeout is indefinite until the owner
    /// sets an operation-specific bound.
    pub fn new(inner: std::net::TcpStream) -> Result<Self> {
        inner.set_nonblocking(true)?;
        Ok(Self {
            inner,
            timeout: Timeout::Indefinite,
        })
    }

    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.peer_addr()
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        wait_ready(self.as_raw_fd(), Readiness::Readable, self.timeout)?;
                    }
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.inner.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        wait_ready(self.as_raw_fd(), Readiness::Writable, self.timeout)?;
                    }
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

impl std::fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}
