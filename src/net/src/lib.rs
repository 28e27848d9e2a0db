// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Connection handling for the tern server.
//!
//! Streams here look blocking to the caller but are non-blocking
//! underneath: every read and write first attempts the operation and, on
//! `WouldBlock`, waits for readiness with `poll(2)` bounded by the stream's
//! [`Timeout`]. This keeps one slow peer from pinning a thread forever and,
//! for TLS, lets the process-wide TLS lock drop while a thread waits for the
//! socket (see [`tls`]).

#[macro_use]
extern crate log;

mod listener;
mod tcp;
mod timeout;
mod tls;

pub use listener::Listener;
pub use tcp::TcpStream;
pub use timeout::Timeout;
pub use tls::{TlsError, TlsTcpAcceptor, TlsTcpAcceptorBuilder, TlsTcpStream};

use std::io::{Error, ErrorKind, Read, Result, Write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

/// The readiness a suspended operation is waiting for.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Readiness {
    Readable,
    Writable,
    Both,
}

/// Wait for `fd` to become ready, bounded by `timeout`. Returns
/// `ErrorKind::TimedOut` when the bound expires, which callers surface as
/// the distinguished timeout error.
pub(crate) fn wait_ready(fd: RawFd, readiness: Readiness, timeout: Timeout) -> Result<()> {
    if matches!(timeout, Timeout::Immediate) {
        return Err(Error::from(ErrorKind::TimedOut));
    }

    let events = match readiness {
        Readiness::Readable => libc::POLLIN,
        Readiness::Writable => libc::POLLOUT,
        Readiness::Both => libc::POLLIN | libc::POLLOUT,
    };

    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout.poll_timeout()) };
        if rc < 0 {
            let e = Error::last_os_error();
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        if rc == 0 {
            return Err(Error::from(ErrorKind::TimedOut));
        }
        // POLLERR/POLLHUP fall through: the retried operation reports the
        // actual condition (an error or a zero-length read)
        return Ok(());
    }
}

/// A wrapper type that unifies plaintext TCP and TLS over TCP so that the
/// rest of the server can hold connections of either kind in one place and
/// select between them through configuration.
pub struct Stream {
    inner: StreamType,
}

// dispatch through enum variants rather than a trait object: there are only
// two variants and the set is closed
enum StreamType {
    Tcp(TcpStream),
    TlsTcp(TlsTcpStream),
}

impl Stream {
    pub fn set_timeout(&mut self, timeout: Timeout) {
        match &mut self.inner {
            StreamType::Tcp(s) => s.set_timeout(timeout),
            StreamType::TlsTcp(s) => s.set_timeout(timeout),
        }
    }

    pub fn timeout(&self) -> Timeout {
        match &self.inner {
            StreamType::Tcp(s) => s.timeout(),
            StreamType::TlsTcp(s) => s.timeout(),
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            StreamType::Tcp(s) => s.peer_addr(),
            StreamType::TlsTcp(s) => s.peer_addr(),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            StreamType::Tcp(s) => s.as_raw_fd(),
            StreamType::TlsTcp(s) => s.as_raw_fd(),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(other: TcpStream) -> Self {
        Self {
            inner: StreamType::Tcp(other),
        }
    }
}

impl From<TlsTcpStream> for Stream {
    fn from(other: TlsTcpStream) -> Self {
        Self {
            inner: StreamType::TlsTcp(other),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.read(buf),
            StreamType::TlsTcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.write(buf),
            StreamType::TlsTcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.flush(),
            StreamType::TlsTcp(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            StreamType::Tcp(s) => write!(f, "{:?}", s),
            StreamType::TlsTcp(s) => write!(f, "{:?}", s),
        }
    }
}
