// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

use socket2::{Domain, Protocol, Socket, Type};
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

/// One bound listening socket, optionally wrapping accepted connections in
/// TLS. The socket is non-blocking; `accept` waits for readiness with a
/// bounded timeout so the owning thread can observe the stop flag between
/// accepts.
pub struct Listener {
    inner: std::net::TcpListener,
    acceptor: Option<Arc<TlsTcpAcceptor>>,
    local: SocketAddr,
}

impl Listener {
    /// Bind to `ip:port` with the given listen backlog. Transient bind
    /// failures (typically an address still in TIME_WAIT) are retried up to
    /// `retry` times with exponential backoff before giving up.
    pub fn bind(ip: &str, port: u16, backlog: i32, retry: usize) -> Result<Self> {
        let addr = (ip, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(ErrorKind::Other, "listen address did not resolve"))?;

        let mut backoff = Duration::from_millis(100);
        let mut attempt = 0usize;
        let inner = loop {
            match bind_socket(addr, backlog) {
                Ok(listener) => break listener,
                Err(e) => {
                    attempt += 1;
                    if attempt > retry {
                        error!("cannot bind {}: {}", addr, e);
                        return Err(e);
                    }
                    warn!(
                        "bind {} failed ({}); retry {}/{} in {:?}",
                        addr, e, attempt, retry, backoff
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        };

        inner.set_nonblocking(true)?;
        let local = inner.local_addr()?;

        Ok(Self {
            inner,
            acceptor: None,
            local,
        })
    }

    /// Terminate TLS on every connection accepted by this listener.
    pub fn with_tls(mut self, acceptor: Arc<TlsTcpAcceptor>) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    pub fn is_tls(&self) -> bool {
        self.acceptor.is_some()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Accept one connection, waiting up to `wait` for one to arrive. For a
    /// TLS listener the handshake runs inline, bounded by
    /// `handshake_timeout`. Returns `ErrorKind::TimedOut` when no connection
    /// arrived within the bound.
    pub fn accept(&self, wait: Timeout, handshake_timeout: Timeout) -> Result<Stream> {
        wait_ready(self.inner.as_raw_fd(), Readiness::Readable, wait)?;

        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    trace!("accepted connection from {}", peer);
                    return match &self.acceptor {
                        Some(acceptor) => acceptor
                            .accept(stream, handshake_timeout)
                            .map(Stream::from),
                        None => TcpStream::new(stream).map(Stream::from),
                    };
                }
                Err(e) => match e.kind() {
                    // readiness can be stale; report it as an expired wait
                    ErrorKind::WouldBlock => return Err(Error::from(ErrorKind::TimedOut)),
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }
    }
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn accept_times_out_when_idle() {
        let listener = Listener::bind("127.0.0.1", 0, 16, 0).unwrap();
        let err = listener
            .accept(Timeout::Millis(50), Timeout::Indefinite)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn accepts_a_connection() {
        let listener = Listener::bind("127.0.0.1", 0, 16, 0).unwrap();
        let addr = listener.local_addr();

        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();

        let mut stream = listener
            .accept(Timeout::Millis(1000), Timeout::Indefinite)
            .unwrap();
        stream.set_timeout(Timeout::Millis(1000));

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn bind_reports_unresolvable_address() {
        assert!(Listener::bind("definitely-not-a-real-host.invalid", 80, 16, 0).is_err());
    }
}
