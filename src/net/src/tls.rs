// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! TLS-over-TCP with the same blocking-with-timeout surface as the
//! plaintext stream.
//!
//! Every call into the TLS library is serialized through one process-wide
//! mutex. The library's own locking has not proven sufficient under heavy
//! thread churn, so the serialization is explicit and part of the design.
//! The guard is dropped across the `poll(2)` readiness wait and reacquired
//! before the retry, so a peer that stalls mid-handshake or mid-record does
//! not hold up TLS work on every other connection.

use crate::*;

use openssl::error::ErrorStack;
use openssl::ssl::{
    ErrorCode, HandshakeError, Ssl, SslAcceptor, SslContext, SslFiletype, SslMethod, SslStream,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static TLS_LOCK: Mutex<()> = Mutex::new(());

fn tls_lock() -> MutexGuard<'static, ()> {
    TLS_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// A structured TLS failure: the library's reason code plus its message.
#[derive(Debug, thiserror::Error)]
#[error("tls error {code}: {message}")]
pub struct TlsError {
    pub code: i32,
    pub message: String,
}

impl TlsError {
    fn from_ssl(e: &openssl::ssl::Error) -> Self {
        Self {
            code: e.code().as_raw(),
            message: e.to_string(),
        }
    }

    fn from_stack(e: ErrorStack) -> Self {
        Self {
            code: 0,
            message: e.to_string(),
        }
    }
}

fn tls_failure(e: &openssl::ssl::Error) -> Error {
    Error::new(ErrorKind::Other, TlsError::from_ssl(e))
}

fn tls_setup_failure(e: ErrorStack) -> Error {
    Error::new(ErrorKind::Other, TlsError::from_stack(e))
}

/// A negotiated TLS connection. Reads and writes drive the TLS state
/// machine: when the library wants socket readiness the call waits, bounded
/// by the stream's [`Timeout`], then retries.
pub struct TlsTcpStream {
    inner: SslStream<std::net::TcpStream>,
    timeout: Timeout,
}

impl TlsTcpStream {
    fn new(inner: SslStream<std::net::TcpStream>, timeout: Timeout) -> Self {
        Self { inner, timeout }
    }

    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.inner.get_ref().peer_addr()
    }
}

impl AsRawFd for TlsTcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.get_ref().as_raw_fd()
    }
}

impl Read for TlsTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fd = self.as_raw_fd();
        loop {
            let guard = tls_lock();
            let result = self.inner.ssl_read(buf);
            match result {
                Ok(n) => return Ok(n),
                Err(e) => match e.code() {
                    ErrorCode::ZERO_RETURN => return Ok(0),
                    ErrorCode::WANT_READ => {
                        drop(guard);
                        wait_ready(fd, Readiness::Readable, self.timeout)?;
                    }
                    // renegotiation may want to write during a read; wait
                    // for either readiness
                    ErrorCode::WANT_WRITE => {
                        drop(guard);
                        wait_ready(fd, Readiness::Both, self.timeout)?;
                    }
                    _ => {
                        return Err(match e.into_io_error() {
                            Ok(io) => io,
                            Err(e) => tls_failure(&e),
                        })
                    }
                },
            }
        }
    }
}

impl Write for TlsTcpStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let fd = self.as_raw_fd();
        loop {
            let guard = tls_lock();
            let result = self.inner.ssl_write(buf);
            match result {
                Ok(n) => return Ok(n),
                Err(e) => match e.code() {
                    ErrorCode::WANT_WRITE => {
                        drop(guard);
                        wait_ready(fd, Readiness::Writable, self.timeout)?;
                    }
                    ErrorCode::WANT_READ => {
                        drop(guard);
                        wait_ready(fd, Readiness::Both, self.timeout)?;
                    }
                    _ => {
                        return Err(match e.into_io_error() {
                            Ok(io) => io,
                            Err(e) => tls_failure(&e),
                        })
                    }
                },
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let _guard = tls_lock();
        self.inner.get_mut().flush()
    }
}

impl std::fmt::Debug for TlsTcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (tls)", self.inner.get_ref())
    }
}

/// Server-side TLS context shared by every connection accepted on one
/// listener: certificate, private key, and protocol settings. Immutable
/// once built.
pub struct TlsTcpAcceptor {
    context: SslContext,
}

impl TlsTcpAcceptor {
    pub fn builder() -> Result<TlsTcpAcceptorBuilder> {
        let inner = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())
            .map_err(tls_setup_failure)?;

        Ok(TlsTcpAcceptorBuilder {
            inner,
            certificate_file: None,
            private_key_file: None,
        })
    }

    /// Perform the server-side handshake on an accepted socket, bounded by
    /// `timeout`. On failure the socket is dropped without further writes.
    pub fn accept(&self, stream: std::net::TcpStream, timeout: Timeout) -> Result<TlsTcpStream> {
        stream.set_nonblocking(true)?;

        let ssl = Ssl::new(&self.context).map_err(tls_setup_failure)?;

        let mut guard = tls_lock();
        let mut mid = match ssl.accept(stream) {
            Ok(negotiated) => return Ok(TlsTcpStream::new(negotiated, timeout)),
            Err(HandshakeError::WouldBlock(mid)) => mid,
            Err(HandshakeError::Failure(mid)) => {
                debug!("tls handshake failed: {}", mid.error());
                return Err(tls_failure(mid.error()));
            }
            Err(HandshakeError::SetupFailure(stack)) => return Err(tls_setup_failure(stack)),
        };

        loop {
            let readiness = match mid.error().code() {
                ErrorCode::WANT_READ => Readiness::Readable,
                ErrorCode::WANT_WRITE => Readiness::Writable,
                _ => return Err(tls_failure(mid.error())),
            };
            let fd = mid.get_ref().as_raw_fd();

            drop(guard);
            wait_ready(fd, readiness, timeout)?;
            guard = tls_lock();

            match mid.handshake() {
                Ok(negotiated) => return Ok(TlsTcpStream::new(negotiated, timeout)),
                Err(HandshakeError::WouldBlock(m)) => mid = m,
                Err(HandshakeError::Failure(m)) => {
                    debug!("tls handshake failed: {}", m.error());
                    return Err(tls_failure(m.error()));
                }
                Err(HandshakeError::SetupFailure(stack)) => return Err(tls_setup_failure(stack)),
            }
        }
    }
}

/// Builder collecting certificate material before constructing the shared
/// context. The certificate file may contain the complete chain; when no
/// separate key file is configured the certificate file must also hold the
/// private key.
pub struct TlsTcpAcceptorBuilder {
    inner: openssl::ssl::SslAcceptorBuilder,
    certificate_file: Option<PathBuf>,
    private_key_file: Option<PathBuf>,
}

impl TlsTcpAcceptorBuilder {
    pub fn certificate_chain_file<P: AsRef<Path>>(mut self, file: P) -> Self {
        self.certificate_file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn private_key_file<P: AsRef<Path>>(mut self, file: P) -> Self {
        self.private_key_file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn build(mut self) -> Result<TlsTcpAcceptor> {
        let certificate = self.certificate_file.ok_or_else(|| {
            Error::new(ErrorKind::Other, "no certificate chain file provided")
        })?;
        let key = self.private_key_file.unwrap_or_else(|| certificate.clone());

        self.inner
            .set_certificate_chain_file(&certificate)
            .map_err(tls_setup_failure)?;
        self.inner
            .set_private_key_file(&key, SslFiletype::PEM)
            .map_err(tls_setup_failure)?;
        self.inner.check_private_key().map_err(tls_setup_failure)?;

        Ok(TlsTcpAcceptor {
            context: self.inner.build().into_context(),
        })
    }
}
