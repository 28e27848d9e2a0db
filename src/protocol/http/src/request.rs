// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{Error, Result};
use protocol_common::{Parse, ParseOk};

const MAX_HEADERS: usize = 64;

#[derive(Debug)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    fn from_httparse(headers: &[httparse::Header]) -> Self {
        Self(
            headers
                .iter()
                .map(|hdr| (hdr.name.to_owned(), hdr.value.to_owned()))
                .collect(),
        )
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, hdr: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(hdr))
            .map(|(_, value)| &**value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

#[derive(Debug)]
pub struct Request {
    pub method: String,
    /// Percent-decoded request path, without the query string.
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, hdr: &str) -> Option<&[u8]> {
        self.headers.header(hdr)
    }

    /// The `Host` header with any port stripped, lowercased for matching.
    pub fn host(&self) -> Option<String> {
        let raw = self.header("Host")?;
        let raw = std::str::from_utf8(raw).ok()?;
        let host = raw.rsplit_once(':').map(|(h, _)| h).unwrap_or(raw);
        Some(host.to_ascii_lowercase())
    }

    /// Whether the connection may be reused for another request after the
    /// reply, before the server's own keep-alive budget is considered.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .header("Connection")
            .map(|v| String::from_utf8_lossy(v).to_ascii_lowercase());

        match self.version {
            Version::Http11 => connection.as_deref() != Some("close"),
            Version::Http10 => connection.as_deref() == Some("keep-alive"),
        }
    }
}

/// What one parsing round produced: either a dispatchable request, or a
/// malformed request that is still answerable (with a 400-class reply). The
/// distinction between "unanswerable" and "need more bytes" stays on the
/// `io::Error` side of the [`Parse`] contract.
pub struct ParseOutcome(pub Result<Request>);

#[derive(Clone)]
pub struct RequestParser {
    /// Upper bound on the total request size in bytes; zero disables the
    /// check.
    max_request_size: usize,
}

impl RequestParser {
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }

    fn over_limit(&self, len: usize) -> bool {
        self.max_request_size > 0 && len > self.max_request_size
    }

    /// Try to cut one request from `buffer`. `Err(PartialRequest)` asks the
    /// caller for more bytes; other errors describe a malformed request.
    /// On success also returns the number of bytes consumed.
    pub fn do_parse(&self, buffer: &[u8]) -> Result<(Request, usize)> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);

        let head_len = match parsed.parse(buffer)? {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => {
                if self.over_limit(buffer.len()) {
                    return Err(Error::TooLarge(self.max_request_size));
                }
                return Err(Error::PartialRequest(None));
            }
        };

        let version = match parsed.version {
            Some(0) => Version::Http10,
            Some(1) => Version::Http11,
            _ => return Err(Error::BadVersion),
        };

        let headers = Headers::from_httparse(parsed.headers);

        let body_len = match headers.header("Content-Length") {
            Some(v) => std::str::from_utf8(v)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(Error::BadContentLength)?,
            None => 0,
        };

        let total = head_len + body_len;
        if self.over_limit(total) {
            return Err(Error::TooLarge(self.max_request_size));
        }
        if buffer.len() < total {
            return Err(Error::PartialRequest(Some(total - buffer.len())));
        }

        // path and method are guaranteed by a complete parse
        let method = parsed.method.unwrap_or_default().to_owned();
        let target = parsed.path.unwrap_or_default();

        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_owned())),
            None => (target, None),
        };
        let path =
            String::from_utf8_lossy(&urlencoding::decode_binary(raw_path.as_bytes())).into_owned();

        let request = Request {
            method,
            path,
            query,
            version,
            headers,
            body: buffer[head_len..total].to_vec(),
        };

        Ok((request, total))
    }
}

impl Parse<ParseOutcome> for RequestParser {
    fn parse(&self, buffer: &[u8]) -> std::io::Result<ParseOk<ParseOutcome>> {
        match self.do_parse(buffer) {
            Ok((request, consumed)) => Ok(ParseOk::new(ParseOutcome(Ok(request)), consumed)),
            Err(Error::PartialRequest(_)) => Err(std::io::ErrorKind::WouldBlock.into()),
            // a malformed request consumes the whole buffer: there is no
            // trustworthy frame boundary to resume from
            Err(e) => Ok(ParseOk::new(ParseOutcome(Err(e)), buffer.len())),
        }
    }
}
