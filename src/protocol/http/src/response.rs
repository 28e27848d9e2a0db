// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use arrayvec::ArrayVec;
use phf::{phf_map, Map};
use protocol_common::Compose;
use std::io::Write;

pub struct Response {
    builder: ResponseBuilder,
    body: Option<Vec<u8>>,
}

impl Response {
    pub fn builder(status: u16) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    pub fn status(&self) -> u16 {
        self.builder.status
    }
}

pub struct ResponseBuilder {
    status: u16,
    head: Vec<u8>,
    close: bool,
}

impl ResponseBuilder {
    pub fn new(status: u16) -> Self {
        let mut head = Vec::with_capacity(1024);
        write!(
            &mut head,
            "HTTP/1.1 {} {}\r\n",
            status,
            STATUSES.get(&status).copied().unwrap_or("")
        )
        .unwrap();

        Self {
            status,
            head,
            close: false,
        }
    }

    pub fn header(&mut self, key: &str, value: &[u8]) -> &mut Self {
        self.head.extend_from_slice(key.as_bytes());
        self.head.extend_from_slice(b": ");
        self.head.extend_from_slice(value);
        self.head.extend_from_slice(b"\r\n");
        self
    }

    /// Mark the connection for closing once this reply is flushed.
    pub fn should_close(&mut self, close: bool) -> &mut Self {
        self.close = close;
        self
    }

    /// Build a response with no body.
    pub fn empty(&mut self) -> Response {
        Response {
            builder: self.take(),
            body: None,
        }
    }

    /// Build a response carrying `body`; a Content-Length header is added
    /// when the response is composed.
    pub fn body(&mut self, body: &[u8]) -> Response {
        Response {
            builder: self.take(),
            body: Some(body.to_owned()),
        }
    }

    fn take(&mut self) -> Self {
        Self {
            status: self.status,
            head: std::mem::take(&mut self.head),
            close: self.close,
        }
    }
}

impl Compose for Response {
    fn compose(&self, dst: &mut Vec<u8>) -> usize {
        let start = dst.len();

        dst.extend_from_slice(&self.builder.head);

        if self.builder.close {
            dst.extend_from_slice(b"Connection: close\r\n");
        } else {
            dst.extend_from_slice(b"Connection: keep-alive\r\n");
        }

        let body = self.body.as_deref().unwrap_or(b"");
        let mut length = ArrayVec::<u8, 24>::new();
        write!(&mut length, "{}", body.len()).unwrap();
        dst.extend_from_slice(b"Content-Length: ");
        dst.extend_from_slice(&length);
        dst.extend_from_slice(b"\r\n\r\n");
        dst.extend_from_slice(body);

        dst.len() - start
    }

    fn hangup(&mut self) {
        self.builder.close = true;
    }

    fn should_hangup(&self) -> bool {
        self.builder.close
    }
}

static STATUSES: Map<u16, &'static str> = phf_map! {
    100u16 => "Continue",
    101u16 => "Switching Protocols",

    200u16 => "OK",
    201u16 => "Created",
    202u16 => "Accepted",
    204u16 => "No Content",
    206u16 => "Partial Content",

    301u16 => "Moved Permanently",
    302u16 => "Found",
    303u16 => "See Other",
    304u16 => "Not Modified",
    307u16 => "Temporary Redirect",
    308u16 => "Permanent Redirect",

    400u16 => "Bad Request",
    401u16 => "Unauthorized",
    403u16 => "Forbidden",
    404u16 => "Not Found",
    405u16 => "Method Not Allowed",
    406u16 => "Not Acceptable",
    408u16 => "Request Timeout",
    409u16 => "Conflict",
    410u16 => "Gone",
    411u16 => "Length Required",
    412u16 => "Precondition Failed",
    413u16 => "Payload Too Large",
    414u16 => "URI Too Long",
    415u16 => "Unsupported Media Type",
    416u16 => "Range Not Satisfiable",
    426u16 => "Upgrade Required",
    429u16 => "Too Many Requests",

    500u16 => "Internal Server Error",
    501u16 => "Not Implemented",
    502u16 => "Bad Gateway",
    503u16 => "Service Unavailable",
    504u16 => "Gateway Timeout",
    505u16 => "HTTP Version Not Supported",
};
