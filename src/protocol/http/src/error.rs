// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::Response;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to parse request")]
    Unparseable(#[from] httparse::Error),

    #[error("Content-Length header was invalid")]
    BadContentLength,

    #[error("unsupported HTTP version")]
    BadVersion,

    #[error("request exceeds the configured size limit of {0} bytes")]
    TooLarge(usize),

    /// Carries the number of additional bytes needed to complete the
    /// request, when known.
    #[error("not enough data present to parse the whole request")]
    PartialRequest(Option<usize>),
}

impl Error {
    /// The reply sent for a request that was framed well enough to answer.
    /// Every error reply closes the connection.
    pub fn to_response(&self) -> Response {
        match self {
            Self::Unparseable(e) => Response::builder(400)
                .should_close(true)
                .header("Content-Type", b"text/plain")
                .body(format!("unable to parse request: {}", e).as_bytes()),

            Self::BadContentLength => Response::builder(400)
                .should_close(true)
                .header("Content-Type", b"text/plain")
                .body(b"Content-Length header was invalid"),

            Self::BadVersion => Response::builder(505)
                .should_close(true)
                .header("Content-Type", b"text/plain")
                .body(b"only HTTP/1.0 and HTTP/1.1 are supported"),

            Self::TooLarge(limit) => Response::builder(413)
                .should_close(true)
                .header("Content-Type", b"text/plain")
                .body(format!("request exceeds the limit of {} bytes", limit).as_bytes()),

            // never dispatched; the caller reads more bytes instead
            Self::PartialRequest(_) => Response::builder(500)
                .should_close(true)
                .header("Content-Type", b"text/plain")
                .body(b"internal server error"),
        }
    }
}
