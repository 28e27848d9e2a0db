// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! HTTP/1.0 and HTTP/1.1 for the tern server: request parsing on the way in
//! and response assembly on the way out. Keep-alive negotiation follows the
//! usual rules: 1.1 connections persist unless a `Connection: close` header
//! says otherwise, 1.0 connections close unless `Connection: keep-alive`
//! asks to persist.

#[macro_use]
extern crate thiserror;

mod error;
mod request;
mod response;

pub use crate::error::Error;
pub use crate::request::{Headers, ParseOutcome, Request, RequestParser, Version};
pub use crate::response::{Response, ResponseBuilder};

pub type Result<T> = std::result::Result<T, Error>;
