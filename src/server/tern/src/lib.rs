// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! tern: a multi-threaded HTTP/HTTPS application server.
//!
//! This crate wires the serving core to the HTTP protocol component, the
//! URL dispatcher, and the session scope manager, and provides the `tern`
//! binary.

#[macro_use]
extern crate log;

mod dispatch;
mod scope;

pub use config::{ConfigError, ConfigFile, ServerOptions};
pub use dispatch::{Component, Dispatcher, Target};
pub use protocol_http::{Request, Response};
pub use scope::ScopeManager;
pub use tern_core::Handle;

use protocol_http::{ParseOutcome, RequestParser};
use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;
use tern_core::{Server, ServerBuilder};

/// The concrete server type: the generic core specialized to HTTP.
pub type HttpServer = Server<RequestParser, ParseOutcome, Response, Dispatcher>;

/// Start a server from a parsed configuration file: resolve options, build
/// the dispatcher from the `MapUrl`/`VMapUrl` entries, and launch the core.
pub fn start(config: &ConfigFile) -> Result<HttpServer> {
    let options = ServerOptions::resolve(config).map_err(config_error)?;
    let dispatcher = Dispatcher::from_config(config, &options).map_err(config_error)?;
    start_with(options, dispatcher)
}

/// Start a server with an explicitly assembled dispatcher, for embedders
/// that register their own components.
pub fn start_with(options: ServerOptions, dispatcher: Dispatcher) -> Result<HttpServer> {
    let parser = RequestParser::new(options.max_request_size);
    let scopes = Arc::new(ScopeManager::new(options.session_timeout));

    ServerBuilder::new(options, parser, dispatcher)
        .sweeper(scopes)
        .spawn()
}

/// Load the configuration, start the server, and block until shutdown.
/// Configuration and startup failures terminate the process with a
/// non-zero exit.
pub fn run(config_file: Option<String>) {
    let config = match config_file {
        Some(file) => match ConfigFile::load(&file) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => ConfigFile::default(),
    };

    match start(&config) {
        Ok(server) => server.wait(),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn config_error(e: ConfigError) -> Error {
    Error::new(ErrorKind::InvalidInput, e.to_string())
}

/// Built-in diagnostic component, registered as `info`. Serves a fixed page
/// identifying the server.
pub struct InfoComponent {
    content_type: String,
}

impl InfoComponent {
    pub fn new(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_owned(),
        }
    }
}

impl Component for InfoComponent {
    fn handle(&self, _request: &Request, _target: &Target) -> Option<Response> {
        let body = format!(
            "<html><head><title>tern</title></head>\
             <body><h1>tern {}</h1><p>it works</p></body></html>\n",
            env!("CARGO_PKG_VERSION")
        );

        Some(
            Response::builder(200)
                .header("Content-Type", self.content_type.as_bytes())
                .body(body.as_bytes()),
        )
    }
}
