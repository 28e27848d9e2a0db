// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! URL dispatch: the ordered mapping from (virtual host, path) to
//! components. Rules come from `MapUrl` and `VMapUrl` configuration
//! entries; `$1`..`$9` in a rule's component name and path-info substitute
//! the capture groups of its pattern. Resolved candidate lists are memoized
//! per (host, path) up to a configured cap.

use crate::ConfigError;
use config::{ConfigFile, ServerOptions};
use protocol_common::{Compose, Execute};
use protocol_http::{ParseOutcome, Request, Response};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// What a matched mapping resolves to for one request.
pub struct Target {
    pub component: String,
    pub path_info: Option<String>,
    pub args: Vec<String>,
}

/// A page or application component. Returning `None` declines the request,
/// letting the next candidate mapping run; when every candidate declines
/// the dispatcher answers 404.
pub trait Component: Send + Sync {
    fn handle(&self, request: &Request, target: &Target) -> Option<Response>;
}

struct Mapping {
    vhost: Option<String>,
    pattern: Regex,
    component: String,
    path_info: Option<String>,
    args: Vec<String>,
}

pub struct Dispatcher {
    mappings: Vec<Mapping>,
    components: HashMap<String, Arc<dyn Component>>,
    cache: Mutex<HashMap<(Option<String>, String), Vec<usize>>>,
    cache_limit: usize,
}

impl Dispatcher {
    pub fn new(cache_limit: usize) -> Self {
        Self {
            mappings: Vec::new(),
            components: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            cache_limit,
        }
    }

    /// Build the dispatcher from `MapUrl`/`VMapUrl` entries, with the
    /// built-in components registered.
    pub fn from_config(config: &ConfigFile, options: &ServerOptions) -> Result<Self, ConfigError> {
        let mut dispatcher = Self::new(options.max_url_map_cache);

        dispatcher.register(
            "info",
            Arc::new(crate::InfoComponent::new(&options.default_content_type)),
        );

        for entry in config.entries_for("MapUrl") {
            if entry.params.len() < 2 {
                return Err(ConfigError::BadArity {
                    key: "MapUrl".into(),
                    got: entry.params.len(),
                });
            }
            dispatcher.add_mapping(
                None,
                &entry.params[0],
                &entry.params[1],
                entry.params.get(2).map(String::as_str),
                entry.params.get(3..).unwrap_or_default().to_vec(),
            )?;
        }

        for entry in config.entries_for("VMapUrl") {
            if entry.params.len() < 3 {
                return Err(ConfigError::BadArity {
                    key: "VMapUrl".into(),
                    got: entry.params.len(),
                });
            }
            dispatcher.add_mapping(
                Some(&entry.params[0]),
                &entry.params[1],
                &entry.params[2],
                entry.params.get(3).map(String::as_str),
                entry.params.get(4..).unwrap_or_default().to_vec(),
            )?;
        }

        Ok(dispatcher)
    }

    /// Append a mapping rule. Rules match in insertion order.
    pub fn add_mapping(
        &mut self,
        vhost: Option<&str>,
        pattern: &str,
        component: &str,
        path_info: Option<&str>,
        args: Vec<String>,
    ) -> Result<(), ConfigError> {
        let pattern = Regex::new(pattern).map_err(|_| ConfigError::BadValue {
            key: "MapUrl".into(),
            value: pattern.to_owned(),
        })?;

        self.mappings.push(Mapping {
            vhost: vhost.map(|v| v.to_ascii_lowercase()),
            pattern,
            component: component.to_owned(),
            path_info: path_info.map(|p| p.to_owned()),
            args,
        });
        Ok(())
    }

    pub fn register(&mut self, name: &str, component: Arc<dyn Component>) {
        self.components.insert(name.to_owned(), component);
    }

    /// Indexes of the mappings matching `(host, path)`, in rule order.
    fn candidates(&self, host: &Option<String>, path: &str) -> Vec<usize> {
        let key = (host.clone(), path.to_owned());

        if let Some(hit) = self.cache_lock().get(&key) {
            return hit.clone();
        }

        let matches: Vec<usize> = self
            .mappings
            .iter()
            .enumerate()
            .filter(|(_, mapping)| match (&mapping.vhost, host) {
                (None, _) => mapping.pattern.is_match(path),
                (Some(vhost), Some(host)) => vhost == host && mapping.pattern.is_match(path),
                (Some(_), None) => false,
            })
            .map(|(index, _)| index)
            .collect();

        let mut cache = self.cache_lock();
        if cache.len() >= self.cache_limit {
            debug!("url map cache reached {} entries; clearing", cache.len());
            cache.clear();
        }
        cache.insert(key, matches.clone());

        matches
    }

    fn dispatch(&self, request: &Request) -> Response {
        let host = request.host();

        for index in self.candidates(&host, &request.path) {
            let mapping = &self.mappings[index];

            // matched above, so captures are available
            let captures = match mapping.pattern.captures(&request.path) {
                Some(captures) => captures,
                None => continue,
            };

            let target = Target {
                component: substitute(&mapping.component, &captures),
                path_info: mapping.path_info.as_deref().map(|p| substitute(p, &captures)),
                args: mapping.args.clone(),
            };

            let component = match self.components.get(&target.component) {
                Some(component) => component,
                None => {
                    warn!("no component registered as \"{}\"", target.component);
                    continue;
                }
            };

            if let Some(response) = component.handle(request, &target) {
                return response;
            }
        }

        Response::builder(404)
            .header("Content-Type", b"text/plain")
            .body(format!("no component answers {}\n", request.path).as_bytes())
    }

    fn cache_lock(&self) -> MutexGuard<'_, HashMap<(Option<String>, String), Vec<usize>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Execute<ParseOutcome, Response> for Dispatcher {
    fn execute(&self, outcome: &ParseOutcome) -> Response {
        match &outcome.0 {
            Ok(request) => {
                let mut response = self.dispatch(request);
                if !request.keep_alive() {
                    response.hangup();
                }
                response
            }
            Err(e) => {
                debug!("bad request: {}", e);
                e.to_response()
            }
        }
    }
}

/// Replace `$1`..`$9` in `template` with capture groups.
fn substitute(template: &str, captures: &regex::Captures) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                chars.next();
                if let Some(group) = captures.get(digit as usize) {
                    out.push_str(group.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }

    out
}
