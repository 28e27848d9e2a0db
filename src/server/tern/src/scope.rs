// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Session scopes: named bags of per-session values with an idle deadline.
//! The core's timer calls the sweep once per second; scopes untouched for
//! longer than their timeout are evicted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tern_core::SessionSweeper;

struct Scope {
    values: HashMap<String, String>,
    last_access: Instant,
    timeout: Duration,
}

pub struct ScopeManager {
    scopes: Mutex<HashMap<String, Scope>>,
    default_timeout: Duration,
}

impl ScopeManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Store a value in `scope`, creating the scope when absent. Access
    /// refreshes the scope's idle deadline.
    pub fn put(&self, scope: &str, key: &str, value: &str) {
        let mut scopes = self.lock();
        let scope = scopes
            .entry(scope.to_owned())
            .or_insert_with(|| Scope {
                values: HashMap::new(),
                last_access: Instant::now(),
                timeout: self.default_timeout,
            });
        scope.last_access = Instant::now();
        scope.values.insert(key.to_owned(), value.to_owned());
    }

    pub fn get(&self, scope: &str, key: &str) -> Option<String> {
        let mut scopes = self.lock();
        let scope = scopes.get_mut(scope)?;
        scope.last_access = Instant::now();
        scope.values.get(key).cloned()
    }

    /// Override the idle timeout of one scope.
    pub fn set_timeout(&self, scope: &str, timeout: Duration) {
        if let Some(scope) = self.lock().get_mut(scope) {
            scope.timeout = timeout;
        }
    }

    pub fn remove(&self, scope: &str) {
        self.lock().remove(scope);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Scope>> {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionSweeper for ScopeManager {
    fn check_session_timeout(&self) {
        let mut scopes = self.lock();
        let before = scopes.len();
        scopes.retain(|_, scope| scope.last_access.elapsed() < scope.timeout);

        let evicted = before - scopes.len();
        if evicted > 0 {
            debug!("evicted {} expired session scopes", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_round_trip() {
        let scopes = ScopeManager::new(Duration::from_secs(60));

        scopes.put("session-1", "user", "alex");
        assert_eq!(scopes.get("session-1", "user").as_deref(), Some("alex"));
        assert_eq!(scopes.get("session-1", "missing"), None);
        assert_eq!(scopes.get("session-2", "user"), None);
    }

    #[test]
    fn sweep_evicts_only_expired_scopes() {
        let scopes = ScopeManager::new(Duration::from_millis(50));

        scopes.put("short", "k", "v");
        scopes.put("long", "k", "v");
        scopes.set_timeout("long", Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(100));
        scopes.check_session_timeout();

        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes.get("long", "k").as_deref(), Some("v"));
    }

    #[test]
    fn access_refreshes_the_deadline() {
        let scopes = ScopeManager::new(Duration::from_millis(100));
        scopes.put("busy", "k", "v");

        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(50));
            assert!(scopes.get("busy", "k").is_some());
            scopes.check_session_timeout();
        }
        assert_eq!(scopes.len(), 1);
    }

    #[test]
    fn remove_is_immediate() {
        let scopes = ScopeManager::new(Duration::from_secs(60));
        scopes.put("gone", "k", "v");
        scopes.remove("gone");
        assert!(scopes.is_empty());
    }
}
