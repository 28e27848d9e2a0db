// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop flag. Initialized clear, set exactly once, never
/// cleared. Every run loop in the server checks it at each iteration of its
/// bounded wait, so a `set()` is observed everywhere within one wait period.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_sticky_and_idempotent() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_set());

        shutdown.set();
        assert!(shutdown.is_set());

        // repeated calls are a no-op
        shutdown.set();
        assert!(shutdown.is_set());
    }

    #[test]
    fn clones_share_state() {
        let a = Shutdown::new();
        let b = a.clone();

        a.set();
        assert!(b.is_set());
    }
}
