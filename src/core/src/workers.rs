// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Per-worker bookkeeping consulted by the watchdog: when the worker
/// started its current request, if it is processing one.
pub(crate) struct WorkerState {
    busy_since: Mutex<Option<Instant>>,
}

impl WorkerState {
    pub(crate) fn new() -> Self {
        Self {
            busy_since: Mutex::new(None),
        }
    }

    pub(crate) fn set_busy(&self) {
        *self.lock() = Some(Instant::now());
    }

    pub(crate) fn set_idle(&self) {
        *self.lock() = None;
    }

    fn busy_elapsed(&self) -> Option<Duration> {
        self.lock().map(|since| since.elapsed())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        self.busy_since.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Inner {
    handles: HashMap<usize, JoinHandle<()>>,
    states: HashMap<usize, Arc<WorkerState>>,
}

/// The set of live workers. Ids are assigned monotonically; the live count
/// is kept in an atomic for cheap reads but only changes under the set's
/// lock so that retirement can never race the count below `min_threads`.
pub struct WorkerSet {
    inner: Mutex<Inner>,
    live: AtomicUsize,
    next_id: AtomicUsize,
    min_threads: usize,
}

impl WorkerSet {
    pub(crate) fn new(min_threads: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                handles: HashMap::new(),
                states: HashMap::new(),
            }),
            live: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0),
            min_threads,
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn adopt(&self, id: usize, state: Arc<WorkerState>) {
        let mut inner = self.lock();
        inner.states.insert(id, state);
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn attach(&self, id: usize, handle: JoinHandle<()>) {
        self.lock().handles.insert(id, handle);
    }

    /// Undo an `adopt` for a worker whose thread never started.
    pub(crate) fn abort(&self, id: usize) {
        let mut inner = self.lock();
        inner.states.remove(&id);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// An idle worker asking to retire. Granted only while the pool stays
    /// at or above its minimum size; on success the worker is removed from
    /// the set and its thread detaches.
    pub(crate) fn try_retire(&self, id: usize) -> bool {
        let mut inner = self.lock();

        if self.live.load(Ordering::Relaxed) <= self.min_threads {
            return false;
        }

        inner.handles.remove(&id);
        inner.states.remove(&id);
        self.live.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// A worker leaving on the shutdown path. Its handle stays behind for
    /// the final join.
    pub(crate) fn exited(&self, id: usize) {
        let mut inner = self.lock();
        inner.states.remove(&id);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Find a worker that has been processing one request for longer than
    /// `budget`, if any.
    pub(crate) fn watchdog(&self, budget: Duration) -> Option<usize> {
        let inner = self.lock();
        inner
            .states
            .iter()
            .find(|(_, state)| matches!(state.busy_elapsed(), Some(elapsed) if elapsed > budget))
            .map(|(id, _)| *id)
    }

    pub(crate) fn take_handles(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.lock();
        inner.handles.drain().map(|(_, handle)| handle).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retire_respects_the_minimum() {
        let set = WorkerSet::new(1);

        set.adopt(0, Arc::new(WorkerState::new()));
        set.adopt(1, Arc::new(WorkerState::new()));
        assert_eq!(set.live(), 2);

        assert!(set.try_retire(1));
        assert_eq!(set.live(), 1);

        // at the minimum, retirement is refused
        assert!(!set.try_retire(0));
        assert_eq!(set.live(), 1);
    }

    #[test]
    fn ids_are_monotonic() {
        let set = WorkerSet::new(1);
        let a = set.next_id();
        let b = set.next_id();
        assert!(b > a);
    }

    #[test]
    fn watchdog_flags_only_overdue_workers() {
        let set = WorkerSet::new(1);

        let fresh = Arc::new(WorkerState::new());
        fresh.set_busy();
        set.adopt(0, fresh);

        assert_eq!(set.watchdog(Duration::from_secs(60)), None);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(set.watchdog(Duration::from_millis(10)), Some(0));

        let idle = Arc::new(WorkerState::new());
        idle.set_idle();
        let set = WorkerSet::new(1);
        set.adopt(1, idle);
        assert_eq!(set.watchdog(Duration::from_millis(0)), None);
    }
}
