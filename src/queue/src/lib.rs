// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A bounded, blocking FIFO shared between producer threads (listeners, the
//! keep-alive poller) and consumer threads (workers).
//!
//! Producers block in [`BoundedQueue::put`] while the queue is at capacity,
//! which is how backpressure propagates all the way back to `accept`.
//! Consumers block in [`BoundedQueue::get`] while the queue is empty and are
//! counted as idle for the duration. A `put` which finds no idle consumer
//! raises an edge-triggered hint on a third condition variable, which the
//! server supervisor uses to decide whether to grow the worker pool.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    idle_consumers: usize,
}

pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    no_idle_consumers: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);

        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                capacity,
                idle_consumers: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            no_idle_consumers: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // a poisoned lock means a holder panicked; the protected state is a
        // plain deque and remains usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an item, blocking while the queue is at capacity. If no
    /// consumer is idle at the moment of insertion, the no-idle-consumers
    /// hint is raised once.
    pub fn put(&self, item: T) {
        let mut inner = self.lock();

        while inner.items.len() >= inner.capacity {
            inner = self.not_full.wait(inner).unwrap_or_else(|e| e.into_inner());
        }

        if inner.idle_consumers == 0 {
            self.no_idle_consumers.notify_all();
        }

        inner.items.push_back(item);
        drop(inner);

        self.not_empty.notify_one();
    }

    /// Remove and return the head item, blocking while the queue is empty.
    /// The caller is counted as an idle consumer for the duration of the
    /// wait; the count drops before the item is returned.
    pub fn get(&self) -> T {
        let mut inner = self.lock();

        inner.idle_consumers += 1;
        while inner.items.is_empty() {
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner.idle_consumers -= 1;

        let item = inner.items.pop_front().unwrap();
        drop(inner);

        self.not_full.notify_one();
        item
    }

    /// Like [`get`](Self::get), but gives up after `timeout` and returns
    /// `None`. Wakeups without an item (shutdown fanout, spurious signals)
    /// also surface as `None` once the deadline passes.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.lock();

        inner.idle_consumers += 1;
        let deadline = std::time::Instant::now() + timeout;
        while inner.items.is_empty() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                inner.idle_consumers -= 1;
                return None;
            }
            let (guard, _result) = self
                .not_empty
                .wait_timeout(inner, remaining)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        inner.idle_consumers -= 1;

        let item = inner.items.pop_front().unwrap();
        drop(inner);

        self.not_full.notify_one();
        Some(item)
    }

    /// Non-blocking removal, used by consumers draining the queue during
    /// shutdown.
    pub fn try_get(&self) -> Option<T> {
        let mut inner = self.lock();
        let item = inner.items.pop_front()?;
        drop(inner);

        self.not_full.notify_one();
        Some(item)
    }

    /// Block until a `put` finds no idle consumer, or until `timeout`.
    /// Returns `true` on a signal. The hint is advisory: a consumer may have
    /// become idle between the signal and the caller observing it.
    pub fn wait_no_idle(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        let (_guard, result) = self
            .no_idle_consumers
            .wait_timeout(inner, timeout)
            .unwrap_or_else(|e| e.into_inner());
        !result.timed_out()
    }

    /// Wake every waiter on the no-idle-consumers hint. Part of the shutdown
    /// fanout: the supervisor blocks on this signal and must observe the
    /// stop flag.
    pub fn signal_no_idle(&self) {
        self.no_idle_consumers.notify_all();
    }

    /// Wake every blocked consumer so it can re-check the stop flag.
    pub fn release_consumers(&self) {
        self.not_empty.notify_all();
    }

    /// Change the capacity. Shrinking below the current size is permitted:
    /// items already enqueued remain valid and subsequent `put`s block until
    /// the size falls under the new bound.
    pub fn set_capacity(&self, capacity: usize) {
        assert!(capacity > 0);

        let mut inner = self.lock();
        let grew = capacity > inner.capacity;
        inner.capacity = capacity;
        drop(inner);

        if grew {
            self.not_full.notify_all();
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn idle_consumers(&self) -> usize {
        self.lock().idle_consumers
    }
}
