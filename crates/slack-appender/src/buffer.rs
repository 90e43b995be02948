// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, double-buffered holding area for pending log events.
//!
//! Producers append into the active half while the single drainer flips the
//! active index and takes ownership of the other half. Enqueue never blocks on
//! a pending flush: the only lock a producer takes guards an in-memory push.

use crate::event::LogEvent;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct EventBuffer {
    halves: [Mutex<Vec<LogEvent>>; 2],
    active_index: AtomicUsize,
    capacity: usize,
    dropped: AtomicU64,
    dropped_total: AtomicU64,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            halves: [
                Mutex::new(Vec::with_capacity(capacity)),
                Mutex::new(Vec::with_capacity(capacity)),
            ],
            active_index: AtomicUsize::new(0),
            capacity,
            dropped: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Appends `event` if there is room, otherwise drops it.
    ///
    /// Returns whether the event was kept. A full buffer is not an error: the
    /// drop is only counted.
    pub fn enqueue(&self, event: LogEvent) -> bool {
        let mut active = self.lock_active();
        if active.len() >= self.capacity {
            drop(active);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        active.push(event);
        true
    }

    /// Removes and returns every buffered event in arrival order.
    ///
    /// Must only be called from one drainer at a time.
    pub fn drain_all(&self) -> Vec<LogEvent> {
        let old_index = self.active_index.load(Ordering::Acquire);
        self.active_index.store(1 - old_index, Ordering::Release);

        // Waits for a producer that locked the old half before the flip
        let mut drained = lock(&self.halves[old_index]);
        std::mem::replace(&mut *drained, Vec::with_capacity(self.capacity))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        let index = self.active_index.load(Ordering::Acquire);
        lock(&self.halves[index]).len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of events dropped since the buffer was created.
    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Returns the number of events dropped since the previous call and resets it.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Locks the half that is active once the lock is held.
    ///
    /// A drain may flip the index between the load and the lock; in that case
    /// the stale half belongs to the drainer and the producer moves on.
    fn lock_active(&self) -> MutexGuard<'_, Vec<LogEvent>> {
        loop {
            let index = self.active_index.load(Ordering::Acquire);
            let guard = lock(&self.halves[index]);
            if self.active_index.load(Ordering::Acquire) == index {
                return guard;
            }
        }
    }
}

// A panic while holding the lock cannot leave a Vec half-pushed
fn lock(half: &Mutex<Vec<LogEvent>>) -> MutexGuard<'_, Vec<LogEvent>> {
    half.lock().unwrap_or_else(PoisonError::into_inner)
}
