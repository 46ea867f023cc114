//! Response lifecycle callback registries.
//!
//! # Responsibilities
//! - Hand out strictly increasing registration ids
//! - Keep `headers-end`, `body-end` and `end` callbacks per request
//! - Fire each registry at most once, newest registration first
//!
//! # Design Decisions
//! - One id sequence shared by all three registries
//! - Callbacks are taken out of the registry before they run, so a callback
//!   may register or remove others without deadlocking
//! - `end` is guarded by a delivered-once flag shared by success, exception
//!   and close

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::routing::error::{Failure, RouterError};

/// Outcome handed to `end` callbacks.
pub type EndResult = Result<(), Failure>;

pub type Callback = Box<dyn FnOnce() + Send>;
pub type EndCallback = Box<dyn FnOnce(&EndResult) + Send>;

/// Per-request lifecycle registries.
#[derive(Default)]
pub struct Lifecycle {
    seq: AtomicU32,
    headers_end: Mutex<BTreeMap<u32, Callback>>,
    body_end: Mutex<BTreeMap<u32, Callback>>,
    end: Mutex<BTreeMap<u32, EndCallback>>,
    end_delivered: AtomicBool,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .field("end_delivered", &self.end_delivered.load(Ordering::Relaxed))
            .finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> Result<u32, RouterError> {
        let seq = self
            .seq
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| s.checked_add(1))
            .map_err(|_| RouterError::TooManyHandlers)?
            + 1;
        if seq == u32::MAX {
            return Err(RouterError::TooManyHandlers);
        }
        Ok(seq)
    }

    pub fn add_headers_end(&self, callback: Callback) -> Result<u32, RouterError> {
        let id = self.next_seq()?;
        lock(&self.headers_end).insert(id, callback);
        Ok(id)
    }

    pub fn remove_headers_end(&self, id: u32) -> bool {
        lock(&self.headers_end).remove(&id).is_some()
    }

    pub fn add_body_end(&self, callback: Callback) -> Result<u32, RouterError> {
        let id = self.next_seq()?;
        lock(&self.body_end).insert(id, callback);
        Ok(id)
    }

    pub fn remove_body_end(&self, id: u32) -> bool {
        lock(&self.body_end).remove(&id).is_some()
    }

    pub fn add_end(&self, callback: EndCallback) -> Result<u32, RouterError> {
        let id = self.next_seq()?;
        lock(&self.end).insert(id, callback);
        Ok(id)
    }

    pub fn remove_end(&self, id: u32) -> bool {
        lock(&self.end).remove(&id).is_some()
    }

    /// Drop pending headers-end and body-end callbacks (used by reroute).
    pub fn clear_response_callbacks(&self) {
        lock(&self.headers_end).clear();
        lock(&self.body_end).clear();
    }

    pub(crate) fn fire_headers_end(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.headers_end));
        for (_, callback) in callbacks.into_iter().rev() {
            callback();
        }
    }

    pub(crate) fn fire_body_end(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.body_end));
        for (_, callback) in callbacks.into_iter().rev() {
            callback();
        }
    }

    /// Deliver the terminal event. Returns false when it was already
    /// delivered.
    pub(crate) fn fire_end(&self, result: EndResult) -> bool {
        if self.end_delivered.swap(true, Ordering::AcqRel) {
            return false;
        }
        let callbacks = std::mem::take(&mut *lock(&self.end));
        for (_, callback) in callbacks.into_iter().rev() {
            callback(&result);
        }
        true
    }

    pub fn end_delivered(&self) -> bool {
        self.end_delivered.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn set_seq(&self, seq: u32) {
        self.seq.store(seq, Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("lifecycle mutex poisoned")
}
