//! Write-once broadcast signal.
//!
//! [`OnceSignal`] pairs a write-once value with a broadcast wake-up:
//! - The first `set()` stores the value and wakes every waiter
//! - Later `set()` calls are rejected and hand the value back
//! - Waiters arriving after the value is set return immediately
//!
//! Waiting is available from async code (runtime-agnostic), from blocking
//! threads, and with a timeout. Readers never take a lock: the value is
//! published through a `OnceLock`, so observing the signal also observes the
//! fully written value.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use event_listener::{Event, Listener};

/// A value that is written exactly once and observed by any number of waiters.
pub struct OnceSignal<T> {
    value: OnceLock<T>,
    fired: Event,
}

impl<T> OnceSignal<T> {
    /// Create an unfired signal.
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            fired: Event::new(),
        }
    }

    /// Store `value` and wake all waiters.
    ///
    /// Returns `Err(value)` if the signal already fired; the stored value is
    /// left untouched.
    pub fn set(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;
        self.fired.notify(usize::MAX);
        Ok(())
    }

    /// The stored value, if the signal has fired.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Check whether the signal has fired.
    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    /// Wait asynchronously until the signal fires.
    pub async fn wait(&self) -> &T {
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }

            let listener = self.fired.listen();

            // Double-check after registering, set() may have raced us
            if let Some(value) = self.value.get() {
                return value;
            }

            listener.await;
        }
    }

    /// Block the current thread until the signal fires.
    pub fn wait_blocking(&self) -> &T {
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }

            let listener = self.fired.listen();
            if let Some(value) = self.value.get() {
                return value;
            }

            listener.wait();
        }
    }

    /// Block until the signal fires or `timeout` elapses.
    ///
    /// Returns `None` on timeout. A timeout too large to form a deadline
    /// waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait_blocking());
        };
        loop {
            if let Some(value) = self.value.get() {
                return Some(value);
            }

            let listener = self.fired.listen();
            if let Some(value) = self.value.get() {
                return Some(value);
            }

            if listener.wait_deadline(deadline).is_none() {
                return self.value.get();
            }
        }
    }
}

impl<T> Default for OnceSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for OnceSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceSignal")
            .field("value", &self.value.get())
            .finish_non_exhaustive()
    }
}
