// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multicast notification primitive (§4.1).
//!
//! `Event<T>` is the thing `Task` is built on: handlers attach, firing
//! invokes every currently-attached handler in registration order with
//! a clone of the payload. A handler that panics is caught and logged
//! rather than allowed to take down the firing thread or block later
//! handlers. Handlers attached during a firing are not invoked during
//! that same firing — `fire` takes a snapshot of the handler list (a
//! cloned `Vec` of `Arc` pointers, not a drain) before any handler runs,
//! so a handler that re-attaches or re-fires never deadlocks on its own
//! lock, and a concurrent or re-entrant `fire` of the same event never
//! finds the list emptied out from under it.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A multicast event. `T` is the payload type handlers receive; it must
/// be `Clone` because every attached handler gets its own copy.
pub struct Event<T> {
    handlers: Arc<Mutex<Vec<Handler<T>>>>,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self { handlers: Arc::new(Mutex::new(Vec::new())) }
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self { handlers: Arc::clone(&self.handlers) }
    }
}

impl<T: Clone + 'static> Event<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns nothing — conveyor-style events have
    /// no detach token in the common case; `detach_all` covers teardown.
    pub fn attach<F>(&self, handler: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.handlers.lock().push(Arc::new(handler));
    }

    /// Remove every attached handler.
    pub fn detach_all(&self) {
        self.handlers.lock().clear();
    }

    /// Invoke every handler attached *as of this call* with a clone of
    /// `payload`. Handlers attached by another handler mid-firing run on
    /// the next `fire`, not this one. The snapshot is a cloned `Vec` of
    /// `Arc` handler pointers taken under the lock and then released
    /// before any handler runs, so the handler list itself is never left
    /// empty: a concurrent or re-entrant `fire` on the same `Event` still
    /// sees every attached handler.
    pub fn fire(&self, payload: T) {
        let snapshot: Vec<Handler<T>> = self.handlers.lock().clone();
        for handler in &snapshot {
            let payload = payload.clone();
            let result = catch_unwind(AssertUnwindSafe(|| handler(payload)));
            if let Err(_panic) = result {
                tracing::error!("event handler panicked; continuing with remaining handlers");
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_handlers_in_registration_order() {
        let event: Event<i32> = Event::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            event.attach(move |_| order.lock().push(i));
        }
        event.fire(1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn swallows_panicking_handlers_and_runs_the_rest() {
        let event: Event<i32> = Event::new();
        let ran = Arc::new(AtomicUsize::new(0));
        event.attach(|_| panic!("boom"));
        let ran2 = Arc::clone(&ran);
        event.attach(move |_| {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        event.fire(1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_attached_during_firing_do_not_run_that_firing() {
        let event: Event<i32> = Event::new();
        let late_ran = Arc::new(AtomicUsize::new(0));
        let event_clone = event.clone();
        let late_ran2 = Arc::clone(&late_ran);
        event.attach(move |_| {
            let late_ran3 = Arc::clone(&late_ran2);
            event_clone.attach(move |_| {
                late_ran3.fetch_add(1, Ordering::SeqCst);
            });
        });
        event.fire(1);
        assert_eq!(late_ran.load(Ordering::SeqCst), 0);
        event.fire(1);
        assert_eq!(late_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn payload_delivered_to_every_handler() {
        let event: Event<String> = Event::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        event.attach(move |p: String| seen2.lock().push(p));
        event.fire("hello".to_string());
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn reentrant_fire_from_within_a_handler_still_reaches_every_handler() {
        // A handler that re-fires the same event it was invoked from must
        // not observe an emptied handler list — `fire` takes a snapshot
        // rather than draining the shared vec.
        let event: Event<i32> = Event::new();
        let inner_fired = Arc::new(AtomicUsize::new(0));
        let outer_fired = Arc::new(AtomicUsize::new(0));

        let event_clone = event.clone();
        let inner_fired2 = Arc::clone(&inner_fired);
        event.attach(move |n: i32| {
            if n == 1 {
                inner_fired2.fetch_add(1, Ordering::SeqCst);
                event_clone.fire(2);
            }
        });
        let outer_fired2 = Arc::clone(&outer_fired);
        event.attach(move |_| {
            outer_fired2.fetch_add(1, Ordering::SeqCst);
        });

        event.fire(1);

        assert_eq!(inner_fired.load(Ordering::SeqCst), 1);
        // `outer_fired`'s handler must run once for the outer fire(1) and
        // once for the nested fire(2) triggered from within the first
        // handler — two deliveries, not one lost to a cleared list.
        assert_eq!(outer_fired.load(Ordering::SeqCst), 2);
    }
}
