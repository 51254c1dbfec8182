// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cooperative cancellation signals.
//!
//! A [`StopSource`] owns the write side of a cancellation signal, a
//! [`StopToken`] is the read side handed to operations that should be
//! cancellable. Callbacks registered through a token run synchronously on
//! the thread that calls [`StopSource::request_stop`], in registration
//! order. Dropping a [`StopRegistration`] unlinks its callback in O(log n).
//!
//! Sources can be chained: a source created with [`StopSource::chained`]
//! fires whenever its parent token fires, which is how stop requests
//! propagate from an owning task into nested operations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Waker;

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

/// Write side of a cancellation signal.
///
/// Cloning a `StopSource` yields another handle to the *same* signal, like
/// `std::stop_source` in other languages. The signal fires at most once
/// (unless [`set_auto_reset`][Self::set_auto_reset] re-arms it), and firing
/// is idempotent.
#[derive(Clone)]
pub struct StopSource {
    state: Arc<StopState>,
    // keeps the parent link of a chained source alive across clones
    _parent: Option<Arc<StopRegistration>>,
}

/// Read side of a cancellation signal, handed out by [`StopSource::token`].
#[derive(Clone)]
pub struct StopToken {
    state: Arc<StopState>,
}

/// Handle for a callback registered on a [`StopToken`].
///
/// Dropping the registration unlinks the callback. A registration returned
/// after the signal already fired is inert.
pub struct StopRegistration {
    state: Option<Arc<StopState>>,
    key: u64,
}

struct StopState {
    stopped: AtomicBool,
    auto_reset: AtomicBool,
    /// Thread currently draining callbacks, 0 when none. Used to catch
    /// re-entrant registration from inside a callback.
    stopping_on: AtomicU64,
    next_key: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback>>,
}

// === impl StopSource ===

impl StopSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StopState {
                stopped: AtomicBool::new(false),
                auto_reset: AtomicBool::new(false),
                stopping_on: AtomicU64::new(0),
                next_key: AtomicU64::new(1),
                callbacks: Mutex::new(BTreeMap::new()),
            }),
            _parent: None,
        }
    }

    /// Creates a source that fires when `parent` fires.
    ///
    /// The link lives as long as any clone of the returned source.
    #[must_use]
    pub fn chained(parent: &StopToken) -> Self {
        let mut source = Self::new();
        let state = source.state.clone();
        let reg = parent.register(move || {
            StopState::request_stop(&state);
        });
        source._parent = Some(Arc::new(reg));
        source
    }

    /// Returns the read side of this signal.
    #[must_use]
    pub fn token(&self) -> StopToken {
        StopToken {
            state: self.state.clone(),
        }
    }

    /// Fires the signal, invoking all registered callbacks on this thread
    /// in registration order. Returns `false` if the signal had already
    /// fired.
    pub fn request_stop(&self) -> bool {
        StopState::request_stop(&self.state)
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Re-arms a fired signal. Callbacks registered before the reset are
    /// gone; they ran (or were dropped) when the signal fired.
    pub fn reset(&self) {
        self.state.stopped.store(false, Ordering::Release);
    }

    /// When set, the signal re-arms itself after draining callbacks. Used
    /// by auto-reset events and run-loop wakeups that fire repeatedly.
    pub fn set_auto_reset(&self, auto_reset: bool) {
        self.state.auto_reset.store(auto_reset, Ordering::Release);
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSource")
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

// === impl StopToken ===

impl StopToken {
    pub fn stop_requested(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Registers `callback` to run when the signal fires.
    ///
    /// If the signal has already fired the callback runs immediately on
    /// the calling thread and an inert registration is returned.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback of the same signal.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) -> StopRegistration {
        let state = &self.state;
        assert_ne!(
            state.stopping_on.load(Ordering::Acquire),
            current_thread_id(),
            "cannot register a stop callback from within a stop callback"
        );

        if state.stopped.load(Ordering::Acquire) {
            callback();
            return StopRegistration::inert();
        }

        let mut callbacks = state.callbacks.lock();
        // request_stop may have drained the map while we were waiting for
        // the lock; a late registration must still observe the stop.
        if state.stopped.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
            return StopRegistration::inert();
        }

        let key = state.next_key.fetch_add(1, Ordering::Relaxed);
        callbacks.insert(key, Box::new(callback));
        StopRegistration {
            state: Some(state.clone()),
            key,
        }
    }

    /// Registers a waker to be woken when the signal fires.
    pub fn register_waker(&self, waker: Waker) -> StopRegistration {
        self.register(move || waker.wake())
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

// === impl StopState ===

impl StopState {
    fn request_stop(state: &Arc<StopState>) -> bool {
        let drained = {
            let mut callbacks = state.callbacks.lock();
            if state.stopped.swap(true, Ordering::AcqRel) {
                return false;
            }
            state
                .stopping_on
                .store(current_thread_id(), Ordering::Release);
            std::mem::take(&mut *callbacks)
        };

        // Callbacks run outside the lock so they may register on *other*
        // signals; each one is dropped right after it runs, before this
        // function returns.
        for (_, callback) in drained {
            callback();
        }

        state.stopping_on.store(0, Ordering::Release);
        if state.auto_reset.load(Ordering::Acquire) {
            state.stopped.store(false, Ordering::Release);
        }
        true
    }
}

// === impl StopRegistration ===

impl StopRegistration {
    pub(crate) fn inert() -> Self {
        Self {
            state: None,
            key: 0,
        }
    }

    /// Whether the callback is still linked (not yet fired or dropped).
    pub fn is_linked(&self) -> bool {
        match &self.state {
            Some(state) => state.callbacks.lock().contains_key(&self.key),
            None => false,
        }
    }
}

impl Drop for StopRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.callbacks.lock().remove(&self.key);
        }
    }
}

impl fmt::Debug for StopRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopRegistration")
            .field("linked", &self.is_linked())
            .finish()
    }
}

fn current_thread_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callbacks_run_in_registration_order() {
        let source = StopSource::new();
        let token = source.token();

        let order = Arc::new(Mutex::new(Vec::new()));
        let regs: Vec<_> = (0..4)
            .map(|i| {
                let order = order.clone();
                token.register(move || order.lock().push(i))
            })
            .collect();

        assert!(source.request_stop());
        assert!(!source.request_stop());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        drop(regs);
    }

    #[test]
    fn register_after_stop_runs_immediately() {
        let source = StopSource::new();
        source.request_stop();

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let reg = source
            .token()
            .register(move || ran2.store(true, Ordering::Relaxed));
        assert!(ran.load(Ordering::Relaxed));
        assert!(!reg.is_linked());
    }

    #[test]
    fn dropped_registration_does_not_run() {
        let source = StopSource::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = count.clone();
        let reg = source.token().register(move || {
            count2.fetch_add(1, Ordering::Relaxed);
        });
        assert!(reg.is_linked());
        drop(reg);

        source.request_stop();
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn auto_reset_rearms() {
        let source = StopSource::new();
        source.set_auto_reset(true);

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _reg = source.token().register(move || {
            count2.fetch_add(1, Ordering::Relaxed);
        });

        assert!(source.request_stop());
        assert!(!source.stop_requested());
        // signal re-armed, but the old callback was consumed
        assert!(source.request_stop());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn chained_source_fires_with_parent() {
        let parent = StopSource::new();
        let child = StopSource::chained(&parent.token());
        assert!(!child.stop_requested());

        parent.request_stop();
        assert!(child.stop_requested());
    }

    #[test]
    fn stop_from_another_thread() {
        let source = StopSource::new();
        let token = source.token();

        let handle = std::thread::spawn(move || source.request_stop());
        assert!(handle.join().unwrap());
        assert!(token.stop_requested());
    }
}
