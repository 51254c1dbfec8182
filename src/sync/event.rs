// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::sync::wait_list::{WaitList, block_until};

/// An awaitable flag.
///
/// A manual-reset event (the default) wakes *every* waiter on
/// [`set`][Self::set] and stays set until [`reset`][Self::reset]. An
/// auto-reset event wakes *one* waiter per `set` and clears itself when
/// the wakeup is consumed. Thread-safe on both sides.
pub struct Event {
    list: WaitList<EventState>,
}

struct EventState {
    set: bool,
    auto_reset: bool,
}

// === impl Event ===

impl Event {
    /// Creates a manual-reset event.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Creates an auto-reset event.
    #[must_use]
    pub fn auto_reset() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(auto_reset: bool) -> Self {
        Self {
            list: WaitList::new(EventState {
                set: false,
                auto_reset,
            }),
        }
    }

    /// Sets the flag. Manual-reset: wakes all waiters. Auto-reset: wakes
    /// the first waiter, or stores the wakeup for the next `wait`.
    pub fn set(&self) {
        let auto = self.list.with(|s| s.auto_reset);
        if auto {
            // a woken waiter consumes the flag; only store it when no
            // one is waiting
            self.list.wake_one_or_else(|_| true, |s| s.set = true);
        } else {
            self.list.with(|s| s.set = true);
            self.list.wake_all(|_| true);
        }
    }

    pub fn reset(&self) {
        self.list.with(|s| s.set = false);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.list.with(|s| s.set)
    }

    /// Resolves once the flag is set.
    pub fn wait(&self) -> WaitEvent<'_> {
        WaitEvent {
            event: self,
            key: None,
        }
    }

    /// Parks the calling thread until the flag is set. For threads that
    /// do not run an executor.
    pub fn blocking_wait(&self) {
        let mut key = None;
        block_until(|cx| self.poll_wait(&mut key, cx));
    }

    fn poll_wait(&self, key: &mut Option<usize>, cx: &mut Context<'_>) -> Poll<()> {
        let auto = self.list.with(|s| s.auto_reset);
        if auto {
            self.list.poll_acquire(key, cx, false, |s| {
                if s.set {
                    s.set = false;
                    true
                } else {
                    false
                }
            })
        } else {
            self.list.poll_wait(key, cx, |s| s.set)
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}

/// Future returned by [`Event::wait`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct WaitEvent<'a> {
    event: &'a Event,
    key: Option<usize>,
}

impl Future for WaitEvent<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.event.poll_wait(&mut this.key, cx)
    }
}

impl Drop for WaitEvent<'_> {
    fn drop(&mut self) {
        if self.event.list.cancel_waiter(&mut self.key) {
            // an auto-reset wakeup was consumed on our behalf; pass it on
            let auto = self.event.list.with(|s| s.auto_reset);
            if auto {
                self.event.set();
            }
        }
    }
}

impl fmt::Debug for WaitEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitEvent").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::rc::Rc;
    use std::sync::Arc;

    #[test]
    fn manual_reset_wakes_all() {
        let exec = Executor::new().unwrap();
        let event = Rc::new(Event::new());
        let count = Rc::new(std::cell::Cell::new(0));

        exec.block_on(async {
            let mut handles = Vec::new();
            for _ in 0..4 {
                let event = event.clone();
                let count = count.clone();
                handles.push(crate::task::spawn(async move {
                    event.wait().await;
                    count.set(count.get() + 1);
                }));
            }
            crate::task::yield_now().await;
            event.set();
            for handle in handles {
                handle.await;
            }
        });
        assert_eq!(count.get(), 4);
        assert!(event.is_set());
    }

    #[test]
    fn auto_reset_wakes_one_and_clears() {
        let exec = Executor::new().unwrap();
        let event = Rc::new(Event::auto_reset());

        exec.block_on(async {
            event.set();
            // stored wakeup is consumed by the next wait
            event.wait().await;
            assert!(!event.is_set());
        });
        drop(exec);
    }

    #[test]
    fn set_from_foreign_thread() {
        let exec = Executor::new().unwrap();
        let event = Arc::new(Event::new());

        let remote = event.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            remote.set();
        });

        exec.block_on(event.wait());
        thread.join().unwrap();
    }
}
