// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The FIFO waiter list underlying every synchronization primitive.
//!
//! A [`WaitList`] couples a primitive's state `S` with an arena of
//! waiter slots and their FIFO order, all guarded by one small
//! futex-backed mutex. Predicates run under that lock, so the decision
//! to wake a waiter is atomic with the state change that justifies it.
//! A waiter whose predicate fails is skipped without losing its place.
//!
//! Two waiting disciplines are offered:
//!
//! * **handoff** ([`poll_acquire`][WaitList::poll_acquire]): the waker
//!   side applies the grant (e.g. transfers mutex ownership) when it
//!   notifies a waiter; the woken waiter resumes without re-checking.
//! * **condition** ([`poll_wait`][WaitList::poll_wait]): a notification
//!   is a hint; the woken waiter re-evaluates its condition and requeues
//!   at its old position if the condition no longer holds.
//!
//! The race between a wakeup and a cancellation (the waiter future being
//! dropped) is arbitrated by the same lock: whichever side runs first
//! owns the resumption path, and [`cancel_waiter`][WaitList::cancel_waiter]
//! reports a consumed grant so the caller can return it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use slab::Slab;

pub(crate) struct WaitList<S> {
    inner: Mutex<ListInner<S>>,
}

struct ListInner<S> {
    state: S,
    waiters: Slab<Waiter>,
    order: VecDeque<usize>,
}

struct Waiter {
    waker: Option<Waker>,
    phase: Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Notified,
}

// === impl WaitList ===

impl<S> WaitList<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(ListInner {
                state,
                waiters: Slab::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Runs `f` with the primitive state under the list lock.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.lock().state)
    }

    /// One-shot acquisition attempt. With `fair` set it fails while
    /// earlier waiters are queued, preventing barging.
    pub(crate) fn try_acquire(&self, fair: bool, f: impl FnOnce(&mut S) -> bool) -> bool {
        let mut inner = self.inner.lock();
        (!fair || inner.order.is_empty()) && f(&mut inner.state)
    }

    /// Handoff-style wait: once notified, the grant has already been
    /// applied on this waiter's behalf and the future resumes directly.
    pub(crate) fn poll_acquire(
        &self,
        key: &mut Option<usize>,
        cx: &mut Context<'_>,
        fair: bool,
        mut try_acquire: impl FnMut(&mut S) -> bool,
    ) -> Poll<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        match *key {
            None => {
                if (!fair || inner.order.is_empty()) && try_acquire(&mut inner.state) {
                    return Poll::Ready(());
                }
                *key = Some(inner.enqueue(cx));
                Poll::Pending
            }
            Some(k) => match inner.waiters[k].phase {
                Phase::Notified => {
                    inner.waiters.remove(k);
                    *key = None;
                    Poll::Ready(())
                }
                Phase::Waiting => {
                    inner.waiters[k].update(cx);
                    Poll::Pending
                }
            },
        }
    }

    /// Condition-style wait: a notification re-runs `condition`; if it
    /// fails the waiter goes back to the front of the queue.
    pub(crate) fn poll_wait(
        &self,
        key: &mut Option<usize>,
        cx: &mut Context<'_>,
        mut condition: impl FnMut(&mut S) -> bool,
    ) -> Poll<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        match *key {
            None => {
                if condition(&mut inner.state) {
                    return Poll::Ready(());
                }
                *key = Some(inner.enqueue(cx));
                Poll::Pending
            }
            Some(k) => match inner.waiters[k].phase {
                Phase::Notified => {
                    if condition(&mut inner.state) {
                        inner.waiters.remove(k);
                        *key = None;
                        Poll::Ready(())
                    } else {
                        let waiter = &mut inner.waiters[k];
                        waiter.phase = Phase::Waiting;
                        waiter.update(cx);
                        inner.order.push_front(k);
                        Poll::Pending
                    }
                }
                Phase::Waiting => {
                    inner.waiters[k].update(cx);
                    Poll::Pending
                }
            },
        }
    }

    /// Scans waiters in FIFO order; the first for which `grant` succeeds
    /// is notified. Waiters with failing grants keep their position.
    pub(crate) fn wake_one(&self, grant: impl FnMut(&mut S) -> bool) -> bool {
        self.wake_one_inner(grant, |_| {})
    }

    /// Like [`wake_one`][Self::wake_one], running `fallback` under the
    /// same critical section when no waiter was notified.
    pub(crate) fn wake_one_or_else(
        &self,
        grant: impl FnMut(&mut S) -> bool,
        fallback: impl FnOnce(&mut S),
    ) -> bool {
        self.wake_one_inner(grant, fallback)
    }

    fn wake_one_inner(
        &self,
        mut grant: impl FnMut(&mut S) -> bool,
        fallback: impl FnOnce(&mut S),
    ) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            let mut woken = None;
            let mut idx = 0;
            while idx < inner.order.len() {
                let k = inner.order[idx];
                if grant(&mut inner.state) {
                    inner.order.remove(idx);
                    let waiter = &mut inner.waiters[k];
                    waiter.phase = Phase::Notified;
                    woken = waiter.waker.take();
                    break;
                }
                idx += 1;
            }
            if woken.is_none() {
                fallback(&mut inner.state);
            }
            woken
        };
        match waker {
            Some(waker) => {
                waker.wake();
                true
            }
            None => false,
        }
    }

    /// Notifies every waiter whose `grant` succeeds; the rest stay
    /// queued.
    pub(crate) fn wake_all(&self, mut grant: impl FnMut(&mut S) -> bool) -> usize {
        let wakers: Vec<Waker> = {
            let mut inner = self.inner.lock();
            let inner = &mut *inner;
            let mut woken = Vec::new();
            let mut kept = VecDeque::new();
            while let Some(k) = inner.order.pop_front() {
                if grant(&mut inner.state) {
                    let waiter = &mut inner.waiters[k];
                    waiter.phase = Phase::Notified;
                    if let Some(waker) = waiter.waker.take() {
                        woken.push(waker);
                    }
                } else {
                    kept.push_back(k);
                }
            }
            inner.order = kept;
            woken
        };
        let count = wakers.len();
        for waker in wakers {
            waker.wake();
        }
        count
    }

    /// Unlinks a waiter whose future is being dropped. Returns `true`
    /// when the waiter had already been notified, i.e. a grant was
    /// consumed on its behalf and the caller must hand it back.
    pub(crate) fn cancel_waiter(&self, key: &mut Option<usize>) -> bool {
        let Some(k) = key.take() else { return false };
        let mut inner = self.inner.lock();
        let waiter = inner.waiters.remove(k);
        match waiter.phase {
            Phase::Waiting => {
                inner.order.retain(|&x| x != k);
                false
            }
            Phase::Notified => true,
        }
    }

}

impl<S> ListInner<S> {
    fn enqueue(&mut self, cx: &mut Context<'_>) -> usize {
        let k = self.waiters.insert(Waiter {
            waker: Some(cx.waker().clone()),
            phase: Phase::Waiting,
        });
        self.order.push_back(k);
        k
    }
}

impl Waiter {
    fn update(&mut self, cx: &mut Context<'_>) {
        match &self.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => self.waker = Some(cx.waker().clone()),
        }
    }
}

impl<S> fmt::Debug for WaitList<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WaitList")
            .field("waiters", &inner.order.len())
            .finish_non_exhaustive()
    }
}

/// Drives `poll` on the calling thread, parking between wakeups. The
/// notification travels through an atomic flag so a wake racing the
/// park is never lost.
pub(crate) fn block_until(mut poll: impl FnMut(&mut Context<'_>) -> Poll<()>) {
    struct Unparker {
        thread: std::thread::Thread,
        notified: AtomicBool,
    }

    impl Wake for Unparker {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.notified.store(true, Ordering::Release);
            self.thread.unpark();
        }
    }

    let unparker = Arc::new(Unparker {
        thread: std::thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(unparker.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
        if poll(&mut cx).is_ready() {
            return;
        }
        while !unparker.notified.swap(false, Ordering::Acquire) {
            std::thread::park();
        }
    }
}
