// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use slab::Slab;

use crate::executor::Executor;
use crate::task::{JoinHandle, StopHandle};

/// A scope tying spawned tasks to a lexical region.
///
/// Tasks spawned through the scope are tracked until they complete;
/// dropping the scope (or calling [`wait`][Self::wait]) drains them. By
/// default the scope cancels its remaining tasks when dropped; see
/// [`set_auto_cancel`][Self::set_auto_cancel].
///
/// Handles are cheap clones sharing one scope.
#[derive(Clone)]
pub struct TaskScope {
    exec: Executor,
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    active: Cell<usize>,
    auto_cancel: Cell<bool>,
    handles: RefCell<Slab<StopHandle>>,
    join_waker: RefCell<Option<Waker>>,
}

// === impl TaskScope ===

impl TaskScope {
    /// Creates a scope on the current thread's executor.
    ///
    /// # Panics
    ///
    /// Panics when the thread has no live executor.
    #[must_use]
    pub fn new() -> Self {
        Self::with_executor(&Executor::current())
    }

    #[must_use]
    pub fn with_executor(exec: &Executor) -> Self {
        Self {
            exec: exec.clone(),
            inner: Rc::new(ScopeInner {
                active: Cell::new(0),
                auto_cancel: Cell::new(true),
                handles: RefCell::new(Slab::new()),
                join_waker: RefCell::new(None),
            }),
        }
    }

    /// Creates a scope, runs `body` with it, then drains the scope.
    pub async fn enter<F, Fut>(body: F) -> Fut::Output
    where
        F: FnOnce(TaskScope) -> Fut,
        Fut: Future,
    {
        let scope = Self::new();
        let output = body(scope.clone()).await;
        scope.join().await;
        output
    }

    /// Spawns a task tracked by this scope.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = self.exec.spawn(future);
        let inner = &self.inner;
        inner.active.set(inner.active.get() + 1);
        let key = inner.handles.borrow_mut().insert(handle.stop_handle());
        tracing::trace!(id = ?handle.id(), "task spawned into scope");

        let weak = Rc::downgrade(inner);
        handle.context().register_callback(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            inner.handles.borrow_mut().try_remove(key);
            inner.active.set(inner.active.get() - 1);
            if inner.active.get() == 0
                && let Some(waker) = inner.join_waker.borrow_mut().take()
            {
                waker.wake();
            }
        }));
        handle
    }

    /// Number of tasks still running in the scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.active.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests stop on every task still running in the scope.
    pub fn cancel(&self) {
        for (_, handle) in self.inner.handles.borrow().iter() {
            handle.stop();
        }
    }

    /// Whether dropping the scope cancels remaining tasks first.
    /// Defaults to `true`.
    pub fn set_auto_cancel(&self, auto_cancel: bool) {
        self.inner.auto_cancel.set(auto_cancel);
    }

    /// Resolves once every task in the scope has completed.
    pub fn join(&self) -> Join<'_> {
        Join { scope: self }
    }

    /// Runs the executor until every task in the scope has completed.
    ///
    /// # Panics
    ///
    /// Panics when called while the executor is already running on this
    /// thread; use [`join`][Self::join] from inside a task instead.
    pub fn wait(&self) {
        if self.is_empty() {
            return;
        }
        self.exec.block_on(self.join());
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        // only the last handle drains the scope
        if Rc::strong_count(&self.inner) > 1 || self.is_empty() {
            return;
        }
        if self.inner.auto_cancel.get() {
            self.cancel();
        }
        if self.exec.is_running() {
            // dropped from inside a task; the remaining (cancelled) tasks
            // finish on their own
            tracing::warn!(
                remaining = self.len(),
                "scope dropped inside the run loop, detaching remaining tasks"
            );
            return;
        }
        self.wait();
    }
}

impl fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("active", &self.inner.active.get())
            .field("auto_cancel", &self.inner.auto_cancel.get())
            .finish()
    }
}

/// Future returned by [`TaskScope::join`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Join<'scope> {
    scope: &'scope TaskScope,
}

impl Future for Join<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &self.scope.inner;
        if inner.active.get() == 0 {
            return Poll::Ready(());
        }
        *inner.join_waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl fmt::Debug for Join<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sleep;
    use std::time::Duration;

    #[test]
    fn wait_drains_all_tasks() {
        let exec = Executor::new().unwrap();
        let scope = TaskScope::new();
        let counter = Rc::new(Cell::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            drop(scope.spawn(async move {
                sleep(Duration::from_millis(5)).await;
                counter.set(counter.get() + 1);
            }));
        }

        scope.wait();
        assert_eq!(counter.get(), 10);
        assert!(scope.is_empty());
        drop(exec);
    }

    #[test]
    fn drop_cancels_remaining() {
        let exec = Executor::new().unwrap();
        let scope = TaskScope::new();

        drop(scope.spawn(async {
            sleep(Duration::from_secs(3600)).await;
        }));

        let begin = std::time::Instant::now();
        drop(scope);
        assert!(begin.elapsed() < Duration::from_secs(2));
        drop(exec);
    }

    #[test]
    fn enter_runs_body_then_drains() {
        let exec = Executor::new().unwrap();
        let counter = Rc::new(Cell::new(0));

        let counter2 = counter.clone();
        let out = exec.block_on(TaskScope::enter(move |scope| async move {
            for _ in 0..3 {
                let counter = counter2.clone();
                drop(scope.spawn(async move {
                    crate::task::yield_now().await;
                    counter.set(counter.get() + 1);
                }));
            }
            "done"
        }));

        assert_eq!(out, "done");
        assert_eq!(counter.get(), 3);
    }
}
