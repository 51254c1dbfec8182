// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::executor::Executor;
use crate::stop::StopSource;
use crate::task::{CatchUnwind, Id, PanicPayload, Stoppable, TaskShared};

// === impl Executor ===

impl Executor {
    /// Spawns `future` as a root task on this executor.
    ///
    /// The task gets a fresh stop source; requesting stop through the
    /// returned handle abandons the body at its next suspension point and
    /// resolves the handle with `None`.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let source = StopSource::new();
        let token = source.token();
        let shared = Arc::new(TaskShared::new(Id::next(), token.clone(), self.shared().clone()));

        let ctxt = Rc::new(SpawnContext {
            source,
            task: shared.clone(),
            inner: RefCell::new(JoinInner {
                result: None,
                waker: None,
                callbacks: Vec::new(),
            }),
        });

        let harness = {
            let ctxt = ctxt.clone();
            let task = shared.clone();
            async move {
                let output = Stoppable::new(token, Some(task), CatchUnwind::new(future)).await;
                ctxt.complete(output);
            }
        };

        self.insert_task(shared, Box::pin(harness));
        JoinHandle { ctxt }
    }
}

/// Heap state attaching a spawned task to its [`JoinHandle`]: the result
/// slot, the join waker and the completion callbacks other composition
/// primitives (groups, scopes) hang off the task.
pub(crate) struct SpawnContext<T> {
    source: StopSource,
    task: Arc<TaskShared>,
    inner: RefCell<JoinInner<T>>,
}

struct JoinInner<T> {
    /// `Some(None)` when the task was stopped, `Some(Some(Err))` when the
    /// body panicked.
    result: Option<Option<Result<T, PanicPayload>>>,
    waker: Option<Waker>,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

// === impl SpawnContext ===

impl<T> SpawnContext<T> {
    pub(crate) fn complete(&self, output: Option<Result<T, PanicPayload>>) {
        let (waker, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            inner.result = Some(output);
            (inner.waker.take(), std::mem::take(&mut inner.callbacks))
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn register_callback(&self, callback: Box<dyn FnOnce()>) {
        let immediate = {
            let mut inner = self.inner.borrow_mut();
            if inner.result.is_some() {
                true
            } else {
                inner.callbacks.push(callback);
                return;
            }
        };
        if immediate {
            callback();
        }
    }
}

/// Owning handle for a spawned task.
///
/// Awaiting it yields `Some(output)`, or `None` when the task was
/// stopped. [`wait`][Self::wait] drives the executor until the task
/// completes. Dropping the handle detaches the task.
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    ctxt: Rc<SpawnContext<T>>,
}

// === impl JoinHandle ===

impl<T> JoinHandle<T> {
    /// Requests the task to stop at its next suspension point.
    pub fn stop(&self) {
        self.ctxt.source.request_stop();
    }

    /// Returns the stop-only capability for this task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            source: self.ctxt.source.clone(),
            task: self.ctxt.task.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.ctxt.task.id()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ctxt.inner.borrow().result.is_some()
    }

    /// Runs the executor until the task completes and returns its output,
    /// `None` when stopped.
    ///
    /// # Panics
    ///
    /// Rethrows a panic from the task body; panics when called while the
    /// executor is already running on this thread.
    pub fn wait(self) -> Option<T> {
        Executor::current().block_on(self)
    }

    /// Registers `callback` to run when the task completes; runs it
    /// immediately if it already has.
    pub(crate) fn on_complete(&self, callback: impl FnOnce() + 'static) {
        self.ctxt.register_callback(Box::new(callback));
    }

    pub(crate) fn context(&self) -> Rc<SpawnContext<T>> {
        self.ctxt.clone()
    }

    /// Takes the result out of the context if the task has completed.
    /// Rethrows panics from the task body.
    pub(crate) fn try_take(&self) -> Option<Option<T>> {
        let result = self.ctxt.inner.borrow_mut().result.take()?;
        match result {
            None => Some(None),
            Some(Ok(value)) => Some(Some(value)),
            Some(Err(payload)) => std::panic::resume_unwind(payload),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.ctxt.inner.borrow_mut();
        match inner.result.take() {
            Some(None) => Poll::Ready(None),
            Some(Some(Ok(value))) => Poll::Ready(Some(value)),
            Some(Some(Err(payload))) => std::panic::resume_unwind(payload),
            None => {
                match &mut inner.waker {
                    Some(waker) if waker.will_wake(cx.waker()) => {}
                    slot => *slot = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.ctxt.task.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Non-owning stop capability derived from a [`JoinHandle`]. `Send`,
/// unlike the handle itself.
#[derive(Clone)]
pub struct StopHandle {
    source: StopSource,
    task: Arc<TaskShared>,
}

// === impl StopHandle ===

impl StopHandle {
    pub fn stop(&self) {
        self.source.request_stop();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_complete()
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.task.id()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("id", &self.task.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sleep;
    use std::cell::Cell;
    use std::time::{Duration, Instant};

    #[test]
    fn spawn_and_join() {
        let exec = Executor::new().unwrap();
        let handle = exec.spawn(async { 40 + 2 });
        assert_eq!(exec.block_on(handle), Some(42));
    }

    #[test]
    fn unpolled_future_never_runs() {
        let exec = Executor::new().unwrap();
        let ran = Rc::new(Cell::new(false));

        let ran2 = ran.clone();
        let future = async move { ran2.set(true) };
        drop(future);

        // and a spawned-but-stopped task never reaches its body either if
        // stopped before the first poll had a chance to observe it
        let handle = exec.spawn(async { 1 });
        assert_eq!(handle.wait(), Some(1));
        assert!(!ran.get());
    }

    #[test]
    fn stop_resolves_with_none() {
        let exec = Executor::new().unwrap();
        let handle = exec.spawn(async {
            sleep(Duration::from_secs(3600)).await;
            1
        });
        handle.stop();

        let begin = Instant::now();
        assert_eq!(handle.wait(), None);
        assert!(begin.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn stop_from_foreign_thread() {
        let exec = Executor::new().unwrap();
        let handle = exec.spawn(async {
            sleep(Duration::from_secs(3600)).await;
        });
        let stop = handle.stop_handle();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            stop.stop();
        });

        let begin = Instant::now();
        assert_eq!(handle.wait(), None);
        assert!(begin.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panic_rethrown_at_join() {
        let exec = Executor::new().unwrap();
        let handle = exec.spawn(async {
            panic!("boom");
        });
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle.wait()));
        assert!(result.is_err());
    }

    #[test]
    fn detached_task_still_runs() {
        let exec = Executor::new().unwrap();
        let done = Rc::new(Cell::new(false));

        let done2 = done.clone();
        drop(exec.spawn(async move { done2.set(true) }));

        exec.block_on(crate::task::yield_now());
        assert!(done.get());
    }
}
