// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Task state and composition.
//!
//! A spawned task is a plain [`Future`] boxed into the executor's task
//! map, paired with a [`TaskShared`] block that plays the promise role:
//! it carries the task id, the scheduled/complete state machine driven by
//! wakers, the task's stop token and the shield counter used by
//! [`unstoppable`]. Wakes from foreign threads funnel through the
//! executor's post queue; wakes on the owning thread go straight to the
//! local ready queue.

mod generator;
mod group;
mod id;
mod join;
mod scope;
mod unstoppable;
mod when_all;
mod when_any;
mod yield_now;

use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::task::{Context, Poll, Wake};

use pin_project::pin_project;

use crate::executor::{Executor, Message, Shared};
use crate::stop::{StopRegistration, StopToken};

pub use generator::{Generator, YieldItem, Yielder};
pub use group::{Next, NextWithId, TaskGroup};
pub use id::Id;
pub use join::{JoinHandle, StopHandle};
pub use scope::{Join, TaskScope};
pub use unstoppable::{Unstoppable, unstoppable};
pub use when_all::{JoinAll, WhenAll, WhenAll2, WhenAll3, WhenAll4, WhenAll5, join_all, when_all};
pub use when_any::{WhenAny, WhenAny2, WhenAny3, WhenAny4, WhenAny5, when_any};
pub use yield_now::{YieldNow, yield_now};

pub(crate) type PanicPayload = Box<dyn Any + Send + 'static>;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<TaskShared>>> = const { RefCell::new(None) };
}

/// Spawns a future onto the current thread's executor.
///
/// The returned [`JoinHandle`] can stop the task, await its output
/// (`None` when stopped) or block until completion. Dropping the handle
/// detaches; the task runs to completion.
///
/// # Panics
///
/// Panics when the thread has no live executor.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    Executor::current().spawn(future)
}

/// Returns the stop token of the task this code is running inside, if
/// any.
#[must_use]
pub fn current_stop_token() -> Option<StopToken> {
    CURRENT_TASK.with(|current| Some(current.borrow().as_ref()?.stop.clone()))
}

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const COMPLETE: u8 = 2;

/// Per-task state shared between the executor, the task's wakers and its
/// [`JoinHandle`]/[`StopHandle`]. Always `Send + Sync`; the future itself
/// never leaves the owning thread.
pub(crate) struct TaskShared {
    id: Id,
    state: AtomicU8,
    /// Non-zero while an [`unstoppable`] section is in flight.
    shield: AtomicU32,
    stop: StopToken,
    remote: Arc<Shared>,
}

// === impl TaskShared ===

impl TaskShared {
    pub(crate) fn new(id: Id, stop: StopToken, remote: Arc<Shared>) -> Self {
        Self {
            id,
            // spawned tasks enter the ready queue immediately
            state: AtomicU8::new(SCHEDULED),
            shield: AtomicU32::new(0),
            stop,
            remote,
        }
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub(crate) fn begin_poll(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    pub(crate) fn mark_complete(&self) {
        self.state.store(COMPLETE, Ordering::Release);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETE
    }

    pub(crate) fn shield_depth(&self) -> u32 {
        self.shield.load(Ordering::Acquire)
    }

    pub(crate) fn raise_shield(&self) {
        self.shield.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn lower_shield(&self) {
        if self.shield.fetch_sub(1, Ordering::AcqRel) == 1 && self.stop.stop_requested() {
            // a deferred stop request becomes deliverable now
            self.wake_task();
        }
    }

    /// Schedules the task, at most once per poll cycle. Local wakes go to
    /// the ready queue directly, foreign wakes through the post queue.
    pub(crate) fn wake_task(&self) {
        if self
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::trace!(id = ?self.id, "task woken");

        let delivered_locally = Executor::try_current().is_some_and(|exec| {
            if Arc::ptr_eq(exec.shared(), &self.remote) {
                exec.schedule_local(self.id);
                true
            } else {
                false
            }
        });
        if !delivered_locally {
            self.remote.push(Message::Wake(self.id));
        }
    }
}

impl Wake for TaskShared {
    fn wake(self: Arc<Self>) {
        self.wake_task();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_task();
    }
}

pub(crate) struct TaskGuard {
    previous: Option<Arc<TaskShared>>,
}

/// Marks `task` as the one running on this thread for the duration of a
/// poll.
pub(crate) fn enter_task(task: Arc<TaskShared>) -> TaskGuard {
    let previous = CURRENT_TASK.with(|current| current.borrow_mut().replace(task));
    TaskGuard { previous }
}

pub(crate) fn current_task() -> Option<Arc<TaskShared>> {
    CURRENT_TASK.with(|current| current.borrow().clone())
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|current| *current.borrow_mut() = self.previous.take());
    }
}

/// Root wrapper of every spawned task: completes with `None` as soon as
/// the task's stop token fires (and no shield is held), without polling
/// the body again. The body is dropped by the executor right after, which
/// releases timer entries, readiness waiters and queue slots through
/// their `Drop` impls.
#[pin_project]
pub(crate) struct Stoppable<F> {
    token: StopToken,
    task: Option<Arc<TaskShared>>,
    reg: Option<StopRegistration>,
    #[pin]
    future: F,
}

impl<F> Stoppable<F> {
    pub(crate) fn new(token: StopToken, task: Option<Arc<TaskShared>>, future: F) -> Self {
        Self {
            token,
            task,
            reg: None,
            future,
        }
    }
}

impl<F: Future> Future for Stoppable<F> {
    type Output = Option<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if this.token.stop_requested() {
            let shielded = this
                .task
                .as_ref()
                .is_some_and(|task| task.shield_depth() > 0);
            if !shielded {
                tracing::trace!("stop delivered, abandoning task body");
                return Poll::Ready(None);
            }
        }

        if this.reg.is_none() {
            *this.reg = Some(this.token.register_waker(cx.waker().clone()));
        }

        this.future.poll(cx).map(Some)
    }
}

/// Captures panics from the task body so they can be rethrown at the
/// join side instead of unwinding through the run loop.
#[pin_project]
pub(crate) struct CatchUnwind<F> {
    #[pin]
    future: F,
}

impl<F> CatchUnwind<F> {
    pub(crate) fn new(future: F) -> Self {
        Self { future }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match std::panic::catch_unwind(AssertUnwindSafe(|| this.future.poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}
