// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use slab::Slab;

use crate::executor::Executor;
use crate::task::{Id, JoinHandle, StopHandle};

/// An unordered collection of tasks with a uniform output type.
///
/// Completions queue up in finish order; [`next`][Self::next] yields
/// them one at a time (`None` for a task that was stopped).
/// [`shutdown`][Self::shutdown] stops everything and drains. Dropping
/// the group sends a stop request to the remaining tasks and detaches
/// them.
pub struct TaskGroup<T> {
    inner: Rc<GroupInner<T>>,
}

struct GroupInner<T> {
    running: RefCell<Slab<JoinHandle<T>>>,
    completed: RefCell<VecDeque<(Id, Option<T>)>>,
    waker: RefCell<Option<Waker>>,
}

// === impl TaskGroup ===

impl<T: 'static> TaskGroup<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(GroupInner {
                running: RefCell::new(Slab::new()),
                completed: RefCell::new(VecDeque::new()),
                waker: RefCell::new(None),
            }),
        }
    }

    /// Moves an already-spawned task into the group, returning its
    /// stop-only handle.
    pub fn insert(&self, handle: JoinHandle<T>) -> StopHandle {
        let stop = handle.stop_handle();
        let ctxt = handle.context();
        let id = handle.id();
        let key = self.inner.running.borrow_mut().insert(handle);

        let weak = Rc::downgrade(&self.inner);
        ctxt.register_callback(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let Some(handle) = inner.running.borrow_mut().try_remove(key) else {
                return;
            };
            let result = handle
                .try_take()
                .expect("completion callback ran before the result was stored");
            inner.completed.borrow_mut().push_back((id, result));
            if let Some(waker) = inner.waker.borrow_mut().take() {
                waker.wake();
            }
        }));
        stop
    }

    /// Spawns a task on the current executor directly into the group.
    ///
    /// # Panics
    ///
    /// Panics when the thread has no live executor.
    pub fn spawn<F>(&self, future: F) -> StopHandle
    where
        F: Future<Output = T> + 'static,
    {
        self.insert(Executor::current().spawn(future))
    }

    /// Number of tasks in the group, running or awaiting collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.running.borrow().len() + self.inner.completed.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests stop on every running task in the group.
    pub fn stop(&self) {
        for (_, handle) in self.inner.running.borrow().iter() {
            handle.stop();
        }
    }

    /// Resolves with the output of the next task to finish, `None` when
    /// that task was stopped.
    ///
    /// On an empty group this waits until a task is inserted and
    /// completes.
    pub fn next(&self) -> Next<'_, T> {
        Next { group: self }
    }

    /// Like [`next`][Self::next], also reporting which task finished.
    pub fn next_with_id(&self) -> NextWithId<'_, T> {
        NextWithId { group: self }
    }

    /// Stops every task and drains the group.
    pub async fn shutdown(&self) {
        self.stop();
        while !self.is_empty() {
            let _ = self.next().await;
        }
    }

    /// Waits for every task to finish, collecting the outputs of those
    /// that were not stopped.
    pub async fn wait_all(&self) -> Vec<T> {
        let mut outputs = Vec::new();
        while !self.is_empty() {
            if let Some(output) = self.next().await {
                outputs.push(output);
            }
        }
        outputs
    }

    fn poll_next_completion(&self, cx: &mut Context<'_>) -> Poll<(Id, Option<T>)> {
        if let Some(entry) = self.inner.completed.borrow_mut().pop_front() {
            return Poll::Ready(entry);
        }
        *self.inner.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T: 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for TaskGroup<T> {
    fn drop(&mut self) {
        for (_, handle) in self.inner.running.borrow().iter() {
            handle.stop();
        }
    }
}

impl<T> fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("running", &self.inner.running.borrow().len())
            .field("completed", &self.inner.completed.borrow().len())
            .finish()
    }
}

/// Future returned by [`TaskGroup::next`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Next<'group, T> {
    group: &'group TaskGroup<T>,
}

impl<T: 'static> Future for Next<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let (_id, output) = std::task::ready!(self.group.poll_next_completion(cx));
        Poll::Ready(output)
    }
}

impl<T> fmt::Debug for Next<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Future returned by [`TaskGroup::next_with_id`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct NextWithId<'group, T> {
    group: &'group TaskGroup<T>,
}

impl<T: 'static> Future for NextWithId<'_, T> {
    type Output = (Id, Option<T>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.group.poll_next_completion(cx)
    }
}

impl<T> fmt::Debug for NextWithId<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextWithId").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sleep;
    use std::time::{Duration, Instant};

    #[test]
    fn next_yields_in_completion_order() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let group = TaskGroup::new();
            group.spawn(async {
                sleep(Duration::from_millis(40)).await;
                "slow"
            });
            group.spawn(async {
                sleep(Duration::from_millis(10)).await;
                "fast"
            });

            assert_eq!(group.next().await, Some("fast"));
            assert_eq!(group.next().await, Some("slow"));
            assert!(group.is_empty());
        });
    }

    #[test]
    fn shutdown_is_prompt() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let group = TaskGroup::new();
            for _ in 0..100 {
                group.spawn(async {
                    sleep(Duration::from_secs(3600)).await;
                });
            }
            assert_eq!(group.len(), 100);

            let begin = Instant::now();
            group.shutdown().await;
            assert!(group.is_empty());
            assert!(
                begin.elapsed() < Duration::from_millis(100),
                "shutdown took {:?}",
                begin.elapsed()
            );
        });
    }

    #[test]
    fn wait_all_skips_stopped() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let group = TaskGroup::new();
            for i in 0..4u32 {
                group.spawn(async move {
                    sleep(Duration::from_millis(5)).await;
                    i
                });
            }
            let stopper = group.spawn(async {
                sleep(Duration::from_secs(3600)).await;
                99
            });
            stopper.stop();

            let mut outputs = group.wait_all().await;
            outputs.sort_unstable();
            assert_eq!(outputs, vec![0, 1, 2, 3]);
        });
    }
}
