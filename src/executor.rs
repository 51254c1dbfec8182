// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-thread run loop.
//!
//! An [`Executor`] owns the ready queue, the timer service and the I/O
//! driver for one thread. Construction installs it as the thread's current
//! executor; handles are cheap clones. Only the owning thread may run
//! tasks, but any thread may [`post`][Remote::post] work or wake a task;
//! cross-thread submissions funnel through a mutex-protected queue that
//! wakes the poller.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

use parking_lot::Mutex;

use crate::reactor::{LoopWaker, Reactor};
use crate::stop::StopToken;
use crate::task::{Id, TaskShared};
use crate::time::timer::Timer;

thread_local! {
    static CURRENT: RefCell<Option<Weak<Runtime>>> = const { RefCell::new(None) };
}

/// How many ready tasks a single loop iteration runs before giving the
/// timer and the poller another look.
const TICK_BATCH: usize = 64;

/// Handle to the thread's run loop. Cheap to clone; the runtime lives
/// until the last handle drops.
#[derive(Clone)]
pub struct Executor {
    pub(crate) rt: Rc<Runtime>,
}

pub(crate) struct Runtime {
    tasks: RefCell<HashMap<Id, TaskSlot>>,
    ready: RefCell<VecDeque<Id>>,
    running: Cell<bool>,
    pub(crate) timer: Timer,
    pub(crate) reactor: Reactor,
    pub(crate) shared: Arc<Shared>,
}

struct TaskSlot {
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
    shared: Arc<TaskShared>,
}

/// State reachable from foreign threads: the post queue and the handle
/// that wakes the poller.
pub(crate) struct Shared {
    queue: Mutex<VecDeque<Message>>,
    waker: LoopWaker,
}

pub(crate) enum Message {
    Wake(Id),
    Post(Box<dyn FnOnce() + Send>),
}

/// Thread-safe handle for submitting work to an [`Executor`] from any
/// thread.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<Shared>,
}

/// Cheap non-owning executor reference held by runtime resources, so that
/// resources parked inside the task map do not keep the runtime alive.
#[derive(Clone)]
pub(crate) struct WeakExec {
    rt: Weak<Runtime>,
}

// === impl Executor ===

impl Executor {
    /// Creates a run loop and installs it as this thread's current
    /// executor.
    ///
    /// # Panics
    ///
    /// Panics if the thread already has a live executor installed.
    pub fn new() -> io::Result<Self> {
        let (reactor, waker) = Reactor::new(1024)?;
        Self::install(reactor, waker)
    }

    /// Like [`new`][Self::new], but drives I/O through io_uring instead
    /// of epoll.
    #[cfg(feature = "uring")]
    pub fn new_uring() -> io::Result<Self> {
        let (reactor, waker) = Reactor::new_uring(256)?;
        Self::install(reactor, waker)
    }

    fn install(reactor: Reactor, waker: LoopWaker) -> io::Result<Self> {
        let rt = Rc::new(Runtime {
            tasks: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
            timer: Timer::new(),
            reactor,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                waker,
            }),
        });

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            assert!(
                current.as_ref().is_none_or(|weak| weak.upgrade().is_none()),
                "an executor is already installed on this thread"
            );
            *current = Some(Rc::downgrade(&rt));
        });
        tracing::debug!("executor installed");
        Ok(Self { rt })
    }

    /// Returns the executor installed on the current thread.
    ///
    /// # Panics
    ///
    /// Panics when the thread has no live executor.
    #[must_use]
    pub fn current() -> Self {
        Self::try_current().expect("no executor installed on this thread")
    }

    #[must_use]
    pub fn try_current() -> Option<Self> {
        CURRENT.with(|current| {
            let current = current.borrow();
            let rt = current.as_ref()?.upgrade()?;
            Some(Self { rt })
        })
    }

    /// Returns a thread-safe handle for posting work from other threads.
    #[must_use]
    pub fn remote(&self) -> Remote {
        Remote {
            shared: self.rt.shared.clone(),
        }
    }

    /// Enqueues a callable to run on the loop thread, in post order.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.rt.shared.push(Message::Post(Box::new(f)));
    }

    /// Runs the loop until `token` fires.
    ///
    /// Each iteration fires due timers, drains the post queue, runs a
    /// bounded batch of ready tasks and then blocks in the I/O driver
    /// until the next timer deadline or new work.
    pub fn run(&self, token: &StopToken) {
        let _guard = self.enter();
        let _span = tracing::debug_span!("executor run").entered();
        // a stop request from another thread must wake the poller
        let _wake = token.register_waker(self.loop_waker());

        loop {
            let (expired, _) = self.rt.timer.turn();
            self.drain_remote();
            let more = self.tick(TICK_BATCH);

            if token.stop_requested() {
                tracing::debug!("stop requested, leaving run loop");
                return;
            }
            if expired > 0 || more {
                continue;
            }

            self.park();
        }
    }

    /// Runs the loop until `future` completes, returning its output.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let _guard = self.enter();
        let _span = tracing::debug_span!("executor block_on").entered();

        let root = Arc::new(RootWaker {
            woken: AtomicBool::new(true),
            shared: self.rt.shared.clone(),
        });
        let waker = Waker::from(root.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);

        loop {
            if root.woken.swap(false, Ordering::AcqRel)
                && let Poll::Ready(output) = future.as_mut().poll(&mut cx)
            {
                return output;
            }

            let (expired, _) = self.rt.timer.turn();
            self.drain_remote();
            let more = self.tick(TICK_BATCH);

            if expired > 0 || more || root.woken.load(Ordering::Acquire) {
                continue;
            }

            self.park();
        }
    }

    fn park(&self) {
        // tasks polled this iteration may have registered new timers, so
        // the wait bound comes from the timer, not the last turn
        let timeout = self
            .rt
            .timer
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        tracing::trace!(?timeout, "parking in driver");
        if let Err(err) = self.rt.reactor.turn(timeout) {
            tracing::error!("i/o driver poll failed: {err}");
        }
    }

    /// Runs up to `n` ready tasks; returns whether ready work remains.
    fn tick(&self, n: usize) -> bool {
        for _ in 0..n {
            let Some(id) = self.rt.ready.borrow_mut().pop_front() else {
                return false;
            };
            self.run_task(id);
        }
        !self.rt.ready.borrow().is_empty()
    }

    fn run_task(&self, id: Id) {
        // The future is taken out of its slot while polled so that the
        // task map stays borrowable from inside the poll (spawns, wakes).
        let Some((mut future, shared)) = ({
            let mut tasks = self.rt.tasks.borrow_mut();
            tasks
                .get_mut(&id)
                .and_then(|slot| Some((slot.future.take()?, slot.shared.clone())))
        }) else {
            // completed or mid-poll; a stale wakeup
            return;
        };

        shared.begin_poll();
        let waker = Waker::from(shared.clone());
        let mut cx = Context::from_waker(&waker);

        let _task_guard = crate::task::enter_task(shared.clone());
        let result = future.as_mut().poll(&mut cx);
        drop(_task_guard);

        match result {
            Poll::Ready(()) => {
                tracing::trace!(?id, "task completed");
                let slot = self.rt.tasks.borrow_mut().remove(&id);
                shared.mark_complete();
                // the future's drop may reach back into the runtime, so it
                // must run with the task map unborrowed
                drop(future);
                drop(slot);
            }
            Poll::Pending => {
                if let Some(slot) = self.rt.tasks.borrow_mut().get_mut(&id) {
                    slot.future = Some(future);
                }
            }
        }
    }

    fn drain_remote(&self) {
        let drained = std::mem::take(&mut *self.rt.shared.queue.lock());
        for message in drained {
            match message {
                Message::Wake(id) => self.rt.ready.borrow_mut().push_back(id),
                Message::Post(f) => f(),
            }
        }
    }

    fn enter(&self) -> RunGuard<'_> {
        assert!(
            !self.rt.running.get(),
            "the executor is already running on this thread"
        );
        self.rt.running.set(true);
        RunGuard { rt: &self.rt }
    }

    fn loop_waker(&self) -> Waker {
        Waker::from(Arc::new(RootWaker {
            woken: AtomicBool::new(false),
            shared: self.rt.shared.clone(),
        }))
    }

    // === task plumbing used by `task::` ===

    pub(crate) fn insert_task(
        &self,
        shared: Arc<TaskShared>,
        future: Pin<Box<dyn Future<Output = ()>>>,
    ) {
        let id = shared.id();
        self.rt.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                future: Some(future),
                shared,
            },
        );
        self.rt.ready.borrow_mut().push_back(id);
        tracing::trace!(?id, "task spawned");
    }

    pub(crate) fn schedule_local(&self, id: Id) {
        self.rt.ready.borrow_mut().push_back(id);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.rt.running.get()
    }

    pub(crate) fn downgrade(&self) -> WeakExec {
        WeakExec {
            rt: Rc::downgrade(&self.rt),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.rt.shared
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("tasks", &self.rt.tasks.borrow().len())
            .field("ready", &self.rt.ready.borrow().len())
            .field("running", &self.rt.running.get())
            .finish()
    }
}

struct RunGuard<'rt> {
    rt: &'rt Runtime,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.rt.running.set(false);
    }
}

struct RootWaker {
    woken: AtomicBool,
    shared: Arc<Shared>,
}

impl Wake for RootWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::Release);
        self.shared.notify();
    }
}

// === impl Shared ===

impl Shared {
    pub(crate) fn push(&self, message: Message) {
        self.queue.lock().push_back(message);
        self.notify();
    }

    pub(crate) fn notify(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!("failed to wake run loop: {err}");
        }
    }
}

// === impl Remote ===

impl Remote {
    /// Enqueues a callable on the owning thread's loop and wakes it.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.push(Message::Post(Box::new(f)));
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote").finish_non_exhaustive()
    }
}

// === impl WeakExec ===

impl WeakExec {
    pub(crate) fn get(&self) -> Option<Executor> {
        Some(Executor {
            rt: self.rt.upgrade()?,
        })
    }
}

impl fmt::Debug for WeakExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakExec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::StopSource;
    use std::time::Duration;

    #[test]
    fn block_on_returns_value() {
        let exec = Executor::new().unwrap();
        assert_eq!(exec.block_on(async { 1 + 1 }), 2);
    }

    #[test]
    fn run_exits_on_stop() {
        let exec = Executor::new().unwrap();
        let source = StopSource::new();
        let remote = exec.remote();

        let stopper = source.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let _ = remote;
            stopper.request_stop();
        });

        let begin = Instant::now();
        exec.run(&source.token());
        assert!(begin.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn posts_run_in_order_on_loop_thread() {
        let exec = Executor::new().unwrap();
        let remote = exec.remote();
        let source = StopSource::new();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let order = order.clone();
            remote.post(move || order.lock().push(i));
        }
        let stopper = source.clone();
        remote.post(move || { stopper.request_stop(); });

        exec.run(&source.token());
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn second_executor_on_thread_panics() {
        let exec = Executor::new().unwrap();
        let result = std::panic::catch_unwind(Executor::new);
        assert!(result.is_err());
        drop(exec);
        // the previous runtime is gone, installing again is fine
        let _exec = Executor::new().unwrap();
    }
}
