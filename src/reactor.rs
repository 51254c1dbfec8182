// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The I/O driver.
//!
//! Native handles are registered with the OS completion facility once,
//! with full read/write interest. Readiness is cached per descriptor;
//! operations consult the cache, perform the syscall, and on
//! `WouldBlock` clear the cached bit and park until the kernel reports
//! the descriptor ready again. Completion dispatch is by slab key, the
//! Rust rendition of the completion-key / `user_data` pattern.
//!
//! Two backends implement this contract: epoll (via `mio`, the
//! default) and, behind the `uring` feature, io_uring driving the same
//! readiness protocol with multishot `POLL_ADD` submissions and
//! `ASYNC_CANCEL` for teardown.

cfg_if::cfg_if! {
    if #[cfg(feature = "uring")] {
        pub(crate) mod uring;
    }
}

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Interest, Token};
use slab::Slab;

use crate::io::{IoError, IoResult, PollEvents};

/// Key reserved for the cross-thread wakeup handle.
const WAKER_TOKEN: Token = Token(usize::MAX);

pub(crate) struct Reactor {
    backend: Backend,
    sources: RefCell<Slab<Rc<ScheduledIo>>>,
}

enum Backend {
    Epoll(EpollBackend),
    #[cfg(feature = "uring")]
    Uring(uring::UringBackend),
}

/// Handle that wakes a parked run loop from any thread.
pub(crate) enum LoopWaker {
    Mio(mio::Waker),
    #[cfg(feature = "uring")]
    EventFd(std::sync::Arc<std::os::fd::OwnedFd>),
}

// === impl LoopWaker ===

impl LoopWaker {
    pub(crate) fn wake(&self) -> io::Result<()> {
        match self {
            Self::Mio(waker) => waker.wake(),
            #[cfg(feature = "uring")]
            Self::EventFd(fd) => uring::signal_eventfd(fd),
        }
    }
}

impl fmt::Debug for LoopWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("LoopWaker")
    }
}

// === impl Reactor ===

impl Reactor {
    /// Creates the default (epoll) driver.
    pub(crate) fn new(capacity: usize) -> io::Result<(Self, LoopWaker)> {
        let (backend, waker) = EpollBackend::new(capacity)?;
        Ok((
            Self {
                backend: Backend::Epoll(backend),
                sources: RefCell::new(Slab::new()),
            },
            waker,
        ))
    }

    /// Creates an io_uring driver.
    #[cfg(feature = "uring")]
    pub(crate) fn new_uring(entries: u32) -> io::Result<(Self, LoopWaker)> {
        let (backend, waker) = uring::UringBackend::new(entries)?;
        Ok((
            Self {
                backend: Backend::Uring(backend),
                sources: RefCell::new(Slab::new()),
            },
            waker,
        ))
    }

    pub(crate) fn register(&self, fd: RawFd) -> io::Result<Rc<ScheduledIo>> {
        let mut sources = self.sources.borrow_mut();
        let entry = sources.vacant_entry();
        let key = entry.key();

        match &self.backend {
            Backend::Epoll(epoll) => epoll.register(fd, key)?,
            #[cfg(feature = "uring")]
            Backend::Uring(uring) => uring.register(fd, key)?,
        }
        tracing::trace!(fd, key, "descriptor registered with driver");

        let sched = Rc::new(ScheduledIo {
            key,
            readiness: Cell::new(PollEvents::empty()),
            cancel_seq: Cell::new(0),
            removed: Cell::new(false),
            waiters: RefCell::new(Slab::new()),
        });
        entry.insert(sched.clone());
        Ok(sched)
    }

    pub(crate) fn deregister(&self, fd: RawFd, sched: &ScheduledIo) -> io::Result<()> {
        self.sources.borrow_mut().try_remove(sched.key);
        match &self.backend {
            Backend::Epoll(epoll) => epoll.deregister(fd)?,
            #[cfg(feature = "uring")]
            Backend::Uring(uring) => uring.deregister(fd, sched.key)?,
        }
        tracing::trace!(fd, key = sched.key, "descriptor deregistered");
        Ok(())
    }

    /// Blocks until the driver reports completions or `timeout`
    /// elapses, then dispatches readiness to the affected descriptors.
    pub(crate) fn turn(&self, timeout: Option<Duration>) -> io::Result<()> {
        let dispatch = &mut |key: usize, ready: PollEvents| {
            let sched = self.sources.borrow().get(key).cloned();
            if let Some(sched) = sched {
                sched.advance(ready);
            }
        };
        match &self.backend {
            Backend::Epoll(epoll) => epoll.poll_events(timeout, dispatch),
            #[cfg(feature = "uring")]
            Backend::Uring(uring) => uring.poll_events(timeout, dispatch),
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("sources", &self.sources.borrow().len())
            .finish()
    }
}

// === impl EpollBackend ===

struct EpollBackend {
    poll: RefCell<mio::Poll>,
    events: RefCell<mio::Events>,
}

impl EpollBackend {
    fn new(capacity: usize) -> io::Result<(Self, LoopWaker)> {
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok((
            Self {
                poll: RefCell::new(poll),
                events: RefCell::new(mio::Events::with_capacity(capacity)),
            },
            LoopWaker::Mio(waker),
        ))
    }

    fn register(&self, fd: RawFd, key: usize) -> io::Result<()> {
        self.poll.borrow().registry().register(
            &mut SourceFd(&fd),
            Token(key),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.borrow().registry().deregister(&mut SourceFd(&fd))
    }

    fn poll_events(
        &self,
        timeout: Option<Duration>,
        dispatch: &mut dyn FnMut(usize, PollEvents),
    ) -> io::Result<()> {
        let mut events = self.events.borrow_mut();
        match self.poll.borrow_mut().poll(&mut events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        for event in events.iter() {
            if event.token() == WAKER_TOKEN {
                continue;
            }
            let mut ready = PollEvents::empty();
            if event.is_readable() || event.is_read_closed() {
                ready |= PollEvents::IN;
            }
            if event.is_writable() || event.is_write_closed() {
                ready |= PollEvents::OUT;
            }
            if event.is_error() {
                ready |= PollEvents::ERR;
            }
            if event.is_read_closed() || event.is_write_closed() {
                ready |= PollEvents::HUP;
            }
            if event.is_priority() {
                ready |= PollEvents::PRI;
            }
            dispatch(event.token().0, ready);
        }
        Ok(())
    }
}

// === impl ScheduledIo ===

/// Per-descriptor readiness state shared between the driver and every
/// in-flight operation on the descriptor.
pub(crate) struct ScheduledIo {
    key: usize,
    readiness: Cell<PollEvents>,
    /// Bumped by `cancel`; an operation that recorded an older sequence
    /// resolves to `Canceled` instead of retrying.
    cancel_seq: Cell<u64>,
    removed: Cell<bool>,
    waiters: RefCell<Slab<Waiter>>,
}

struct Waiter {
    interest: PollEvents,
    waker: Waker,
}

impl ScheduledIo {
    /// Merges freshly reported readiness and wakes matching waiters.
    fn advance(&self, ready: PollEvents) {
        self.readiness.set(self.readiness.get() | ready);
        tracing::trace!(key = self.key, ?ready, "readiness advanced");

        let wakers: Vec<Waker> = {
            let waiters = self.waiters.borrow();
            waiters
                .iter()
                .filter(|(_, w)| {
                    w.interest
                        .intersects(ready | PollEvents::ERR | PollEvents::HUP)
                })
                .map(|(_, w)| w.waker.clone())
                .collect()
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// An operation observed `WouldBlock`; the cached bits are stale.
    pub(crate) fn clear_readiness(&self, interest: PollEvents) {
        self.readiness.set(self.readiness.get() - interest);
    }

    /// Cancels every in-flight operation on this descriptor. The
    /// waiters resolve to [`IoError::Canceled`] when next polled.
    pub(crate) fn cancel(&self) {
        self.cancel_seq.set(self.cancel_seq.get() + 1);
        let wakers: Vec<Waker> = {
            let waiters = self.waiters.borrow();
            waiters.iter().map(|(_, w)| w.waker.clone()).collect()
        };
        tracing::trace!(
            key = self.key,
            waiters = wakers.len(),
            "cancelling in-flight ops"
        );
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.set(true);
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.get()
    }

    /// Core readiness wait used by every operation.
    ///
    /// `state` carries the per-operation cancel sequence and waiter
    /// slot; callers keep it across polls and pass it to
    /// [`Self::remove_waiter`] on drop.
    pub(crate) fn poll_ready(
        &self,
        cx: &mut Context<'_>,
        interest: PollEvents,
        state: &mut OpState,
    ) -> Poll<IoResult<PollEvents>> {
        if self.removed.get() {
            return Poll::Ready(Err(IoError::Canceled));
        }
        match state.seq {
            None => state.seq = Some(self.cancel_seq.get()),
            Some(seq) if self.cancel_seq.get() != seq => {
                self.remove_waiter(state);
                return Poll::Ready(Err(IoError::Canceled));
            }
            Some(_) => {}
        }

        let ready = self.readiness.get() & (interest | PollEvents::ERR | PollEvents::HUP);
        if !ready.is_empty() {
            self.remove_waiter(state);
            return Poll::Ready(Ok(ready));
        }

        let mut waiters = self.waiters.borrow_mut();
        match state.waiter {
            Some(key) => {
                let waiter = &mut waiters[key];
                waiter.interest = interest;
                if !waiter.waker.will_wake(cx.waker()) {
                    waiter.waker = cx.waker().clone();
                }
            }
            None => {
                let key = waiters.insert(Waiter {
                    interest,
                    waker: cx.waker().clone(),
                });
                state.waiter = Some(key);
            }
        }
        Poll::Pending
    }

    pub(crate) fn remove_waiter(&self, state: &mut OpState) {
        if let Some(key) = state.waiter.take() {
            self.waiters.borrow_mut().try_remove(key);
        }
    }
}

impl fmt::Debug for ScheduledIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledIo")
            .field("key", &self.key)
            .field("readiness", &self.readiness.get())
            .field("removed", &self.removed.get())
            .finish()
    }
}

/// Per-operation state: the cancel sequence observed when the
/// operation enrolled plus its waiter slot, both consulted on every
/// poll.
#[derive(Debug, Default)]
pub(crate) struct OpState {
    seq: Option<u64>,
    waiter: Option<usize>,
}

impl OpState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Future resolving once a descriptor reports the requested readiness.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub(crate) struct Readiness {
    sched: Rc<ScheduledIo>,
    interest: PollEvents,
    state: OpState,
}

impl Readiness {
    pub(crate) fn new(sched: Rc<ScheduledIo>, interest: PollEvents) -> Self {
        Self {
            sched,
            interest,
            state: OpState::new(),
        }
    }
}

impl Future for Readiness {
    type Output = IoResult<PollEvents>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.sched.poll_ready(cx, this.interest, &mut this.state)
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        self.sched.remove_waiter(&mut self.state);
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("interest", &self.interest)
            .finish_non_exhaustive()
    }
}
