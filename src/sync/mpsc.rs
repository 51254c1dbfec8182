// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Bounded multi-producer, single-consumer channel.
//!
//! Senders suspend while the buffer is full, queued FIFO behind the
//! capacity. Closing the receiver fails every pending and future send
//! with the value handed back; dropping the last sender ends the stream
//! after the buffered values drain.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::sync::wait_list::WaitList;

/// Creates a bounded channel with room for `capacity` values.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "mpsc channel capacity must be non-zero");
    let chan = Arc::new(Chan {
        list: WaitList::new(ChanState {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            senders: 1,
            rx_closed: false,
            rx_waker: None,
        }),
    });
    (Sender { chan: chan.clone() }, Receiver { chan })
}

/// Sending half; clonable.
pub struct Sender<T> {
    chan: Arc<Chan<T>>,
}

/// Receiving half.
pub struct Receiver<T> {
    chan: Arc<Chan<T>>,
}

struct Chan<T> {
    list: WaitList<ChanState<T>>,
}

struct ChanState<T> {
    buf: VecDeque<T>,
    capacity: usize,
    senders: usize,
    rx_closed: bool,
    rx_waker: Option<Waker>,
}

/// Error returned by [`Sender::send`], carrying the undelivered value.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("sending on a closed channel")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

impl<T> ChanState<T> {
    fn has_room(&self) -> bool {
        self.rx_closed || self.buf.len() < self.capacity
    }
}

// === impl Sender ===

impl<T> Sender<T> {
    /// Sends `value`, suspending while the buffer is full.
    ///
    /// # Errors
    ///
    /// [`SendError`] carrying `value` when the receiver is closed.
    pub fn send(&self, value: T) -> Send<'_, T> {
        Send {
            chan: &self.chan,
            value: Some(value),
            key: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chan.list.with(|s| s.rx_closed)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.chan.list.with(|s| s.senders += 1);
        Self {
            chan: self.chan.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let waker = self.chan.list.with(|s| {
            s.senders -= 1;
            if s.senders == 0 {
                s.rx_waker.take()
            } else {
                None
            }
        });
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

/// Future returned by [`Sender::send`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Send<'a, T> {
    chan: &'a Chan<T>,
    value: Option<T>,
    key: Option<usize>,
}

// the value is only ever moved out, never pinned
impl<T> Unpin for Send<'_, T> {}

impl<T> Future for Send<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let value = &mut this.value;
        let mut rx_waker = None;
        let mut closed = false;

        let progress = this.chan.list.poll_wait(&mut this.key, cx, |s| {
            if s.rx_closed {
                closed = true;
                return true;
            }
            if s.buf.len() < s.capacity {
                s.buf.push_back(value.take().expect("send polled after completion"));
                rx_waker = s.rx_waker.take();
                true
            } else {
                false
            }
        });

        match progress {
            Poll::Ready(()) if closed => Poll::Ready(Err(SendError(
                value.take().expect("send polled after completion"),
            ))),
            Poll::Ready(()) => {
                if let Some(waker) = rx_waker {
                    waker.wake();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Send<'_, T> {
    fn drop(&mut self) {
        if self.chan.list.cancel_waiter(&mut self.key) {
            // the room hinted to us goes to the next queued sender
            self.chan.list.wake_one(|s: &mut ChanState<T>| ChanState::has_room(s));
        }
    }
}

impl<T> fmt::Debug for Send<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Send").finish_non_exhaustive()
    }
}

// === impl Receiver ===

impl<T> Receiver<T> {
    /// Receives the next value, suspending while the buffer is empty and
    /// senders remain. Resolves to `None` once every sender is gone and
    /// the buffer has drained.
    pub fn recv(&mut self) -> Recv<'_, T> {
        Recv { chan: &self.chan }
    }

    /// Takes a buffered value without suspending.
    pub fn try_recv(&mut self) -> Option<T> {
        let value = self.chan.list.with(|s| s.buf.pop_front());
        if value.is_some() {
            self.chan.list.wake_one(|s: &mut ChanState<T>| ChanState::has_room(s));
        }
        value
    }

    /// Closes the receiving side: every pending and future send fails
    /// with its value handed back. Already-buffered values are dropped.
    pub fn close(&mut self) {
        self.chan.list.with(|s| {
            s.rx_closed = true;
            s.buf.clear();
        });
        self.chan.list.wake_all(|_| true);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chan.list.with(|s| s.buf.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("buffered", &self.len())
            .finish()
    }
}

/// Future returned by [`Receiver::recv`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Recv<'a, T> {
    chan: &'a Chan<T>,
}

impl<T> Future for Recv<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut got_value = false;
        let result = self.chan.list.with(|s| {
            if let Some(value) = s.buf.pop_front() {
                got_value = true;
                return Poll::Ready(Some(value));
            }
            if s.senders == 0 {
                return Poll::Ready(None);
            }
            match &s.rx_waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                _ => s.rx_waker = Some(cx.waker().clone()),
            }
            Poll::Pending
        });
        if got_value {
            // a slot opened up for the longest-waiting sender
            self.chan.list.wake_one(|s: &mut ChanState<T>| ChanState::has_room(s));
        }
        result
    }
}

impl<T> fmt::Debug for Recv<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recv").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn values_arrive_in_order() {
        let exec = Executor::new().unwrap();
        let (tx, mut rx) = channel(4);

        exec.block_on(async {
            let producer = crate::task::spawn(async move {
                for i in 0..10u32 {
                    tx.send(i).await.unwrap();
                }
            });

            let mut got = Vec::new();
            while let Some(value) = rx.recv().await {
                got.push(value);
            }
            assert_eq!(got, (0..10).collect::<Vec<_>>());
            producer.await;
        });
    }

    #[test]
    fn backpressure_suspends_senders() {
        let exec = Executor::new().unwrap();
        let (tx, mut rx) = channel(1);

        exec.block_on(async {
            tx.send(1).await.unwrap();
            let tx2 = tx.clone();
            let blocked = crate::task::spawn(async move { tx2.send(2).await });

            crate::task::yield_now().await;
            assert!(!blocked.is_finished());

            assert_eq!(rx.recv().await, Some(1));
            assert_eq!(blocked.await, Some(Ok(())));
            assert_eq!(rx.recv().await, Some(2));
        });
    }

    #[test]
    fn receiver_close_fails_pending_and_future_sends() {
        let exec = Executor::new().unwrap();
        let (tx, mut rx) = channel(1);

        exec.block_on(async {
            tx.send(1).await.unwrap();
            let tx2 = tx.clone();
            let pending = crate::task::spawn(async move { tx2.send(2).await });
            crate::task::yield_now().await;

            rx.close();
            // the pending send gets its value back
            assert_eq!(pending.await, Some(Err(SendError(2))));
            // and so does any later one
            assert_eq!(tx.send(3).await, Err(SendError(3)));
        });
    }

    #[test]
    fn sender_drop_ends_stream() {
        let exec = Executor::new().unwrap();
        let (tx, mut rx) = channel(2);

        exec.block_on(async {
            tx.send(5).await.unwrap();
            drop(tx);
            assert_eq!(rx.recv().await, Some(5));
            assert_eq!(rx.recv().await, None);
        });
    }
}
