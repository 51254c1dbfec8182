// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A channel for sending a single value between two tasks (or threads).

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

/// Creates a new oneshot channel.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            value: None,
            rx_waker: None,
            rx_closed: false,
            tx_dropped: false,
        }),
    });
    (
        Sender {
            inner: Some(inner.clone()),
        },
        Receiver { inner },
    )
}

/// Sending half; consumed by [`send`][Sender::send].
pub struct Sender<T> {
    inner: Option<Arc<Inner<T>>>,
}

/// Receiving half; awaiting it resolves to the sent value.
pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    value: Option<T>,
    rx_waker: Option<Waker>,
    rx_closed: bool,
    tx_dropped: bool,
}

/// Error returned when the sender was dropped without sending.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("oneshot sender dropped without sending")]
pub struct RecvError(pub(super) ());

// === impl Sender ===

impl<T> Sender<T> {
    /// Sends `value`, waking the receiver. Sending before the receiver
    /// awaits is fine; the value is buffered.
    ///
    /// # Errors
    ///
    /// Returns the value back when the receiver was closed or dropped.
    pub fn send(mut self, value: T) -> Result<(), T> {
        let inner = self.inner.take().expect("sender used after send");
        let waker = {
            let mut state = inner.state.lock();
            if state.rx_closed {
                return Err(value);
            }
            state.value = Some(value);
            state.rx_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Whether the receiving half has been closed or dropped. A `true`
    /// here means [`send`][Self::send] would fail.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.as_ref().expect("sender used after send");
        inner.state.lock().rx_closed
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let waker = {
                let mut state = inner.state.lock();
                state.tx_dropped = true;
                state.rx_waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("sent", &self.inner.is_none())
            .finish()
    }
}

// === impl Receiver ===

impl<T> Receiver<T> {
    /// Prevents the sender from sending a value.
    ///
    /// A value sent before the close is still delivered by the next
    /// receive.
    pub fn close(&mut self) {
        self.inner.state.lock().rx_closed = true;
    }

    /// Polls for the sent value, registering the receiver's waker.
    ///
    /// # Errors
    ///
    /// [`RecvError`] when the sender was dropped without sending.
    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
        let mut state = self.inner.state.lock();
        if let Some(value) = state.value.take() {
            return Poll::Ready(Ok(value));
        }
        if state.tx_dropped {
            return Poll::Ready(Err(RecvError(())));
        }
        match &state.rx_waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.rx_waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.inner.state.lock().rx_closed = true;
    }
}

impl<T> Future for Receiver<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.poll_recv(cx)
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn send_before_receive() {
        let exec = Executor::new().unwrap();
        let (tx, rx) = channel();
        tx.send(42).unwrap();
        assert_eq!(exec.block_on(rx), Ok(42));
    }

    #[test]
    fn send_to_dropped_receiver_returns_value() {
        let (tx, rx) = channel();
        drop(rx);
        assert_eq!(tx.send(42), Err(42));
    }

    #[test]
    fn dropped_sender_errors() {
        let exec = Executor::new().unwrap();
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert_eq!(exec.block_on(rx), Err(RecvError(())));
    }

    #[test]
    fn value_sent_before_close_is_delivered() {
        let exec = Executor::new().unwrap();
        let (tx, mut rx) = channel();
        tx.send(7).unwrap();
        rx.close();
        assert_eq!(exec.block_on(rx), Ok(7));
    }

    #[test]
    fn cross_thread_handoff() {
        let exec = Executor::new().unwrap();
        let (tx, rx) = channel();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            tx.send("ping").unwrap();
        });

        assert_eq!(exec.block_on(rx), Ok("ping"));
        thread.join().unwrap();
    }
}
