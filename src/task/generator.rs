// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::Cell;
use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// An asynchronous generator: a future that yields a stream of values
/// through the [`Yielder`] handed to its body.
///
/// ```ignore
/// let mut gen = Generator::new(|y| async move {
///     for i in 0..3 {
///         y.yield_item(i).await;
///     }
/// });
/// while let Some(value) = gen.next().await { /* ... */ }
/// ```
///
/// The body may await arbitrary operations between yields.
pub struct Generator<T> {
    slot: Rc<Cell<Option<T>>>,
    future: Option<Pin<Box<dyn Future<Output = ()>>>>,
}

/// Yield handle passed to a [`Generator`] body.
pub struct Yielder<T> {
    slot: Rc<Cell<Option<T>>>,
}

// === impl Generator ===

impl<T: 'static> Generator<T> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let slot = Rc::new(Cell::new(None));
        let future = body(Yielder { slot: slot.clone() });
        Self {
            slot,
            future: Some(Box::pin(future)),
        }
    }

    /// Drives the body until it yields the next value or completes.
    pub fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let Some(future) = self.future.as_mut() else {
            return Poll::Ready(None);
        };

        let done = future.as_mut().poll(cx).is_ready();
        if done {
            self.future = None;
        }
        if let Some(value) = self.slot.take() {
            return Poll::Ready(Some(value));
        }
        if done { Poll::Ready(None) } else { Poll::Pending }
    }

    /// Resolves to the next yielded value, or `None` once the body has
    /// returned.
    pub async fn next(&mut self) -> Option<T> {
        poll_fn(|cx| self.poll_next(cx)).await
    }

    /// Drains the generator into a `Vec`.
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(value) = self.next().await {
            items.push(value);
        }
        items
    }
}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("done", &self.future.is_none())
            .finish()
    }
}

// === impl Yielder ===

impl<T> Yielder<T> {
    /// Hands `value` to the consumer and suspends until the generator is
    /// driven again.
    pub fn yield_item(&self, value: T) -> YieldItem<'_, T> {
        YieldItem {
            slot: &self.slot,
            value: Some(value),
        }
    }
}

impl<T> fmt::Debug for Yielder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder").finish_non_exhaustive()
    }
}

/// Future returned by [`Yielder::yield_item`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct YieldItem<'y, T> {
    slot: &'y Cell<Option<T>>,
    value: Option<T>,
}

// the value is only ever moved out, never pinned
impl<T> Unpin for YieldItem<'_, T> {}

impl<T> Future for YieldItem<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.value.take() {
            Some(value) => {
                debug_assert!(this.slot.take().is_none(), "yielded over an unconsumed value");
                this.slot.set(Some(value));
                // the consumer observes the slot right after this poll
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

impl<T> fmt::Debug for YieldItem<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YieldItem").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::time::sleep;
    use std::time::Duration;

    #[test]
    fn yields_then_finishes() {
        let exec = Executor::new().unwrap();
        let collected = exec.block_on(async {
            let generator = Generator::new(|y| async move {
                for i in 0..5u32 {
                    y.yield_item(i * 10).await;
                }
            });
            generator.collect().await
        });
        assert_eq!(collected, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn body_may_await_between_yields() {
        let exec = Executor::new().unwrap();
        let collected = exec.block_on(async {
            let generator = Generator::new(|y| async move {
                y.yield_item("a").await;
                sleep(Duration::from_millis(5)).await;
                y.yield_item("b").await;
            });
            generator.collect().await
        });
        assert_eq!(collected, vec!["a", "b"]);
    }

    #[test]
    fn empty_generator() {
        let exec = Executor::new().unwrap();
        let collected =
            exec.block_on(Generator::<u32>::new(|_y| async move {}).collect());
        assert!(collected.is_empty());
    }
}
