// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use pin_project::pin_project;

use crate::time::sleep::{Sleep, sleep, sleep_until};

/// Requires a future to complete before `duration` has elapsed.
///
/// On elapse the inner future is dropped, which cancels any operation it
/// had in flight, and `Err(Elapsed)` is returned.
pub fn timeout<F>(duration: Duration, future: F) -> Timeout<F::IntoFuture>
where
    F: IntoFuture,
{
    Timeout {
        sleep: sleep(duration),
        future: Some(future.into_future()),
    }
}

/// Requires a future to complete before `deadline` has been reached.
pub fn timeout_at<F>(deadline: Instant, future: F) -> Timeout<F::IntoFuture>
where
    F: IntoFuture,
{
    Timeout {
        sleep: sleep_until(deadline),
        future: Some(future.into_future()),
    }
}

/// Future returned by [`timeout`] and [`timeout_at`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Timeout<F> {
    #[pin]
    sleep: Sleep,
    #[pin]
    future: Option<F>,
}

/// Error returned when a [`Timeout`] elapses before its future completes.
#[derive(Debug, PartialEq, Eq)]
pub struct Elapsed(pub(crate) ());

// === impl Timeout ===

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Some(future) = this.future.as_mut().as_pin_mut()
            && let Poll::Ready(output) = future.poll(cx)
        {
            return Poll::Ready(Ok(output));
        }

        match this.sleep.poll(cx) {
            Poll::Ready(()) => {
                // drop the inner future before reporting the elapse so its
                // in-flight work is torn down first
                this.future.set(None);
                Poll::Ready(Err(Elapsed(())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("deadline elapsed")
    }
}

impl std::error::Error for Elapsed {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn completes_in_time() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(timeout(Duration::from_secs(5), async { 7 }));
        assert_eq!(out, Ok(7));
    }

    #[test]
    fn elapses() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(timeout(
            Duration::from_millis(20),
            sleep(Duration::from_secs(3600)),
        ));
        assert_eq!(out, Err(Elapsed(())));
    }
}
