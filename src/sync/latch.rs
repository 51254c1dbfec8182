// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::sync::wait_list::{WaitList, block_until};

/// A single-use countdown barrier.
///
/// Waiters suspend until the counter reaches zero; the count never goes
/// back up.
pub struct Latch {
    list: WaitList<LatchState>,
}

struct LatchState {
    count: usize,
}

// === impl Latch ===

impl Latch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            list: WaitList::new(LatchState { count }),
        }
    }

    /// Decrements the counter by `n` (saturating); wakes all waiters
    /// when it reaches zero.
    pub fn count_down(&self, n: usize) {
        let released = self.list.with(|s| {
            s.count = s.count.saturating_sub(n);
            s.count == 0
        });
        if released {
            self.list.wake_all(|_| true);
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.list.with(|s| s.count)
    }

    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.count() == 0
    }

    /// Resolves once the counter reaches zero.
    pub fn wait(&self) -> WaitLatch<'_> {
        WaitLatch {
            latch: self,
            key: None,
        }
    }

    /// Parks the calling thread until the counter reaches zero.
    pub fn blocking_wait(&self) {
        let mut key = None;
        block_until(|cx| self.list.poll_wait(&mut key, cx, |s| s.count == 0));
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("count", &self.count()).finish()
    }
}

/// Future returned by [`Latch::wait`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct WaitLatch<'a> {
    latch: &'a Latch,
    key: Option<usize>,
}

impl Future for WaitLatch<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.latch.list.poll_wait(&mut this.key, cx, |s| s.count == 0)
    }
}

impl Drop for WaitLatch<'_> {
    fn drop(&mut self) {
        self.latch.list.cancel_waiter(&mut self.key);
    }
}

impl fmt::Debug for WaitLatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitLatch").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::rc::Rc;
    use std::sync::Arc;

    #[test]
    fn releases_at_zero() {
        let exec = Executor::new().unwrap();
        let latch = Rc::new(Latch::new(3));
        let released = Rc::new(std::cell::Cell::new(false));

        exec.block_on(async {
            let latch2 = latch.clone();
            let released2 = released.clone();
            let waiter = crate::task::spawn(async move {
                latch2.wait().await;
                released2.set(true);
            });

            crate::task::yield_now().await;
            latch.count_down(1);
            crate::task::yield_now().await;
            assert!(!released.get());

            latch.count_down(2);
            waiter.await;
            assert!(released.get());
        });
    }

    #[test]
    fn blocking_wait_from_foreign_thread() {
        let latch = Arc::new(Latch::new(1));
        let latch2 = latch.clone();

        let thread = std::thread::spawn(move || latch2.blocking_wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        latch.count_down(1);
        thread.join().unwrap();
        assert!(latch.try_wait());
    }
}
