// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::sync::wait_list::WaitList;

/// A counting semaphore.
///
/// [`acquire`][Self::acquire] takes one permit, suspending while none
/// are available; [`release`][Self::release] returns permits and wakes
/// up to that many waiters, in FIFO order.
pub struct Semaphore {
    list: WaitList<SemState>,
}

struct SemState {
    permits: usize,
}

// === impl Semaphore ===

impl Semaphore {
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            list: WaitList::new(SemState { permits }),
        }
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.list.with(|s| s.permits)
    }

    /// Takes one permit, suspending until one is available.
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            key: None,
        }
    }

    /// Takes one permit without suspending, if one is available and no
    /// earlier waiter is queued.
    pub fn try_acquire(&self) -> bool {
        self.list.try_acquire(true, SemState::take_permit)
    }

    /// Returns `n` permits, waking up to `n` waiters.
    pub fn release(&self, n: usize) {
        self.list.with(|s| s.permits += n);
        // each successful grant consumes a permit on the waiter's behalf
        while self.list.wake_one(SemState::take_permit) {}
    }
}

impl SemState {
    fn take_permit(&mut self) -> bool {
        if self.permits > 0 {
            self.permits -= 1;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available_permits())
            .finish()
    }
}

/// Future returned by [`Semaphore::acquire`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    key: Option<usize>,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.semaphore
            .list
            .poll_acquire(&mut this.key, cx, true, SemState::take_permit)
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.semaphore.list.cancel_waiter(&mut self.key) {
            // a permit was granted to us between the wake and the drop
            self.semaphore.release(1);
        }
    }
}

impl fmt::Debug for Acquire<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn limits_concurrency() {
        let exec = Executor::new().unwrap();
        let semaphore = Rc::new(Semaphore::new(2));
        let peak = Rc::new(Cell::new(0usize));
        let live = Rc::new(Cell::new(0usize));

        exec.block_on(async {
            let mut handles = Vec::new();
            for _ in 0..6 {
                let semaphore = semaphore.clone();
                let peak = peak.clone();
                let live = live.clone();
                handles.push(crate::task::spawn(async move {
                    semaphore.acquire().await;
                    live.set(live.get() + 1);
                    peak.set(peak.get().max(live.get()));
                    crate::task::yield_now().await;
                    live.set(live.get() - 1);
                    semaphore.release(1);
                }));
            }
            for handle in handles {
                handle.await;
            }
        });

        assert!(peak.get() <= 2, "saw {} concurrent holders", peak.get());
        assert_eq!(semaphore.available_permits(), 2);
    }

    #[test]
    fn release_many_wakes_many() {
        let exec = Executor::new().unwrap();
        let semaphore = Rc::new(Semaphore::new(0));
        let done = Rc::new(Cell::new(0));

        exec.block_on(async {
            let mut handles = Vec::new();
            for _ in 0..3 {
                let semaphore = semaphore.clone();
                let done = done.clone();
                handles.push(crate::task::spawn(async move {
                    semaphore.acquire().await;
                    done.set(done.get() + 1);
                }));
            }
            crate::task::yield_now().await;
            assert_eq!(done.get(), 0);
            semaphore.release(3);
            for handle in handles {
                handle.await;
            }
        });
        assert_eq!(done.get(), 3);
    }
}
