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

use crate::executor::{Executor, WeakExec};
use crate::time::timer::TimerKey;

/// Waits until `duration` has elapsed.
///
/// # Panics
///
/// Panics when the thread has no live executor.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Waits until `deadline` has been reached.
///
/// # Panics
///
/// Panics when the thread has no live executor.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        exec: Executor::current().downgrade(),
        deadline,
        key: None,
        completed: false,
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
///
/// Dropping an unexpired `Sleep` removes its timer entry.
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Sleep {
    exec: WeakExec,
    deadline: Instant,
    key: Option<TimerKey>,
    completed: bool,
}

// === impl Sleep ===

impl Sleep {
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.completed {
            return Poll::Ready(());
        }

        let Some(exec) = this.exec.get() else {
            // the runtime is gone; nothing will ever fire this timer
            this.completed = true;
            return Poll::Ready(());
        };

        if Instant::now() >= this.deadline {
            if let Some(key) = this.key.take() {
                exec.rt.timer.remove(key);
            }
            this.completed = true;
            return Poll::Ready(());
        }

        match this.key {
            None => this.key = Some(exec.rt.timer.insert(this.deadline, cx.waker().clone())),
            Some(key) => exec.rt.timer.update(key, cx.waker()),
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let (false, Some(key), Some(exec)) = (self.completed, self.key.take(), self.exec.get()) {
            exec.rt.timer.remove(key);
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("completed", &self.completed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_elapses() {
        let exec = Executor::new().unwrap();
        let begin = Instant::now();
        exec.block_on(sleep(Duration::from_millis(50)));
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "slept only {elapsed:?}");
    }

    #[test]
    fn short_sleep_is_prompt() {
        let exec = Executor::new().unwrap();
        let begin = Instant::now();
        exec.block_on(sleep(Duration::from_millis(10)));
        assert!(begin.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn shorter_sleep_resumes_first() {
        let exec = Executor::new().unwrap();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        let o = order.clone();
        let slow = exec.spawn(async move {
            sleep(Duration::from_millis(60)).await;
            o.borrow_mut().push("slow");
        });
        let o = order.clone();
        let fast = exec.spawn(async move {
            sleep(Duration::from_millis(20)).await;
            o.borrow_mut().push("fast");
        });

        exec.block_on(async move {
            fast.await;
            slow.await;
        });
        assert_eq!(*order.borrow(), vec!["fast", "slow"]);
    }
}
