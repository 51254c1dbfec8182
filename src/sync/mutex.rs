// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::sync::wait_list::{WaitList, block_until};

/// A fair asynchronous mutex.
///
/// Contended locks are granted in `lock()` call order: unlocking hands
/// ownership directly to the longest-waiting task instead of releasing
/// the lock bit for a race. The guard releases on drop.
pub struct Mutex<T: ?Sized> {
    list: WaitList<LockState>,
    value: UnsafeCell<T>,
}

struct LockState {
    locked: bool,
}

// Safety: the lock protocol gives at most one guard access to `value`,
// and a guard can only be created by winning the lock.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
// Safety: see above; shared access only hands out the guard.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

// === impl Mutex ===

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            list: WaitList::new(LockState { locked: false }),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, suspending while another task holds it.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            key: None,
        }
    }

    /// Acquires the mutex without suspending, or returns `None` if it is
    /// held or contended.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let acquired = self.list.try_acquire(true, |s| {
            if s.locked {
                false
            } else {
                s.locked = true;
                true
            }
        });
        acquired.then(|| MutexGuard { mutex: self })
    }

    /// Acquires the mutex, parking the calling thread. For threads that
    /// do not run an executor.
    pub fn blocking_lock(&self) -> MutexGuard<'_, T> {
        let mut key = None;
        block_until(|cx| self.poll_lock(&mut key, cx));
        MutexGuard { mutex: self }
    }

    fn poll_lock(&self, key: &mut Option<usize>, cx: &mut Context<'_>) -> Poll<()> {
        self.list.poll_acquire(key, cx, true, |s| {
            if s.locked {
                false
            } else {
                s.locked = true;
                true
            }
        })
    }

    fn unlock(&self) {
        // ownership transfers to the first waiter; only with no waiters
        // does the lock bit actually clear
        self.list.wake_one_or_else(|_| true, |s| s.locked = false);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("value", &&*guard),
            None => s.field("value", &"<locked>"),
        };
        s.finish()
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    key: Option<usize>,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        std::task::ready!(this.mutex.poll_lock(&mut this.key, cx));
        Poll::Ready(MutexGuard { mutex: this.mutex })
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if self.mutex.list.cancel_waiter(&mut self.key) {
            // ownership was handed to us between the wake and the drop
            self.mutex.unlock();
        }
    }
}

impl<T: ?Sized> fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock").finish_non_exhaustive()
    }
}

/// RAII guard granting access to the protected value; releases the
/// mutex on drop.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the lock, so access is exclusive.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock, so access is exclusive.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::task::yield_now;
    use std::rc::Rc;

    #[test]
    fn uncontended_lock() {
        let exec = Executor::new().unwrap();
        let mutex = Mutex::new(1);
        exec.block_on(async {
            *mutex.lock().await += 1;
        });
        assert_eq!(mutex.into_inner(), 2);
    }

    #[test]
    fn try_lock_respects_holder() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn acquisitions_are_fifo() {
        let exec = Executor::new().unwrap();
        let mutex = Rc::new(Mutex::new(()));
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        exec.block_on(async {
            let mut handles = Vec::new();
            for i in 0..8 {
                let mutex = mutex.clone();
                let order = order.clone();
                handles.push(crate::task::spawn(async move {
                    let _guard = mutex.lock().await;
                    order.borrow_mut().push(i);
                    yield_now().await;
                }));
            }
            for handle in handles {
                handle.await;
            }
        });

        assert_eq!(*order.borrow(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn abandoned_lock_request_passes_ownership_on() {
        let exec = Executor::new().unwrap();
        let mutex = Rc::new(Mutex::new(()));

        exec.block_on(async {
            let guard = mutex.lock().await;
            let mut second = Box::pin(mutex.lock());
            // suspend it in the queue
            futures::future::poll_immediate(second.as_mut()).await;
            drop(guard);
            // dropping the queued request must not strand the lock
            drop(second);
            let _third = mutex.lock().await;
        });
    }
}
