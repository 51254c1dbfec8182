// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The thread bridge: run a task on a dedicated worker thread with its
//! own executor, and await its result from a foreign task.

use std::fmt;
use std::panic::resume_unwind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::stop::StopSource;
use crate::task::{CatchUnwind, PanicPayload, Stoppable};

/// A task running on its own worker thread.
///
/// The handle is awaitable from any executor: it resolves to
/// `Some(output)`, or `None` when the worker task was stopped.
/// [`stop`][Self::stop] forwards a stop request to the worker;
/// [`join`][Self::join] blocks the calling thread.
pub struct Thread<T> {
    shared: Arc<BridgeShared<T>>,
    stop: StopSource,
    thread: Option<std::thread::JoinHandle<()>>,
}

struct BridgeShared<T> {
    state: Mutex<BridgeState<T>>,
}

struct BridgeState<T> {
    result: Option<Option<Result<T, PanicPayload>>>,
    waker: Option<Waker>,
}

// === impl Thread ===

impl<T: Send + 'static> Thread<T> {
    /// Starts a worker thread, creates an executor on it and runs the
    /// future produced by `body` to completion there.
    pub fn spawn<F, Fut>(body: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T>,
    {
        let shared = Arc::new(BridgeShared {
            state: Mutex::new(BridgeState {
                result: None,
                waker: None,
            }),
        });
        let stop = StopSource::new();
        let token = stop.token();

        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("strand-bridge".into())
            .spawn(move || {
                let exec = match Executor::new() {
                    Ok(exec) => exec,
                    Err(err) => {
                        tracing::error!("bridge worker failed to build an executor: {err}");
                        worker_shared.complete(None);
                        return;
                    }
                };
                let output = exec.block_on(Stoppable::new(token, None, CatchUnwind::new(body())));
                worker_shared.complete(output);
            })?;

        Ok(Self {
            shared,
            stop,
            thread: Some(thread),
        })
    }

    /// Forwards a stop request to the worker's task.
    pub fn stop(&self) {
        self.stop.request_stop();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().result.is_some()
    }

    /// Blocks the calling thread until the worker finishes and returns
    /// the output, `None` when the task was stopped.
    ///
    /// # Panics
    ///
    /// Rethrows a panic from the worker task.
    pub fn join(mut self) -> Option<T> {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let result = self
            .shared
            .state
            .lock()
            .result
            .take()
            .expect("worker finished without storing a result");
        match result {
            None => None,
            Some(Ok(output)) => Some(output),
            Some(Err(payload)) => resume_unwind(payload),
        }
    }
}

impl<T> BridgeShared<T> {
    fn complete(&self, output: Option<Result<T, PanicPayload>>) {
        let waker = {
            let mut state = self.state.lock();
            state.result = Some(output);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Future for Thread<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match state.result.take() {
            Some(None) => Poll::Ready(None),
            Some(Some(Ok(output))) => Poll::Ready(Some(output)),
            Some(Some(Err(payload))) => resume_unwind(payload),
            None => {
                match &state.waker {
                    Some(waker) if waker.will_wake(cx.waker()) => {}
                    _ => state.waker = Some(cx.waker().clone()),
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Thread<T> {
    fn drop(&mut self) {
        // detach; the worker finishes (or is stopped) on its own
        if let Some(thread) = self.thread.take() {
            drop(thread);
        }
    }
}

impl<T> fmt::Debug for Thread<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("finished", &self.shared.state.lock().result.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::sleep;
    use std::time::Duration;

    #[test]
    fn await_from_foreign_task() {
        let exec = Executor::new().unwrap();
        let bridge = Thread::spawn(|| async {
            sleep(Duration::from_millis(10)).await;
            21 * 2
        })
        .unwrap();

        assert_eq!(exec.block_on(bridge), Some(42));
    }

    #[test]
    fn blocking_join() {
        let bridge = Thread::spawn(|| async { "from the worker" }).unwrap();
        assert_eq!(bridge.join(), Some("from the worker"));
    }

    #[test]
    fn stop_forwards_to_worker() {
        let exec = Executor::new().unwrap();
        let bridge = Thread::spawn(|| async {
            sleep(Duration::from_secs(3600)).await;
            1
        })
        .unwrap();

        let begin = std::time::Instant::now();
        let out = exec.block_on(async {
            // give the worker a moment to start sleeping
            sleep(Duration::from_millis(10)).await;
            bridge.stop();
            bridge.await
        });
        assert_eq!(out, None);
        assert!(begin.elapsed() < Duration::from_secs(2));
    }
}
