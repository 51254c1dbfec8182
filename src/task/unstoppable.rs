// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use pin_project::pin_project;

use crate::task::{self, TaskShared};

/// Shields a future from task-level stop requests.
///
/// While the returned future is in flight, a stop requested on the
/// enclosing task is deferred: the task keeps running until the shielded
/// section completes (or is dropped), and the stop is delivered at the
/// next suspension point after that.
///
/// Outside a spawned task the wrapper is a no-op.
pub fn unstoppable<F>(future: F) -> Unstoppable<F::IntoFuture>
where
    F: IntoFuture,
{
    Unstoppable {
        future: future.into_future(),
        shield: ShieldState::Unarmed,
    }
}

/// Future returned by [`unstoppable`].
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Unstoppable<F> {
    #[pin]
    future: F,
    shield: ShieldState,
}

enum ShieldState {
    Unarmed,
    Armed(Option<Shield>),
}

/// Raises the current task's shield counter for its lifetime.
struct Shield {
    task: Arc<TaskShared>,
}

// === impl Unstoppable ===

impl<F: Future> Future for Unstoppable<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if matches!(this.shield, ShieldState::Unarmed) {
            *this.shield = ShieldState::Armed(Shield::raise());
        }

        let result = this.future.poll(cx);
        if result.is_ready() {
            // lowering the shield re-delivers a deferred stop request
            *this.shield = ShieldState::Armed(None);
        }
        result
    }
}

impl<F> fmt::Debug for Unstoppable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unstoppable").finish_non_exhaustive()
    }
}

// === impl Shield ===

impl Shield {
    fn raise() -> Option<Self> {
        let task = task::current_task()?;
        task.raise_shield();
        Some(Self { task })
    }
}

impl Drop for Shield {
    fn drop(&mut self) {
        self.task.lower_shield();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::time::sleep;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    #[test]
    fn shielded_section_survives_stop() {
        let exec = Executor::new().unwrap();
        let finished = Rc::new(Cell::new(false));

        let finished2 = finished.clone();
        let handle = exec.spawn(async move {
            unstoppable(async {
                sleep(Duration::from_millis(50)).await;
                finished2.set(true);
            })
            .await;
            // the deferred stop lands here
            sleep(Duration::from_secs(3600)).await;
        });

        let begin = Instant::now();
        exec.block_on(async {
            // let the task enter its shielded section before stopping it
            crate::task::yield_now().await;
            handle.stop();
            assert_eq!(handle.await, None);
        });
        assert!(finished.get(), "shielded section was abandoned");
        assert!(begin.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn noop_outside_task() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(unstoppable(async { 3 }));
        assert_eq!(out, 3);
    }
}
