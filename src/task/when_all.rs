// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One child of a `when_all`/`when_any` composition.
///
/// Each arm owns its future's frame, mirroring how the runtime gives
/// every composed child its own task frame. Abandoning an arm drops the
/// frame immediately, tearing down whatever the child had in flight.
pub(crate) enum Arm<F: Future> {
    Running(Pin<Box<F>>),
    Done(Option<F::Output>),
}

// === impl Arm ===

impl<F: Future> Arm<F> {
    pub(crate) fn new(future: F) -> Self {
        Self::Running(Box::pin(future))
    }

    /// Polls the child once; returns `true` when it has completed.
    pub(crate) fn poll_arm(&mut self, cx: &mut Context<'_>) -> bool {
        match self {
            Self::Running(future) => match future.as_mut().poll(cx) {
                Poll::Ready(output) => {
                    *self = Self::Done(Some(output));
                    true
                }
                Poll::Pending => false,
            },
            Self::Done(_) => true,
        }
    }

    pub(crate) fn take_output(&mut self) -> F::Output {
        match self {
            Self::Done(output) => output.take().expect("output already taken"),
            Self::Running(_) => panic!("arm polled to completion before take"),
        }
    }

    pub(crate) fn take_if_done(&mut self) -> Option<F::Output> {
        match self {
            Self::Done(output) => output.take(),
            Self::Running(_) => None,
        }
    }

    /// Drops the child's frame without completing it.
    pub(crate) fn abandon(&mut self) {
        *self = Self::Done(None);
    }
}

impl<F: Future> fmt::Debug for Arm<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(_) => f.pad("Arm::Running"),
            Self::Done(_) => f.pad("Arm::Done"),
        }
    }
}

/// Tuples of futures accepted by [`when_all`].
pub trait WhenAll {
    type Output;
    type Future: Future<Output = Self::Output>;

    fn into_when_all(self) -> Self::Future;
}

/// Awaits every child and resolves to the tuple of their outputs.
///
/// ```ignore
/// let (a, b, c) = when_all((task_a, task_b, task_c)).await;
/// ```
pub fn when_all<T: WhenAll>(futures: T) -> T::Future {
    futures.into_when_all()
}

macro_rules! impl_when_all {
    ($Join:ident => $(($F:ident, $f:ident)),+) => {
        /// Future of a [`when_all`] composition.
        #[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
        pub struct $Join<$($F: Future),+> {
            $($f: Arm<$F>,)+
        }

        // the arms box their frames; outputs are only ever moved out
        impl<$($F: Future),+> Unpin for $Join<$($F),+> {}

        impl<$($F: Future),+> Future for $Join<$($F),+> {
            type Output = ($($F::Output,)+);

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let this = self.get_mut();
                let mut all_done = true;
                $(all_done &= this.$f.poll_arm(cx);)+
                if all_done {
                    Poll::Ready(($(this.$f.take_output(),)+))
                } else {
                    Poll::Pending
                }
            }
        }

        impl<$($F: Future),+> fmt::Debug for $Join<$($F),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($Join))
                    $(.field(stringify!($f), &self.$f))+
                    .finish()
            }
        }

        impl<$($F: Future),+> WhenAll for ($($F,)+) {
            type Output = ($($F::Output,)+);
            type Future = $Join<$($F),+>;

            fn into_when_all(self) -> Self::Future {
                let ($($f,)+) = self;
                $Join {
                    $($f: Arm::new($f),)+
                }
            }
        }
    };
}

impl_when_all!(WhenAll2 => (A, a), (B, b));
impl_when_all!(WhenAll3 => (A, a), (B, b), (C, c));
impl_when_all!(WhenAll4 => (A, a), (B, b), (C, c), (D, d));
impl_when_all!(WhenAll5 => (A, a), (B, b), (C, c), (D, d), (E, e));

/// Awaits every future in the sequence and resolves to their outputs, in
/// the input order.
pub fn join_all<I>(futures: I) -> JoinAll<<I::Item as IntoFuture>::IntoFuture>
where
    I: IntoIterator,
    I::Item: IntoFuture,
{
    JoinAll {
        arms: futures
            .into_iter()
            .map(|f| Arm::new(f.into_future()))
            .collect(),
    }
}

/// Future returned by [`join_all`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct JoinAll<F: Future> {
    arms: Vec<Arm<F>>,
}

impl<F: Future> Unpin for JoinAll<F> {}

impl<F: Future> Future for JoinAll<F> {
    type Output = Vec<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_done = true;
        for arm in &mut this.arms {
            all_done &= arm.poll_arm(cx);
        }
        if all_done {
            Poll::Ready(this.arms.iter_mut().map(Arm::take_output).collect())
        } else {
            Poll::Pending
        }
    }
}

impl<F: Future> fmt::Debug for JoinAll<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinAll").field("arms", &self.arms.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::time::sleep;
    use std::time::Duration;

    async fn return_input(value: u32) -> u32 {
        crate::task::yield_now().await;
        value
    }

    #[test]
    fn resolves_to_tuple() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(when_all((return_input(1), return_input(2), return_input(3))));
        assert_eq!(out, (1, 2, 3));
    }

    #[test]
    fn mixed_types() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(when_all((
            async { "left" },
            async {
                sleep(Duration::from_millis(10)).await;
                7u64
            },
        )));
        assert_eq!(out, ("left", 7));
    }

    #[test]
    fn join_all_preserves_order() {
        let exec = Executor::new().unwrap();
        let out = exec.block_on(join_all((0..10u32).map(return_input)));
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }
}
