// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::task::when_all::Arm;

/// Tuples of futures accepted by [`when_any`].
pub trait WhenAny {
    type Output;
    type Future: Future<Output = Self::Output>;

    fn into_when_any(self) -> Self::Future;
}

/// Races the children; resolves once the first completes.
///
/// The output is a tuple of `Option`s with exactly one populated slot.
/// Children are polled left to right, so among simultaneously completing
/// children the leftmost wins. The losing children are torn down before
/// the composition resolves: their frames are dropped, which cancels any
/// operation they had in flight.
pub fn when_any<T: WhenAny>(futures: T) -> T::Future {
    futures.into_when_any()
}

macro_rules! impl_when_any {
    ($Race:ident => $(($F:ident, $f:ident)),+) => {
        /// Future of a [`when_any`] composition.
        #[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
        pub struct $Race<$($F: Future),+> {
            $($f: Arm<$F>,)+
        }

        impl<$($F: Future),+> Unpin for $Race<$($F),+> {}

        impl<$($F: Future),+> Future for $Race<$($F),+> {
            type Output = ($(Option<$F::Output>,)+);

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let this = self.get_mut();
                let mut won = false;
                $(
                    if !won && this.$f.poll_arm(cx) {
                        won = true;
                    }
                )+
                if !won {
                    return Poll::Pending;
                }
                // drop every unfinished arm before resolving
                $(this.$f.settle();)+
                Poll::Ready(($(this.$f.take_if_done(),)+))
            }
        }

        impl<$($F: Future),+> fmt::Debug for $Race<$($F),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($Race))
                    $(.field(stringify!($f), &self.$f))+
                    .finish()
            }
        }

        impl<$($F: Future),+> WhenAny for ($($F,)+) {
            type Output = ($(Option<$F::Output>,)+);
            type Future = $Race<$($F),+>;

            fn into_when_any(self) -> Self::Future {
                let ($($f,)+) = self;
                $Race {
                    $($f: Arm::new($f),)+
                }
            }
        }
    };
}

impl_when_any!(WhenAny2 => (A, a), (B, b));
impl_when_any!(WhenAny3 => (A, a), (B, b), (C, c));
impl_when_any!(WhenAny4 => (A, a), (B, b), (C, c), (D, d));
impl_when_any!(WhenAny5 => (A, a), (B, b), (C, c), (D, d), (E, e));

impl<F: Future> Arm<F> {
    /// Abandons the arm if it is still running, keeping a completed one.
    fn settle(&mut self) {
        if matches!(self, Self::Running(_)) {
            self.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::time::sleep;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn first_completion_wins() {
        let exec = Executor::new().unwrap();
        let (slow, fast) = exec.block_on(when_any((
            async {
                sleep(Duration::from_secs(3600)).await;
                "slow"
            },
            async {
                sleep(Duration::from_millis(10)).await;
                "fast"
            },
        )));
        assert_eq!(slow, None);
        assert_eq!(fast, Some("fast"));
    }

    #[test]
    fn leftmost_wins_ties() {
        let exec = Executor::new().unwrap();
        let (a, b) = exec.block_on(when_any((async { 1 }, async { 2 })));
        assert_eq!(a, Some(1));
        assert_eq!(b, None);
    }

    #[test]
    fn loser_is_dropped_before_resolution() {
        struct SetOnDrop(Rc<Cell<bool>>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let exec = Executor::new().unwrap();
        let dropped = Rc::new(Cell::new(false));

        let guard = SetOnDrop(dropped.clone());
        let observed = exec.block_on(async {
            let (done, _) = when_any((
                async {
                    sleep(Duration::from_millis(10)).await;
                },
                async move {
                    let _guard = guard;
                    sleep(Duration::from_secs(3600)).await;
                },
            ))
            .await;
            assert_eq!(done, Some(()));
            // the losing arm's resources were released before we resumed
            dropped.get()
        });
        assert!(observed);
    }
}
