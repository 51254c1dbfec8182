// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::collections::BTreeMap;
use std::fmt;
use std::task::Waker;
use std::time::Instant;

use parking_lot::Mutex;

/// The executor's timer service.
///
/// Deadlines live in an ordered map keyed by `(deadline, sequence)`, so
/// entries with equal deadlines fire in insertion order. Each run-loop
/// iteration [turns](Timer::turn) the timer, waking every due entry and
/// reporting the earliest remaining deadline for the driver to sleep on.
pub(crate) struct Timer {
    core: Mutex<Core>,
}

struct Core {
    entries: BTreeMap<(Instant, u64), Waker>,
    next_seq: u64,
}

/// Key of a registered timer entry; removal is O(log n).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerKey {
    deadline: Instant,
    seq: u64,
}

// === impl Timer ===

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            core: Mutex::new(Core {
                entries: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub(crate) fn insert(&self, deadline: Instant, waker: Waker) -> TimerKey {
        let mut core = self.core.lock();
        let seq = core.next_seq;
        core.next_seq += 1;
        core.entries.insert((deadline, seq), waker);
        tracing::trace!(?deadline, seq, "timer entry registered");
        TimerKey { deadline, seq }
    }

    /// Replaces the waker of a registered entry. No-op when the entry has
    /// already fired.
    pub(crate) fn update(&self, key: TimerKey, waker: &Waker) {
        let mut core = self.core.lock();
        if let Some(slot) = core.entries.get_mut(&(key.deadline, key.seq))
            && !slot.will_wake(waker)
        {
            *slot = waker.clone();
        }
    }

    pub(crate) fn remove(&self, key: TimerKey) {
        let mut core = self.core.lock();
        core.entries.remove(&(key.deadline, key.seq));
    }

    /// Wakes every entry whose deadline has passed. Returns how many fired
    /// and the earliest remaining deadline.
    pub(crate) fn turn(&self) -> (usize, Option<Instant>) {
        let now = Instant::now();
        let (due, next) = {
            let mut core = self.core.lock();
            let remaining = core.entries.split_off(&(now, u64::MAX));
            let due = std::mem::replace(&mut core.entries, remaining);
            let next = core.entries.keys().next().map(|(deadline, _)| *deadline);
            (due, next)
        };

        let expired = due.len();
        if expired > 0 {
            tracing::trace!(expired, "firing due timers");
        }
        for (_, waker) in due {
            waker.wake();
        }
        (expired, next)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let core = self.core.lock();
        core.entries.keys().next().map(|(deadline, _)| *deadline)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Timer")
            .field("entries", &core.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::time::Duration;

    struct CountWaker(AtomicUsize);

    impl Wake for CountWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn due_entries_fire_and_report_next() {
        let timer = Timer::new();
        let counter = Arc::new(CountWaker(AtomicUsize::new(0)));
        let waker = std::task::Waker::from(counter.clone());

        let now = Instant::now();
        timer.insert(now - Duration::from_millis(1), waker.clone());
        timer.insert(now - Duration::from_millis(2), waker.clone());
        let later = now + Duration::from_secs(60);
        timer.insert(later, waker);

        let (expired, next) = timer.turn();
        assert_eq!(expired, 2);
        assert_eq!(next, Some(later));
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn removed_entry_never_fires() {
        let timer = Timer::new();
        let counter = Arc::new(CountWaker(AtomicUsize::new(0)));
        let waker = std::task::Waker::from(counter.clone());

        let key = timer.insert(Instant::now() - Duration::from_millis(1), waker);
        timer.remove(key);

        let (expired, next) = timer.turn();
        assert_eq!(expired, 0);
        assert_eq!(next, None);
        assert_eq!(counter.0.load(Ordering::Relaxed), 0);
    }
}
