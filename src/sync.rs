// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives riding on the shared FIFO waiter list:
//! [`Mutex`], [`Event`], [`Semaphore`], [`Latch`] and the [`oneshot`] /
//! [`mpsc`] channels.

mod event;
mod latch;
pub mod mpsc;
mod mutex;
pub mod oneshot;
mod semaphore;
pub(crate) mod wait_list;

pub use event::{Event, WaitEvent};
pub use latch::{Latch, WaitLatch};
pub use mutex::{Lock, Mutex, MutexGuard};
pub use semaphore::{Acquire, Semaphore};
