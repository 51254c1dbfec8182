// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-threaded cooperative async I/O runtime.
//!
//! One [`Executor`] per thread owns the ready queue, the timer service
//! and the OS readiness poller. Tasks are plain futures spawned onto
//! the loop; any thread may post work or request a stop, but execution
//! never leaves the owning thread.
//!
//! ```no_run
//! use strand::io::{ReadExt, WriteExt};
//! use strand::net::{TcpListener, TcpStream};
//!
//! let exec = strand::Executor::new()?;
//! exec.block_on(async {
//!     let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap())?;
//!     let addr = listener.local_addr()?;
//!
//!     let server = strand::spawn(async move {
//!         let (mut stream, _peer) = listener.accept().await?;
//!         let mut line = [0u8; 5];
//!         stream.read_all(&mut line).await?;
//!         stream.write_all(&line).await
//!     });
//!
//!     let mut client = TcpStream::connect(addr).await?;
//!     client.write_all(b"hello").await?;
//!     server.await;
//!     Ok::<_, strand::io::IoError>(())
//! })?;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! Cancellation is cooperative and hierarchical: every spawned task
//! carries a stop token; stopping a task abandons its body at the next
//! suspension point, tearing down in-flight timers, I/O operations and
//! queue slots on the way out. See [`task`] for composition
//! ([`when_all`], [`when_any`], scopes, groups) and [`sync`] for the
//! wait-queue primitives.

pub mod executor;
pub mod fs;
pub mod io;
pub mod net;
pub mod pipe;
pub mod process;
pub(crate) mod reactor;
pub mod stop;
pub mod sync;
pub mod task;
pub mod thread;
pub mod time;

pub use executor::{Executor, Remote};
pub use stop::{StopRegistration, StopSource, StopToken};
pub use task::{
    JoinHandle, StopHandle, TaskGroup, TaskScope, join_all, spawn, unstoppable, when_all, when_any,
    yield_now,
};
pub use time::{sleep, sleep_until, timeout, timeout_at};
