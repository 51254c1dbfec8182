// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! io_uring backend.
//!
//! Each registered descriptor is armed with a multishot `POLL_ADD`
//! whose `user_data` is the descriptor's slab key; completions feed the
//! shared readiness protocol. Deregistration submits an `ASYNC_CANCEL`
//! for the poll. Cross-thread wakeups go through an eventfd armed the
//! same way under a reserved key.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use io_uring::types::{SubmitArgs, Timespec};
use io_uring::{IoUring, cqueue, opcode, squeue, types};

use crate::io::PollEvents;
use crate::reactor::LoopWaker;

/// `user_data` of the eventfd poll.
const WAKER_KEY: u64 = u64::MAX;
/// `user_data` of ASYNC_CANCEL submissions; their completions carry no
/// readiness.
const CANCEL_KEY: u64 = u64::MAX - 1;

pub(crate) struct UringBackend {
    ring: RefCell<IoUring>,
    event_fd: Arc<OwnedFd>,
    /// key -> fd, for re-arming when the kernel ends a multishot poll.
    fds: RefCell<HashMap<usize, RawFd>>,
}

// === impl UringBackend ===

impl UringBackend {
    pub(crate) fn new(entries: u32) -> io::Result<(Self, LoopWaker)> {
        let ring = IoUring::new(entries)?;

        // Safety: plain syscall; a negative return is an error.
        let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: eventfd returned a fresh descriptor we now own.
        let event_fd = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });

        let backend = Self {
            ring: RefCell::new(ring),
            event_fd: event_fd.clone(),
            fds: RefCell::new(HashMap::new()),
        };
        backend.arm_poll(backend.event_fd.as_raw_fd(), WAKER_KEY)?;
        Ok((backend, LoopWaker::EventFd(event_fd)))
    }

    pub(crate) fn register(&self, fd: RawFd, key: usize) -> io::Result<()> {
        self.fds.borrow_mut().insert(key, fd);
        self.arm_poll(fd, key as u64)
    }

    pub(crate) fn deregister(&self, _fd: RawFd, key: usize) -> io::Result<()> {
        self.fds.borrow_mut().remove(&key);
        let sqe = opcode::AsyncCancel::new(key as u64)
            .build()
            .user_data(CANCEL_KEY);
        self.push(sqe)
    }

    pub(crate) fn poll_events(
        &self,
        timeout: Option<Duration>,
        dispatch: &mut dyn FnMut(usize, PollEvents),
    ) -> io::Result<()> {
        self.wait(timeout)?;

        let mut rearm = Vec::new();
        {
            let mut ring = self.ring.borrow_mut();
            for cqe in ring.completion() {
                let key = cqe.user_data();
                let more = cqueue::more(cqe.flags());
                match key {
                    CANCEL_KEY => {}
                    WAKER_KEY => {
                        drain_eventfd(&self.event_fd);
                        if !more {
                            rearm.push(WAKER_KEY);
                        }
                    }
                    key => {
                        // a cancelled poll reports an error; nothing to
                        // dispatch and nothing to re-arm
                        if cqe.result() >= 0 {
                            dispatch(key as usize, revents(cqe.result() as u32));
                            if !more {
                                rearm.push(key);
                            }
                        }
                    }
                }
            }
        }

        for key in rearm {
            if key == WAKER_KEY {
                self.arm_poll(self.event_fd.as_raw_fd(), WAKER_KEY)?;
            } else if let Some(fd) = self.fds.borrow().get(&(key as usize)).copied() {
                self.arm_poll(fd, key)?;
            }
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<()> {
        let ring = self.ring.borrow();
        let submitter = ring.submitter();
        let result = match timeout {
            Some(timeout) => {
                let ts = Timespec::new()
                    .sec(timeout.as_secs())
                    .nsec(timeout.subsec_nanos());
                let args = SubmitArgs::new().timespec(&ts);
                submitter.submit_with_args(1, &args)
            }
            None => submitter.submit_and_wait(1),
        };
        match result {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(
                    err.raw_os_error(),
                    Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY)
                ) =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn arm_poll(&self, fd: RawFd, key: u64) -> io::Result<()> {
        let mask = (libc::POLLIN | libc::POLLOUT | libc::POLLPRI | libc::POLLRDHUP) as u32;
        let sqe = opcode::PollAdd::new(types::Fd(fd), mask)
            .multi(true)
            .build()
            .user_data(key);
        self.push(sqe)
    }

    fn push(&self, sqe: squeue::Entry) -> io::Result<()> {
        let mut ring = self.ring.borrow_mut();
        loop {
            // Safety: the entries submitted here reference only file
            // descriptors, never caller-owned buffers.
            let pushed = unsafe { ring.submission().push(&sqe).is_ok() };
            if pushed {
                return Ok(());
            }
            // submission queue full; flush it to the kernel
            ring.submit()?;
        }
    }
}

fn revents(bits: u32) -> PollEvents {
    let bits = bits as i16;
    let mut ready = PollEvents::empty();
    if bits & libc::POLLIN != 0 {
        ready |= PollEvents::IN;
    }
    if bits & libc::POLLOUT != 0 {
        ready |= PollEvents::OUT;
    }
    if bits & libc::POLLERR != 0 {
        ready |= PollEvents::ERR;
    }
    if bits & (libc::POLLHUP | libc::POLLRDHUP) != 0 {
        ready |= PollEvents::IN | PollEvents::HUP;
    }
    if bits & libc::POLLPRI != 0 {
        ready |= PollEvents::PRI;
    }
    ready
}

pub(crate) fn signal_eventfd(fd: &OwnedFd) -> io::Result<()> {
    let value: u64 = 1;
    // Safety: writes eight bytes from a live local.
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            (&raw const value).cast(),
            std::mem::size_of::<u64>(),
        )
    };
    // EAGAIN means the counter is saturated, which still wakes the loop
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EAGAIN) {
            return Err(err);
        }
    }
    Ok(())
}

fn drain_eventfd(fd: &OwnedFd) {
    let mut value = [0u8; 8];
    // Safety: reads eight bytes into a live local.
    unsafe {
        let _ = libc::read(fd.as_raw_fd(), value.as_mut_ptr().cast(), value.len());
    }
}

#[cfg(test)]
mod tests {
    use crate::executor::Executor;
    use crate::io::{ReadExt, WriteExt};
    use crate::net::{TcpListener, TcpStream};
    use crate::time::sleep;
    use std::time::{Duration, Instant};

    #[test]
    fn uring_loop_runs_timers() {
        let exec = Executor::new_uring().unwrap();
        let begin = Instant::now();
        exec.block_on(sleep(Duration::from_millis(30)));
        assert!(begin.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn uring_loop_drives_sockets() {
        let exec = Executor::new_uring().unwrap();
        exec.block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = crate::task::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4];
                stream.read_all(&mut buf).await.unwrap();
                stream.write_all(&buf).await.unwrap();
            });

            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"ring").await.unwrap();
            let mut buf = [0u8; 4];
            client.read_all(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ring");
            server.await;
        });
    }
}
