// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Descriptor registration and the uniform async operation set.
//!
//! [`Executor::add_descriptor`] attaches a native handle to the I/O
//! driver and returns an opaque [`IoDescriptor`]. Operations are
//! reactor-style: wait for readiness, perform the non-blocking syscall,
//! and on `WouldBlock` clear the cached readiness and go around again.
//! Regular files cannot be polled and complete inline.

use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::rc::Rc;
use std::task::{Context, Poll};

use socket2::SockAddr;

use crate::executor::{Executor, WeakExec};
use crate::io::sys;
use crate::io::vec::{MsgHdr, MsgHdrMut};
use crate::io::{IoError, IoResult, PollEvents};
use crate::reactor::{OpState, Readiness, ScheduledIo};

/// What kind of native handle a descriptor wraps; decides how the
/// backend treats it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescKind {
    File,
    Socket,
    Tty,
    Pipe,
    Pollable,
    Unknown,
}

/// Opaque token for a native handle registered with an executor.
///
/// The descriptor does not own the handle; closing it is the caller's
/// business, after [`Executor::remove_descriptor`].
#[derive(Clone)]
pub struct IoDescriptor {
    inner: Rc<DescInner>,
}

struct DescInner {
    fd: RawFd,
    kind: DescKind,
    /// `None` for regular files, which the poller cannot watch.
    sched: Option<Rc<ScheduledIo>>,
    exec: WeakExec,
}

// === impl IoDescriptor ===

impl IoDescriptor {
    #[must_use]
    pub fn kind(&self) -> DescKind {
        self.inner.kind
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.inner.fd
    }

    /// The executor this descriptor is registered with, if it is still
    /// alive.
    pub(crate) fn executor(&self) -> Option<Executor> {
        self.inner.exec.get()
    }

    fn checked(&self) -> IoResult<&DescInner> {
        if let Some(sched) = &self.inner.sched
            && sched.is_removed()
        {
            return Err(IoError::InvalidArgument);
        }
        Ok(&self.inner)
    }

    /// Readiness-then-syscall helper shared by the poll-based stream
    /// types. `op` runs whenever the descriptor looks ready; a
    /// `WouldBlock` outcome re-arms the waiter.
    pub(crate) fn poll_io<R>(
        &self,
        cx: &mut Context<'_>,
        interest: PollEvents,
        state: &mut OpState,
        mut op: impl FnMut(RawFd) -> IoResult<R>,
    ) -> Poll<IoResult<R>> {
        let inner = match self.checked() {
            Ok(inner) => inner,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let Some(sched) = &inner.sched else {
            return Poll::Ready(op(inner.fd));
        };
        loop {
            match std::task::ready!(sched.poll_ready(cx, interest, state)) {
                Ok(_) => match op(inner.fd) {
                    Err(IoError::WouldBlock) => sched.clear_readiness(interest),
                    result => {
                        // the operation is over; the next one on this
                        // stream starts with a fresh cancel snapshot
                        *state = OpState::new();
                        return Poll::Ready(result);
                    }
                },
                Err(err) => {
                    *state = OpState::new();
                    return Poll::Ready(Err(err));
                }
            }
        }
    }

    async fn run_op<R>(
        &self,
        interest: PollEvents,
        mut op: impl FnMut(RawFd) -> IoResult<R>,
    ) -> IoResult<R> {
        let inner = self.checked()?;
        let Some(sched) = inner.sched.clone() else {
            return op(inner.fd);
        };
        loop {
            Readiness::new(sched.clone(), interest).await?;
            match op(inner.fd) {
                Err(IoError::WouldBlock) => sched.clear_readiness(interest),
                result => return result,
            }
        }
    }
}

impl fmt::Debug for IoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoDescriptor")
            .field("fd", &self.inner.fd)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

// === impl Executor: the I/O context surface ===

impl Executor {
    /// Registers a native handle with the I/O driver.
    ///
    /// The handle is switched to non-blocking mode. Regular files are
    /// not registered with the poller; their operations complete inline.
    ///
    /// # Errors
    ///
    /// Fails when the handle cannot be registered (e.g. it is already
    /// registered with this driver).
    pub fn add_descriptor(&self, fd: RawFd, kind: DescKind) -> IoResult<IoDescriptor> {
        let sched = match kind {
            DescKind::File => None,
            _ => {
                sys::set_nonblocking(fd)?;
                Some(self.rt.reactor.register(fd).map_err(IoError::from)?)
            }
        };
        tracing::debug!(fd, ?kind, "descriptor added");
        Ok(IoDescriptor {
            inner: Rc::new(DescInner {
                fd,
                kind,
                sched,
                exec: self.downgrade(),
            }),
        })
    }

    /// Cancels all pending operations on `desc` and unregisters it.
    /// Pending awaiters observe [`IoError::Canceled`]; operations
    /// submitted afterwards fail with [`IoError::InvalidArgument`].
    /// Removing twice is a no-op. Never blocks.
    pub fn remove_descriptor(&self, desc: &IoDescriptor) -> IoResult<()> {
        let Some(sched) = &desc.inner.sched else {
            return Ok(());
        };
        if sched.is_removed() {
            return Ok(());
        }
        sched.cancel();
        sched.mark_removed();
        self.rt
            .reactor
            .deregister(desc.inner.fd, sched)
            .map_err(IoError::from)?;
        tracing::debug!(fd = desc.inner.fd, "descriptor removed");
        Ok(())
    }

    /// Requests cancellation of all pending operations on `desc`
    /// without unregistering it.
    pub fn cancel(&self, desc: &IoDescriptor) -> IoResult<()> {
        desc.checked()?;
        if let Some(sched) = &desc.inner.sched {
            sched.cancel();
        }
        Ok(())
    }

    /// Reads into `buffer`, optionally at a file offset. Completes with
    /// the bytes read; `0` means end of stream. Short reads are normal.
    pub async fn read(
        &self,
        desc: &IoDescriptor,
        buffer: &mut [u8],
        offset: Option<u64>,
    ) -> IoResult<usize> {
        desc.run_op(PollEvents::IN, |fd| sys::read(fd, buffer, offset))
            .await
    }

    /// Writes from `buffer`, optionally at a file offset. Completes
    /// with the bytes written; short writes are normal.
    pub async fn write(
        &self,
        desc: &IoDescriptor,
        buffer: &[u8],
        offset: Option<u64>,
    ) -> IoResult<usize> {
        desc.run_op(PollEvents::OUT, |fd| sys::write(fd, buffer, offset))
            .await
    }

    /// Connects a socket descriptor to `endpoint`; completes once the
    /// handshake finishes.
    pub async fn connect(&self, desc: &IoDescriptor, endpoint: &SockAddr) -> IoResult<()> {
        let inner = desc.checked()?;
        match sys::connect(inner.fd, endpoint) {
            Ok(()) => return Ok(()),
            Err(IoError::InProgress | IoError::WouldBlock) => {}
            Err(err) => return Err(err),
        }
        // writability signals the end of the handshake; the verdict is
        // in SO_ERROR
        desc.run_op(PollEvents::OUT, sys::take_socket_error).await
    }

    /// Accepts a connection on a listening socket, yielding the new
    /// native handle and the peer address.
    pub async fn accept(&self, desc: &IoDescriptor) -> IoResult<(OwnedFd, Option<SockAddr>)> {
        desc.run_op(PollEvents::IN, sys::accept).await
    }

    /// Sends a datagram, to `endpoint` when given, else to the
    /// connected peer.
    pub async fn sendto(
        &self,
        desc: &IoDescriptor,
        buffer: &[u8],
        flags: i32,
        endpoint: Option<&SockAddr>,
    ) -> IoResult<usize> {
        desc.run_op(PollEvents::OUT, |fd| sys::sendto(fd, buffer, flags, endpoint))
            .await
    }

    /// Receives a datagram, yielding the byte count and the source
    /// address when the protocol carries one.
    pub async fn recvfrom(
        &self,
        desc: &IoDescriptor,
        buffer: &mut [u8],
        flags: i32,
    ) -> IoResult<(usize, Option<SockAddr>)> {
        desc.run_op(PollEvents::IN, |fd| sys::recvfrom(fd, buffer, flags))
            .await
    }

    /// Sends a vectored datagram.
    pub async fn sendmsg(
        &self,
        desc: &IoDescriptor,
        msg: &MsgHdr<'_>,
        flags: i32,
    ) -> IoResult<usize> {
        let raw = msg.to_raw();
        desc.run_op(PollEvents::OUT, |fd| sys::sendmsg(fd, &raw, flags))
            .await
    }

    /// Receives a vectored datagram; the source address is available
    /// from the header afterwards.
    pub async fn recvmsg(
        &self,
        desc: &IoDescriptor,
        msg: &mut MsgHdrMut<'_, '_>,
        flags: i32,
    ) -> IoResult<usize> {
        let mut raw = msg.to_raw();
        let n = desc
            .run_op(PollEvents::IN, |fd| sys::recvmsg(fd, &mut raw, flags))
            .await?;
        msg.set_namelen(raw.msg_namelen);
        Ok(n)
    }

    /// Waits for any of `events` on a pollable descriptor; completes
    /// with the events actually received.
    pub async fn poll(&self, desc: &IoDescriptor, events: PollEvents) -> IoResult<PollEvents> {
        let inner = desc.checked()?;
        let Some(sched) = inner.sched.clone() else {
            return Err(IoError::OperationNotSupported);
        };
        let got = Readiness::new(sched, events).await?;
        Ok(got & (events | PollEvents::ERR | PollEvents::HUP))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_descriptor_rejects_ops() {
        let exec = Executor::new().unwrap();
        let (rx, _tx) = sys::pipe().unwrap();
        let fd = {
            use std::os::fd::AsRawFd;
            rx.as_raw_fd()
        };

        let desc = exec.add_descriptor(fd, DescKind::Pipe).unwrap();
        exec.remove_descriptor(&desc).unwrap();
        // removal is idempotent
        exec.remove_descriptor(&desc).unwrap();

        let err = exec.block_on(async {
            let mut buf = [0u8; 8];
            exec.read(&desc, &mut buf, None).await.unwrap_err()
        });
        assert_eq!(err, IoError::InvalidArgument);
    }

    #[test]
    fn cancel_wakes_pending_op_with_canceled() {
        let exec = Executor::new().unwrap();
        let (rx, _tx) = sys::pipe().unwrap();
        let fd = {
            use std::os::fd::AsRawFd;
            rx.as_raw_fd()
        };
        let desc = exec.add_descriptor(fd, DescKind::Pipe).unwrap();

        let reader = {
            let exec2 = exec.clone();
            let desc2 = desc.clone();
            exec.spawn(async move {
                let mut buf = [0u8; 8];
                exec2.read(&desc2, &mut buf, None).await
            })
        };

        let out = exec.block_on(async {
            crate::task::yield_now().await;
            exec.cancel(&desc).unwrap();
            reader.await
        });
        assert_eq!(out, Some(Err(IoError::Canceled)));
    }

    #[test]
    fn pipe_round_trip() {
        let exec = Executor::new().unwrap();
        let (rx, tx) = sys::pipe().unwrap();
        let (rfd, wfd) = {
            use std::os::fd::AsRawFd;
            (rx.as_raw_fd(), tx.as_raw_fd())
        };
        let rdesc = exec.add_descriptor(rfd, DescKind::Pipe).unwrap();
        let wdesc = exec.add_descriptor(wfd, DescKind::Pipe).unwrap();

        let got = exec.block_on(async {
            let wrote = exec.write(&wdesc, b"ping", None).await.unwrap();
            assert_eq!(wrote, 4);
            let mut buf = [0u8; 16];
            let n = exec.read(&rdesc, &mut buf, None).await.unwrap();
            buf[..n].to_vec()
        });
        assert_eq!(got, b"ping");
    }
}
