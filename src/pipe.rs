// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Anonymous pipes, also used for child-process redirection.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::executor::Executor;
use crate::io::{sys, DescKind, IoDescriptor, IoResult, PollEvents, Read, Write};
use crate::reactor::OpState;

/// Creates a unidirectional pipe; bytes written to the writer appear at
/// the reader.
///
/// # Panics
///
/// Panics when the thread has no live executor.
pub fn pipe() -> IoResult<(PipeReader, PipeWriter)> {
    let (read_end, write_end) = sys::pipe()?;
    Ok((
        PipeReader {
            io: RegisteredFd::new(read_end, DescKind::Pipe)?,
            op: OpState::new(),
        },
        PipeWriter {
            io: RegisteredFd::new(write_end, DescKind::Pipe)?,
            op: OpState::new(),
        },
    ))
}

/// An owned native handle registered with the current executor; the
/// registration is removed before the handle closes.
pub(crate) struct RegisteredFd {
    fd: OwnedFd,
    desc: IoDescriptor,
}

// === impl RegisteredFd ===

impl RegisteredFd {
    pub(crate) fn new(fd: OwnedFd, kind: DescKind) -> IoResult<Self> {
        let desc = Executor::current().add_descriptor(fd.as_raw_fd(), kind)?;
        Ok(Self { fd, desc })
    }

    pub(crate) fn desc(&self) -> &IoDescriptor {
        &self.desc
    }
}

impl Drop for RegisteredFd {
    fn drop(&mut self) {
        if let Some(exec) = self.desc.executor() {
            let _ = exec.remove_descriptor(&self.desc);
        }
    }
}

impl fmt::Debug for RegisteredFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFd")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

/// Read end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    io: RegisteredFd,
    op: OpState,
}

/// Write end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    io: RegisteredFd,
    op: OpState,
}

impl PipeReader {
    pub(crate) fn from_fd(fd: OwnedFd) -> IoResult<Self> {
        Ok(Self {
            io: RegisteredFd::new(fd, DescKind::Pipe)?,
            op: OpState::new(),
        })
    }
}

impl PipeWriter {
    pub(crate) fn from_fd(fd: OwnedFd) -> IoResult<Self> {
        Ok(Self {
            io: RegisteredFd::new(fd, DescKind::Pipe)?,
            op: OpState::new(),
        })
    }
}

impl Read for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        this.io.desc().poll_io(cx, PollEvents::IN, &mut this.op, |fd| {
            sys::read(fd, buf, None)
        })
    }
}

impl Write for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        this.io.desc().poll_io(cx, PollEvents::OUT, &mut this.op, |fd| {
            sys::write(fd, buf, None)
        })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        // closing the write end is the only shutdown a pipe has; that
        // happens on drop
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ReadExt, WriteExt};

    #[test]
    fn write_then_read() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let (mut reader, mut writer) = pipe().unwrap();
            writer.write_all(b"through the pipe").await.unwrap();
            drop(writer);

            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"through the pipe");
        });
    }
}
