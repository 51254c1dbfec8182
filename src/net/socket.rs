// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::executor::Executor;
use crate::io::{DescKind, IoDescriptor, IoResult};

/// A socket registered with the current executor. Owns the native
/// handle; deregisters (cancelling in-flight operations) before closing
/// it.
pub(crate) struct SocketFd {
    socket: Socket,
    desc: IoDescriptor,
}

// === impl SocketFd ===

impl SocketFd {
    /// Creates a non-blocking socket and registers it.
    pub(crate) fn open(domain: Domain, ty: Type, protocol: Option<Protocol>) -> IoResult<Self> {
        let socket = Socket::new(domain, ty.nonblocking().cloexec(), protocol)?;
        Self::register(socket)
    }

    /// Registers an existing socket with the current executor.
    ///
    /// # Panics
    ///
    /// Panics when the thread has no live executor.
    pub(crate) fn register(socket: Socket) -> IoResult<Self> {
        let exec = Executor::current();
        let desc = exec.add_descriptor(socket.as_raw_fd(), DescKind::Socket)?;
        Ok(Self { socket, desc })
    }

    pub(crate) fn desc(&self) -> &IoDescriptor {
        &self.desc
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// The executor this socket is registered with.
    ///
    /// # Panics
    ///
    /// Panics when the owning executor has been destroyed.
    pub(crate) fn executor(&self) -> Executor {
        self.desc
            .executor()
            .expect("socket outlived its executor")
    }
}

impl Drop for SocketFd {
    fn drop(&mut self) {
        if let Some(exec) = self.desc.executor() {
            let _ = exec.remove_descriptor(&self.desc);
        }
    }
}

impl fmt::Debug for SocketFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketFd").field("fd", &self.raw_fd()).finish()
    }
}
