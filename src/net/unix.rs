// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use socket2::{Domain, SockAddr, Socket, Type};

use crate::io::{sys, IoResult, PollEvents, Read, Write};
use crate::net::socket::SocketFd;
use crate::reactor::OpState;

/// A Unix-domain listening socket.
#[derive(Debug)]
pub struct UnixListener {
    io: SocketFd,
}

/// A connected Unix-domain stream.
#[derive(Debug)]
pub struct UnixStream {
    io: SocketFd,
    read_op: OpState,
    write_op: OpState,
}

// === impl UnixListener ===

impl UnixListener {
    /// Binds a listener to a filesystem path. The path must not exist.
    pub fn bind(path: impl AsRef<Path>) -> IoResult<Self> {
        let io = SocketFd::open(Domain::UNIX, Type::STREAM, None)?;
        io.socket().bind(&SockAddr::unix(path)?)?;
        io.socket().listen(1024)?;
        Ok(Self { io })
    }

    /// Accepts one connection; the peer address is `None` for unnamed
    /// peers.
    pub async fn accept(&self) -> IoResult<(UnixStream, Option<SockAddr>)> {
        let exec = self.io.executor();
        let (fd, addr) = exec.accept(self.io.desc()).await?;
        let stream = UnixStream::from_socket(Socket::from(fd))?;
        Ok((stream, addr))
    }
}

impl crate::io::Listener for UnixListener {
    type Client = UnixStream;
    type Endpoint = Option<SockAddr>;

    async fn accept(&self) -> IoResult<(UnixStream, Option<SockAddr>)> {
        UnixListener::accept(self).await
    }
}

// === impl UnixStream ===

impl UnixStream {
    /// Opens a connection to a filesystem path.
    pub async fn connect(path: impl AsRef<Path>) -> IoResult<Self> {
        let io = SocketFd::open(Domain::UNIX, Type::STREAM, None)?;
        let exec = io.executor();
        exec.connect(io.desc(), &SockAddr::unix(path)?).await?;
        Ok(Self::wrap(io))
    }

    /// Creates a connected pair of streams.
    pub fn pair() -> IoResult<(Self, Self)> {
        let (a, b) = Socket::pair(Domain::UNIX, Type::STREAM.nonblocking().cloexec(), None)?;
        Ok((Self::from_socket(a)?, Self::from_socket(b)?))
    }

    fn from_socket(socket: Socket) -> IoResult<Self> {
        Ok(Self::wrap(SocketFd::register(socket)?))
    }

    fn wrap(io: SocketFd) -> Self {
        Self {
            io,
            read_op: OpState::new(),
            write_op: OpState::new(),
        }
    }

    pub fn shutdown_write(&self) -> IoResult<()> {
        sys::shutdown(self.io.raw_fd(), libc::SHUT_WR)
    }
}

impl Read for UnixStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        this.io
            .desc()
            .poll_io(cx, PollEvents::IN, &mut this.read_op, |fd| {
                sys::read(fd, buf, None)
            })
    }
}

impl Write for UnixStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        this.io
            .desc()
            .poll_io(cx, PollEvents::OUT, &mut this.write_op, |fd| {
                sys::write(fd, buf, None)
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(self.shutdown_write())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::io::{ReadExt, WriteExt};

    #[test]
    fn pair_round_trip() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let (mut a, mut b) = UnixStream::pair().unwrap();

            let echo = crate::task::spawn(async move {
                let mut buf = [0u8; 32];
                let n = b.read(&mut buf).await.unwrap();
                b.write_all(&buf[..n]).await.unwrap();
            });

            a.write_all(b"over the pair").await.unwrap();
            let mut buf = [0u8; 13];
            a.read_all(&mut buf).await.unwrap();
            assert_eq!(&buf, b"over the pair");
            echo.await;
        });
    }

    #[test]
    fn path_listener() {
        let exec = Executor::new().unwrap();
        let dir = std::env::temp_dir().join(format!("strand-unix-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("listener.sock");
        let _ = std::fs::remove_file(&path);

        exec.block_on(async {
            let listener = UnixListener::bind(&path).unwrap();

            let path2 = path.clone();
            let client = crate::task::spawn(async move {
                let mut stream = UnixStream::connect(&path2).await.unwrap();
                stream.write_all(b"hi").await.unwrap();
            });

            let (mut stream, _addr) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            stream.read_all(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hi");
            client.await;
        });

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}
