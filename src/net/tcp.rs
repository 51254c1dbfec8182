// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use socket2::{Domain, Socket, Type};

use crate::io::{sys, IoError, IoResult, Listener, PollEvents, Read, Write};
use crate::net::socket::SocketFd;
use crate::reactor::OpState;

/// A TCP listening socket.
#[derive(Debug)]
pub struct TcpListener {
    io: SocketFd,
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpStream {
    io: SocketFd,
    read_op: OpState,
    write_op: OpState,
}

// === impl TcpListener ===

impl TcpListener {
    /// Binds a listener to `addr`. Port `0` picks an ephemeral port;
    /// query it with [`local_addr`][Self::local_addr].
    pub fn bind(addr: SocketAddr) -> IoResult<Self> {
        let io = SocketFd::open(Domain::for_address(addr), Type::STREAM, None)?;
        io.socket().set_reuse_address(true)?;
        io.socket().bind(&addr.into())?;
        io.socket().listen(1024)?;
        tracing::debug!(%addr, "tcp listener bound");
        Ok(Self { io })
    }

    /// Accepts one connection, yielding the stream and the peer
    /// address.
    pub async fn accept(&self) -> IoResult<(TcpStream, SocketAddr)> {
        let exec = self.io.executor();
        let (fd, addr) = exec.accept(self.io.desc()).await?;
        let addr = addr
            .and_then(|a| a.as_socket())
            .ok_or(IoError::InvalidArgument)?;
        let stream = TcpStream::from_socket(Socket::from(fd))?;
        tracing::debug!(peer = %addr, "accepted tcp connection");
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        let addr = self.io.socket().local_addr()?;
        addr.as_socket().ok_or(IoError::InvalidArgument)
    }
}

impl Listener for TcpListener {
    type Client = TcpStream;
    type Endpoint = SocketAddr;

    async fn accept(&self) -> IoResult<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

// === impl TcpStream ===

impl TcpStream {
    /// Opens a connection to `addr`; completes once the handshake is
    /// done.
    pub async fn connect(addr: SocketAddr) -> IoResult<Self> {
        let io = SocketFd::open(Domain::for_address(addr), Type::STREAM, None)?;
        let exec = io.executor();
        exec.connect(io.desc(), &addr.into()).await?;
        tracing::debug!(%addr, "tcp stream connected");
        Ok(Self::wrap(io))
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

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        let addr = self.io.socket().local_addr()?;
        addr.as_socket().ok_or(IoError::InvalidArgument)
    }

    pub fn peer_addr(&self) -> IoResult<SocketAddr> {
        let addr = self.io.socket().peer_addr()?;
        addr.as_socket().ok_or(IoError::InvalidArgument)
    }

    pub fn set_nodelay(&self, nodelay: bool) -> IoResult<()> {
        self.io.socket().set_nodelay(nodelay)?;
        Ok(())
    }

    /// Shuts the write side down, signalling end of stream to the peer.
    pub fn shutdown_write(&self) -> IoResult<()> {
        sys::shutdown(self.io.raw_fd(), libc::SHUT_WR)
    }
}

impl Read for TcpStream {
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

impl Write for TcpStream {
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
        // unbuffered; the kernel owns everything we wrote
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
    use crate::time::sleep;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn hello_round_trip() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let listener = TcpListener::bind(loopback()).unwrap();
            let addr = listener.local_addr().unwrap();

            let server = crate::task::spawn(async move {
                let (mut stream, _peer) = listener.accept().await.unwrap();
                let mut buf = [0u8; 13];
                let n = stream.read_all(&mut buf).await.unwrap();
                assert_eq!(n, 13);
                assert_eq!(&buf, b"Hello, world!");
                // client shut its write side down
                assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
                stream.write_all(b"ok").await.unwrap();
            });

            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"Hello, world!").await.unwrap();
            client.shutdown_write().unwrap();

            let mut reply = Vec::new();
            client.read_to_end(&mut reply).await.unwrap();
            assert_eq!(reply, b"ok");
            server.await;
        });
    }

    #[test]
    fn bulk_round_trip() {
        const LEN: usize = 1 << 20;

        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let listener = TcpListener::bind(loopback()).unwrap();
            let addr = listener.local_addr().unwrap();

            let payload: Vec<u8> = (0..LEN).map(|i| (i * 31 % 251) as u8).collect();
            let expect = payload.clone();

            let server = crate::task::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut got = Vec::new();
                stream.read_to_end(&mut got).await.unwrap();
                got
            });

            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(&payload).await.unwrap();
            client.shutdown_write().unwrap();
            drop(client);

            let got = server.await.unwrap();
            assert_eq!(got.len(), LEN);
            assert_eq!(got, expect);
        });
    }

    #[test]
    fn accept_raced_against_timer_leaves_listener_usable() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let listener = TcpListener::bind(loopback()).unwrap();
            let addr = listener.local_addr().unwrap();

            let (accepted, timed_out) = crate::task::when_any((
                listener.accept(),
                sleep(Duration::from_millis(20)),
            ))
            .await;
            assert!(accepted.is_none());
            assert_eq!(timed_out, Some(()));

            // the listener keeps working after the abandoned accept
            let client = TcpStream::connect(addr);
            let (server, client) = crate::task::when_all((listener.accept(), client)).await;
            let (_, peer) = server.unwrap();
            let client = client.unwrap();
            assert_eq!(client.local_addr().unwrap(), peer);
        });
    }

    #[test]
    fn connect_refused() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            // bind-then-drop to get a port with nothing listening
            let listener = TcpListener::bind(loopback()).unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let err = TcpStream::connect(addr).await.unwrap_err();
            assert_eq!(err, IoError::ConnectionRefused);
        });
    }
}
