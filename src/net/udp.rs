// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::net::SocketAddr;

use socket2::{Domain, Type};

use crate::io::{IoError, IoResult, MsgHdr, MsgHdrMut};
use crate::net::socket::SocketFd;

/// A UDP socket with datagram send/receive, plain and vectored.
pub struct UdpSocket {
    io: SocketFd,
}

// === impl UdpSocket ===

impl UdpSocket {
    pub fn bind(addr: SocketAddr) -> IoResult<Self> {
        let io = SocketFd::open(Domain::for_address(addr), Type::DGRAM, None)?;
        io.socket().bind(&addr.into())?;
        tracing::debug!(%addr, "udp socket bound");
        Ok(Self { io })
    }

    /// Fixes the default destination (and source filter) for
    /// [`send`][Self::send] / [`recv`][Self::recv].
    pub fn connect(&self, addr: SocketAddr) -> IoResult<()> {
        self.io.socket().connect(&addr.into())?;
        Ok(())
    }

    pub fn local_addr(&self) -> IoResult<SocketAddr> {
        let addr = self.io.socket().local_addr()?;
        addr.as_socket().ok_or(IoError::InvalidArgument)
    }

    /// Sends one datagram to `addr`.
    pub async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> IoResult<usize> {
        let exec = self.io.executor();
        exec.sendto(self.io.desc(), buf, 0, Some(&addr.into())).await
    }

    /// Receives one datagram, yielding its length and source address.
    pub async fn recv_from(&self, buf: &mut [u8]) -> IoResult<(usize, SocketAddr)> {
        let exec = self.io.executor();
        let (n, addr) = exec.recvfrom(self.io.desc(), buf, 0).await?;
        let addr = addr
            .and_then(|a| a.as_socket())
            .ok_or(IoError::InvalidArgument)?;
        Ok((n, addr))
    }

    /// Sends one datagram to the connected peer.
    pub async fn send(&self, buf: &[u8]) -> IoResult<usize> {
        let exec = self.io.executor();
        exec.sendto(self.io.desc(), buf, 0, None).await
    }

    /// Receives one datagram from the connected peer.
    pub async fn recv(&self, buf: &mut [u8]) -> IoResult<usize> {
        let exec = self.io.executor();
        let (n, _) = exec.recvfrom(self.io.desc(), buf, 0).await?;
        Ok(n)
    }

    /// Sends a vectored datagram.
    pub async fn send_msg(&self, msg: &MsgHdr<'_>, flags: i32) -> IoResult<usize> {
        let exec = self.io.executor();
        exec.sendmsg(self.io.desc(), msg, flags).await
    }

    /// Receives a vectored datagram.
    pub async fn recv_msg(&self, msg: &mut MsgHdrMut<'_, '_>, flags: i32) -> IoResult<usize> {
        let exec = self.io.executor();
        exec.recvmsg(self.io.desc(), msg, flags).await
    }
}

impl fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpSocket").field("io", &self.io).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::io::{IoVec, IoVecMut};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn datagram_round_trip() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let a = UdpSocket::bind(loopback()).unwrap();
            let b = UdpSocket::bind(loopback()).unwrap();
            let b_addr = b.local_addr().unwrap();

            let sent = a.send_to(b"datagram", b_addr).await.unwrap();
            assert_eq!(sent, 8);

            let mut buf = [0u8; 64];
            let (n, from) = b.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"datagram");
            assert_eq!(from, a.local_addr().unwrap());
        });
    }

    #[test]
    fn vectored_round_trip() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let a = UdpSocket::bind(loopback()).unwrap();
            let b = UdpSocket::bind(loopback()).unwrap();
            let b_addr: socket2::SockAddr = b.local_addr().unwrap().into();

            let iov = [IoVec::new(b"vec"), IoVec::new(b"tored")];
            let msg = MsgHdr::new(&iov).with_addr(&b_addr);
            assert_eq!(a.send_msg(&msg, 0).await.unwrap(), 8);

            let mut head = [0u8; 3];
            let mut tail = [0u8; 16];
            let mut iov = [IoVecMut::new(&mut head), IoVecMut::new(&mut tail)];
            let mut msg = MsgHdrMut::new(&mut iov);
            let n = b.recv_msg(&mut msg, 0).await.unwrap();
            assert_eq!(n, 8);
            assert!(msg.addr().is_some());
            assert_eq!(&head, b"vec");
            assert_eq!(&tail[..5], b"tored");
        });
    }
}
