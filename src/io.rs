// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! I/O traits, buffers and the descriptor-level operation surface.

mod buf;
mod context;
mod error;
pub(crate) mod sys;
mod vec;

use std::cmp;
use std::future::poll_fn;
use std::ops::DerefMut;
use std::pin::Pin;
use std::task::{Context, Poll};

pub use buf::{BufStream, StreamBuffer};
pub use context::{DescKind, IoDescriptor};
pub use error::{IoError, IoResult, SystemError};
pub use vec::{IoVec, IoVecMut, MsgHdr, MsgHdrMut};

bitflags::bitflags! {
    /// Event mask for [`poll`](crate::executor::Executor::poll)-style
    /// readiness waits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u8 {
        /// Readable.
        const IN  = 1 << 0;
        /// Writable.
        const OUT = 1 << 1;
        /// Error condition.
        const ERR = 1 << 2;
        /// Peer hang-up.
        const HUP = 1 << 3;
        /// Priority data.
        const PRI = 1 << 4;
    }
}

/// Byte source with a poll-based contract. `Ok(0)` means end of
/// stream; short reads are normal.
pub trait Read {
    // Pull some bytes from this source into the specified buffer.
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>>;

    // Attempt to read into bufs using vectored IO operations.
    //
    // The default forwards to `poll_read` with the first non-empty
    // buffer.
    fn poll_read_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &mut [IoVecMut<'_>],
    ) -> Poll<IoResult<usize>> {
        match bufs.iter_mut().find(|buf| !buf.is_empty()) {
            Some(buf) => self.poll_read(cx, buf.as_mut_slice()),
            None => Poll::Ready(Ok(0)),
        }
    }
}

/// Byte sink with a poll-based contract. Short writes are normal.
pub trait Write {
    // Write a buffer into this writer, returning how many bytes were
    // written.
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8])
    -> Poll<IoResult<usize>>;

    // Flush this output stream.
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>>;

    // Shut the write side down.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>>;

    // Attempt to write bytes from bufs using vectored IO operations.
    //
    // The default forwards to `poll_write` with the first non-empty
    // buffer.
    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoVec<'_>],
    ) -> Poll<IoResult<usize>> {
        match bufs.iter().find(|buf| !buf.is_empty()) {
            Some(buf) => self.poll_write(cx, buf.as_slice()),
            None => Poll::Ready(Ok(0)),
        }
    }
}

// ===== impl Read =====

impl Read for &[u8] {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let amt = cmp::min(buf.len(), self.len());
        let (head, tail) = self.split_at(amt);
        buf[..amt].copy_from_slice(head);
        *self.get_mut() = tail;
        Poll::Ready(Ok(amt))
    }
}

impl<T> Read for &mut T
where
    T: Read + Unpin + ?Sized,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut **self).poll_read(cx, buf)
    }
}

impl<P> Read for Pin<P>
where
    P: DerefMut + Unpin,
    P::Target: Read,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        self.get_mut().as_mut().poll_read(cx, buf)
    }
}

// ===== impl Write =====

impl Write for Vec<u8> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        self.get_mut().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Poll::Ready(Ok(()))
    }
}

impl<T> Write for &mut T
where
    T: Write + Unpin + ?Sized,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut **self).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut **self).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut **self).poll_shutdown(cx)
    }
}

// ===== extension traits =====

/// Awaitable helpers over [`Read`].
pub trait ReadExt: Read {
    /// Reads some bytes into `buf`; `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> IoResult<usize>
    where
        Self: Unpin,
    {
        poll_fn(|cx| Pin::new(&mut *self).poll_read(cx, buf)).await
    }

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// [`IoError::UnexpectedEof`] when the stream ends first.
    async fn read_all(&mut self, buf: &mut [u8]) -> IoResult<usize>
    where
        Self: Unpin,
    {
        let want = buf.len();
        self.read_atleast(buf, want).await
    }

    /// Reads until at least `n` bytes of `buf` are filled, returning
    /// the total read (which may exceed `n`).
    ///
    /// # Errors
    ///
    /// [`IoError::UnexpectedEof`] when the stream ends first.
    async fn read_atleast(&mut self, buf: &mut [u8], n: usize) -> IoResult<usize>
    where
        Self: Unpin,
    {
        assert!(n <= buf.len());
        let mut filled = 0;
        while filled < n {
            let got = self.read(&mut buf[filled..]).await?;
            if got == 0 {
                return Err(IoError::UnexpectedEof);
            }
            filled += got;
        }
        Ok(filled)
    }

    /// Reads until end of stream, appending to `out`; returns the bytes
    /// added.
    async fn read_to_end(&mut self, out: &mut Vec<u8>) -> IoResult<usize>
    where
        Self: Unpin,
    {
        let start = out.len();
        loop {
            let filled = out.len();
            out.resize(filled + 4096, 0);
            let got = self.read(&mut out[filled..]).await?;
            out.truncate(filled + got);
            if got == 0 {
                return Ok(out.len() - start);
            }
        }
    }
}

impl<T: Read + ?Sized> ReadExt for T {}

/// Awaitable helpers over [`Write`].
pub trait WriteExt: Write {
    /// Writes some bytes from `buf`, returning how many were taken.
    async fn write(&mut self, buf: &[u8]) -> IoResult<usize>
    where
        Self: Unpin,
    {
        poll_fn(|cx| Pin::new(&mut *self).poll_write(cx, buf)).await
    }

    /// Writes all of `buf`.
    ///
    /// # Errors
    ///
    /// [`IoError::WriteZero`] when the sink stops accepting bytes.
    async fn write_all(&mut self, buf: &[u8]) -> IoResult<()>
    where
        Self: Unpin,
    {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(IoError::WriteZero);
            }
            written += n;
        }
        Ok(())
    }

    async fn flush(&mut self) -> IoResult<()>
    where
        Self: Unpin,
    {
        poll_fn(|cx| Pin::new(&mut *self).poll_flush(cx)).await
    }

    async fn shutdown(&mut self) -> IoResult<()>
    where
        Self: Unpin,
    {
        poll_fn(|cx| Pin::new(&mut *self).poll_shutdown(cx)).await
    }
}

impl<T: Write + ?Sized> WriteExt for T {}

/// A bidirectional stream: readable, writable, shutdownable.
pub trait StreamClient: Read + Write {}

impl<T: Read + Write + ?Sized> StreamClient for T {}

/// Something that accepts incoming connections.
pub trait Listener {
    type Client;
    type Endpoint;

    fn accept(&self) -> impl Future<Output = IoResult<(Self::Client, Self::Endpoint)>>;
}

/// A layered stream exposing the layer below it.
pub trait Layer {
    type Next;

    fn next_layer(&self) -> &Self::Next;
    fn next_layer_mut(&mut self) -> &mut Self::Next;
}

impl<S> Layer for BufStream<S> {
    type Next = S;

    fn next_layer(&self) -> &S {
        BufStream::next_layer(self)
    }

    fn next_layer_mut(&mut self) -> &mut S {
        BufStream::next_layer_mut(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn slice_read_and_vec_write() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let mut src: &[u8] = b"hello world";
            let mut dst = Vec::new();

            let mut buf = [0u8; 4];
            loop {
                let n = src.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n]).await.unwrap();
            }
            assert_eq!(dst, b"hello world");
        });
    }

    #[test]
    fn read_all_hits_unexpected_eof() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let mut src: &[u8] = b"short";
            let mut buf = [0u8; 16];
            assert_eq!(src.read_all(&mut buf).await, Err(IoError::UnexpectedEof));
        });
    }

    #[test]
    fn read_to_end_collects_everything() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let mut src: &[u8] = b"all of it";
            let mut out = Vec::new();
            let n = src.read_to_end(&mut out).await.unwrap();
            assert_eq!(n, 9);
            assert_eq!(out, b"all of it");
        });
    }
}
