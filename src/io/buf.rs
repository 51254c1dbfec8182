// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::io::{IoError, IoResult, Read, ReadExt, Write};

/// An amortised-growth byte buffer with a prepare/commit/consume cycle.
///
/// Writers [`prepare`][Self::prepare] scratch space, fill some of it and
/// [`commit`][Self::commit] what they filled; readers look at
/// [`data`][Self::data] and [`consume`][Self::consume] what they took.
/// Consumed space is reclaimed lazily.
pub struct StreamBuffer {
    buf: Vec<u8>,
    read_pos: usize,
}

// === impl StreamBuffer ===

impl StreamBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            read_pos: 0,
        }
    }

    /// Returns a scratch span of at least `len` bytes past the readable
    /// region.
    pub fn prepare(&mut self, len: usize) -> &mut [u8] {
        // reclaim the consumed prefix before growing
        if self.read_pos > 0 && self.read_pos == self.buf.len() {
            self.buf.clear();
            self.read_pos = 0;
        } else if self.read_pos > self.buf.len() / 2 {
            self.buf.drain(..self.read_pos);
            self.read_pos = 0;
        }
        let filled = self.buf.len();
        self.buf.resize(filled + len, 0);
        &mut self.buf[filled..]
    }

    /// Marks `len` bytes of the last prepared span as filled; the rest
    /// of the span is returned to scratch.
    pub fn commit(&mut self, len: usize, prepared: usize) {
        debug_assert!(len <= prepared);
        let filled = self.buf.len() - prepared;
        self.buf.truncate(filled + len);
    }

    /// The readable region.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buf[self.read_pos..]
    }

    /// Discards `len` readable bytes.
    pub fn consume(&mut self, len: usize) {
        self.read_pos = (self.read_pos + len).min(self.buf.len());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("readable", &self.len())
            .finish()
    }
}

/// A read-buffering stream adapter with delimiter scanning.
///
/// Layered over any [`Read`] + [`Write`] stream; writes pass through.
pub struct BufStream<S> {
    inner: S,
    buf: StreamBuffer,
}

const CHUNK: usize = 4096;

// === impl BufStream ===

impl<S> BufStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: StreamBuffer::new(),
        }
    }

    /// The layer directly below this one.
    pub fn next_layer(&self) -> &S {
        &self.inner
    }

    pub fn next_layer_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Discards buffered data and returns the underlying stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read + Unpin> BufStream<S> {
    /// Reads until `delimiter` and returns the line without it.
    ///
    /// # Errors
    ///
    /// [`IoError::UnexpectedEof`] when the stream ends before the
    /// delimiter.
    pub async fn getline(&mut self, delimiter: &str) -> IoResult<String> {
        let raw = self.read_until(delimiter.as_bytes()).await?;
        String::from_utf8(raw).map_err(|_| IoError::InvalidArgument)
    }

    /// Reads until `delimiter` and returns the bytes without it.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> IoResult<Vec<u8>> {
        assert!(!delimiter.is_empty(), "empty delimiter");
        let mut scanned: usize = 0;
        loop {
            let data = self.buf.data();
            if let Some(pos) = find(&data[scanned.saturating_sub(delimiter.len() - 1)..], delimiter)
            {
                let at = pos + scanned.saturating_sub(delimiter.len() - 1);
                let mut line = data[..at].to_vec();
                self.buf.consume(at + delimiter.len());
                line.shrink_to_fit();
                return Ok(line);
            }
            scanned = data.len();

            let spare = self.buf.prepare(CHUNK);
            let n = (&mut self.inner).read(spare).await?;
            self.buf.commit(n, CHUNK);
            if n == 0 {
                return Err(IoError::UnexpectedEof);
            }
        }
    }
}

impl<S: Read + Unpin> Read for BufStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<IoResult<usize>> {
        let this = self.get_mut();
        let data = this.buf.data();
        if !data.is_empty() {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            this.buf.consume(n);
            return Poll::Ready(Ok(n));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: Write + Unpin> Write for BufStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: fmt::Debug> fmt::Debug for BufStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufStream")
            .field("inner", &self.inner)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_commit_consume_cycle() {
        let mut buf = StreamBuffer::new();
        let spare = buf.prepare(8);
        spare[..5].copy_from_slice(b"hello");
        buf.commit(5, 8);

        assert_eq!(buf.data(), b"hello");
        buf.consume(2);
        assert_eq!(buf.data(), b"llo");
        buf.consume(3);
        assert!(buf.is_empty());
    }

    #[test]
    fn consumed_prefix_is_reclaimed() {
        let mut buf = StreamBuffer::new();
        let spare = buf.prepare(16);
        spare.fill(b'x');
        buf.commit(16, 16);
        buf.consume(16);

        buf.prepare(1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn find_spanning_chunks() {
        assert_eq!(find(b"ab\r\ncd", b"\r\n"), Some(2));
        assert_eq!(find(b"abcd", b"\r\n"), None);
    }

    #[test]
    fn getline_splits_on_delimiter() {
        let exec = crate::executor::Executor::new().unwrap();
        exec.block_on(async {
            let src: &[u8] = b"GET / HTTP/1.1\r\nHost: example\r\n\r\nrest";
            let mut stream = BufStream::new(src);

            assert_eq!(stream.getline("\r\n").await.unwrap(), "GET / HTTP/1.1");
            assert_eq!(stream.getline("\r\n").await.unwrap(), "Host: example");
            assert_eq!(stream.getline("\r\n").await.unwrap(), "");
            // the stream ends before another delimiter shows up
            assert_eq!(stream.getline("\r\n").await, Err(IoError::UnexpectedEof));
        });
    }
}
