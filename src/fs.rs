// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Async file access.
//!
//! Regular files cannot be watched by the readiness poller, so file
//! operations complete inline on the loop thread. Positioned reads and
//! writes take an explicit offset; the plain variants advance an
//! internal cursor.

use std::cell::Cell;
use std::fmt;
use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use crate::executor::Executor;
use crate::io::{DescKind, IoDescriptor, IoResult};

/// A file opened for async access.
pub struct File {
    fd: OwnedFd,
    desc: IoDescriptor,
    cursor: Cell<u64>,
}

// === impl File ===

impl File {
    /// Opens an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> IoResult<Self> {
        Self::from_options(OpenOptions::new().read(true), path)
    }

    /// Creates (or truncates) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> IoResult<Self> {
        Self::from_options(OpenOptions::new().write(true).create(true).truncate(true), path)
    }

    /// Opens with caller-supplied options.
    pub fn from_options(options: &OpenOptions, path: impl AsRef<Path>) -> IoResult<Self> {
        let file = options.open(path)?;
        let fd = OwnedFd::from(file);
        let desc = Executor::current().add_descriptor(fd.as_raw_fd(), DescKind::File)?;
        Ok(Self {
            fd,
            desc,
            cursor: Cell::new(0),
        })
    }

    /// Reads at the cursor, advancing it by the bytes read.
    pub async fn read(&self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.read_at(buf, self.cursor.get()).await?;
        self.cursor.set(self.cursor.get() + n as u64);
        Ok(n)
    }

    /// Reads at an explicit offset, leaving the cursor alone.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> IoResult<usize> {
        let exec = self.executor();
        exec.read(&self.desc, buf, Some(offset)).await
    }

    /// Writes at the cursor, advancing it by the bytes written.
    pub async fn write(&self, buf: &[u8]) -> IoResult<usize> {
        let n = self.write_at(buf, self.cursor.get()).await?;
        self.cursor.set(self.cursor.get() + n as u64);
        Ok(n)
    }

    /// Writes at an explicit offset, leaving the cursor alone.
    pub async fn write_at(&self, buf: &[u8], offset: u64) -> IoResult<usize> {
        let exec = self.executor();
        exec.write(&self.desc, buf, Some(offset)).await
    }

    pub fn seek(&self, offset: u64) {
        self.cursor.set(offset);
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.cursor.get()
    }

    fn executor(&self) -> Executor {
        self.desc.executor().expect("file outlived its executor")
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("fd", &self.fd.as_raw_fd())
            .field("cursor", &self.cursor.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let exec = Executor::new().unwrap();
        let path = std::env::temp_dir().join(format!("strand-fs-{}", std::process::id()));

        exec.block_on(async {
            let out = File::create(&path).unwrap();
            out.write(b"persisted").await.unwrap();
            drop(out);

            let file = File::open(&path).unwrap();
            let mut buf = [0u8; 32];
            let n = file.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"persisted");
            // cursor advanced to the end
            assert_eq!(file.read(&mut buf).await.unwrap(), 0);

            // positioned read does not move the cursor
            let n = file.read_at(&mut buf, 3).await.unwrap();
            assert_eq!(&buf[..n], b"sisted");
        });

        let _ = std::fs::remove_file(&path);
    }
}
