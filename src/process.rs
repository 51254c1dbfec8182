// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Child processes with async wait and pipe redirection.
//!
//! A spawned child's exit is awaited through a pidfd, which the poller
//! reports readable once the process terminates. Redirected stdio shows
//! up as pipe streams on the [`Process`].

use std::fmt;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::io::{DescKind, IoError, IoResult, PollEvents};
use crate::pipe::{PipeReader, PipeWriter, RegisteredFd};

bitflags::bitflags! {
    /// Which stdio streams of the child to capture as pipes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpawnFlags: u8 {
        const REDIRECT_STDIN  = 1 << 0;
        const REDIRECT_STDOUT = 1 << 1;
        const REDIRECT_STDERR = 1 << 2;
        const REDIRECT_ALL    = Self::REDIRECT_STDIN.bits()
            | Self::REDIRECT_STDOUT.bits()
            | Self::REDIRECT_STDERR.bits();
    }
}

/// A spawned child process.
///
/// Dropping the handle detaches the child; it keeps running.
pub struct Process {
    child: Child,
    pidfd: Option<RegisteredFd>,
    stdin: Option<PipeWriter>,
    stdout: Option<PipeReader>,
    stderr: Option<PipeReader>,
}

// === impl Process ===

impl Process {
    /// Spawns `program` with `args`, capturing the stdio streams named
    /// in `flags`; uncaptured streams are inherited.
    ///
    /// # Panics
    ///
    /// Panics when the thread has no live executor.
    pub fn spawn(
        program: impl AsRef<std::ffi::OsStr>,
        args: impl IntoIterator<Item = impl AsRef<std::ffi::OsStr>>,
        flags: SpawnFlags,
    ) -> IoResult<Self> {
        let mut command = Command::new(program);
        command.args(args);

        let pick = |captured: bool| if captured { Stdio::piped() } else { Stdio::inherit() };
        command.stdin(pick(flags.contains(SpawnFlags::REDIRECT_STDIN)));
        command.stdout(pick(flags.contains(SpawnFlags::REDIRECT_STDOUT)));
        command.stderr(pick(flags.contains(SpawnFlags::REDIRECT_STDERR)));

        let mut child = command.spawn()?;
        tracing::debug!(pid = child.id(), "child process spawned");

        let stdin = match child.stdin.take() {
            Some(stdin) => Some(PipeWriter::from_fd(OwnedFd::from(stdin))?),
            None => None,
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => Some(PipeReader::from_fd(OwnedFd::from(stdout))?),
            None => None,
        };
        let stderr = match child.stderr.take() {
            Some(stderr) => Some(PipeReader::from_fd(OwnedFd::from(stderr))?),
            None => None,
        };

        let pidfd = open_pidfd(child.id())
            .and_then(|fd| RegisteredFd::new(fd, DescKind::Pollable))
            .inspect_err(|err| tracing::debug!("pidfd unavailable, wait will poll: {err}"))
            .ok();

        Ok(Self {
            child,
            pidfd,
            stdin,
            stdout,
            stderr,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The child's stdin pipe, when it was redirected. Take it (or drop
    /// the whole process handle) to close the child's input.
    pub fn stdin(&mut self) -> &mut Option<PipeWriter> {
        &mut self.stdin
    }

    pub fn stdout(&mut self) -> &mut Option<PipeReader> {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut Option<PipeReader> {
        &mut self.stderr
    }

    /// Waits for the child to exit and returns its exit code; a child
    /// killed by signal `n` reports `-n`.
    pub async fn wait(&mut self) -> IoResult<i32> {
        match &self.pidfd {
            Some(pidfd) => {
                let exec = pidfd
                    .desc()
                    .executor()
                    .ok_or(IoError::Canceled)?;
                exec.poll(pidfd.desc(), PollEvents::IN).await?;
            }
            None => {
                // no pidfd on this kernel; fall back to polling
                while self.child.try_wait()?.is_none() {
                    crate::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        let status = self.child.wait()?;
        tracing::debug!(pid = self.child.id(), ?status, "child exited");
        Ok(status
            .code()
            .unwrap_or_else(|| -status.signal().unwrap_or(0)))
    }

    /// Sends `SIGKILL` to the child.
    pub fn kill(&mut self) -> IoResult<()> {
        self.child.kill()?;
        Ok(())
    }

    /// Releases the handle; the child keeps running unobserved.
    pub fn detach(self) {}
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("pid", &self.child.id()).finish()
    }
}

fn open_pidfd(pid: u32) -> IoResult<OwnedFd> {
    // Safety: plain syscall; a negative return is an error.
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0u32) };
    if fd < 0 {
        return Err(IoError::last_os_error());
    }
    // Safety: pidfd_open returned a fresh descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::io::ReadExt;

    #[test]
    fn captures_stdout_and_exit_code() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let mut child = Process::spawn(
                "sh",
                ["-c", "printf hello; exit 3"],
                SpawnFlags::REDIRECT_STDOUT,
            )
            .unwrap();

            let mut out = Vec::new();
            child
                .stdout()
                .as_mut()
                .unwrap()
                .read_to_end(&mut out)
                .await
                .unwrap();
            assert_eq!(out, b"hello");
            assert_eq!(child.wait().await.unwrap(), 3);
        });
    }

    #[test]
    fn kill_reports_signal() {
        let exec = Executor::new().unwrap();
        exec.block_on(async {
            let mut child =
                Process::spawn("sleep", ["3600"], SpawnFlags::empty()).unwrap();
            child.kill().unwrap();
            let code = child.wait().await.unwrap();
            assert_eq!(code, -libc::SIGKILL);
        });
    }
}
