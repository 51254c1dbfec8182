// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;

/// Result alias used by every I/O operation in this crate.
pub type IoResult<T> = Result<T, IoError>;

/// A raw platform error (`errno`), kept alongside the portable
/// [`IoError`] classification so nothing is lost in translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("os error {0}")]
pub struct SystemError(pub i32);

/// Platform-independent I/O error classification.
///
/// Cancellation is always reported as [`Canceled`][IoError::Canceled],
/// never as a silently truncated result. Short reads and writes are not
/// errors. Platform errors without a portable class carry their raw
/// value in [`Other`][IoError::Other].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum IoError {
    #[error("access denied")]
    AccessDenied,
    #[error("address already in use")]
    AddressInUse,
    #[error("address not available")]
    AddressNotAvailable,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("host is down")]
    HostDown,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("operation in progress")]
    InProgress,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("message too large")]
    MessageTooLarge,
    #[error("network is down")]
    NetworkDown,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("no buffer space available")]
    NoBufferSpace,
    #[error("not connected")]
    NotConnected,
    #[error("not a socket")]
    NotASocket,
    #[error("operation not supported")]
    OperationNotSupported,
    #[error("operation timed out")]
    TimedOut,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("operation would block")]
    WouldBlock,
    #[error("operation canceled")]
    Canceled,
    #[error("host not found")]
    HostNotFound,
    #[error("tls error")]
    Tls,
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("write returned zero bytes")]
    WriteZero,
    #[error(transparent)]
    Other(SystemError),
}

// === impl IoError ===

impl IoError {
    /// Classifies a raw `errno` value.
    #[must_use]
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EACCES | libc::EPERM => Self::AccessDenied,
            libc::EADDRINUSE => Self::AddressInUse,
            libc::EADDRNOTAVAIL => Self::AddressNotAvailable,
            libc::EBADF => Self::BadFileDescriptor,
            libc::EPIPE => Self::BrokenPipe,
            libc::ECONNABORTED => Self::ConnectionAborted,
            libc::ECONNREFUSED => Self::ConnectionRefused,
            libc::ECONNRESET => Self::ConnectionReset,
            libc::EHOSTDOWN => Self::HostDown,
            libc::EHOSTUNREACH => Self::HostUnreachable,
            libc::EINPROGRESS | libc::EALREADY => Self::InProgress,
            libc::EINVAL => Self::InvalidArgument,
            libc::EMSGSIZE => Self::MessageTooLarge,
            libc::ENETDOWN => Self::NetworkDown,
            libc::ENETUNREACH | libc::ENETRESET => Self::NetworkUnreachable,
            libc::ENOBUFS => Self::NoBufferSpace,
            libc::ENOTCONN => Self::NotConnected,
            libc::ENOTSOCK => Self::NotASocket,
            libc::EOPNOTSUPP => Self::OperationNotSupported,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::EMFILE | libc::ENFILE => Self::TooManyOpenFiles,
            libc::EAGAIN => Self::WouldBlock,
            libc::ECANCELED => Self::Canceled,
            other => Self::Other(SystemError(other)),
        }
    }

    /// Classifies the calling thread's current `errno`.
    #[must_use]
    pub fn last_os_error() -> Self {
        io::Error::last_os_error().into()
    }

    /// The raw platform error, when one was captured.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Other(SystemError(errno)) => Some(*errno),
            _ => None,
        }
    }

    /// The closest standard-library error kind, for interop with code
    /// speaking `std::io`.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        use io::ErrorKind;
        match self {
            Self::AccessDenied => ErrorKind::PermissionDenied,
            Self::AddressInUse => ErrorKind::AddrInUse,
            Self::AddressNotAvailable => ErrorKind::AddrNotAvailable,
            Self::BrokenPipe => ErrorKind::BrokenPipe,
            Self::ConnectionAborted => ErrorKind::ConnectionAborted,
            Self::ConnectionRefused => ErrorKind::ConnectionRefused,
            Self::ConnectionReset => ErrorKind::ConnectionReset,
            Self::HostUnreachable => ErrorKind::HostUnreachable,
            Self::NetworkDown => ErrorKind::NetworkDown,
            Self::NetworkUnreachable => ErrorKind::NetworkUnreachable,
            Self::InvalidArgument => ErrorKind::InvalidInput,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::OperationNotSupported => ErrorKind::Unsupported,
            Self::TimedOut => ErrorKind::TimedOut,
            Self::WouldBlock => ErrorKind::WouldBlock,
            Self::Canceled => ErrorKind::Interrupted,
            Self::UnexpectedEof => ErrorKind::UnexpectedEof,
            Self::WriteZero => ErrorKind::WriteZero,
            _ => ErrorKind::Other,
        }
    }
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => match err.kind() {
                io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
                io::ErrorKind::WriteZero => Self::WriteZero,
                io::ErrorKind::TimedOut => Self::TimedOut,
                io::ErrorKind::WouldBlock => Self::WouldBlock,
                _ => Self::Other(SystemError(0)),
            },
        }
    }
}

impl From<IoError> for io::Error {
    fn from(err: IoError) -> Self {
        match err.raw_os_error() {
            Some(errno) => io::Error::from_raw_os_error(errno),
            None => io::Error::new(err.kind(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        assert_eq!(IoError::from_errno(libc::ECONNREFUSED), IoError::ConnectionRefused);
        assert_eq!(IoError::from_errno(libc::EAGAIN), IoError::WouldBlock);
        assert_eq!(
            IoError::from_errno(libc::EXDEV),
            IoError::Other(SystemError(libc::EXDEV))
        );
    }

    #[test]
    fn std_interop() {
        let err: IoError = io::Error::from_raw_os_error(libc::ECONNRESET).into();
        assert_eq!(err, IoError::ConnectionReset);
        let back: io::Error = IoError::TimedOut.into();
        assert_eq!(back.kind(), io::ErrorKind::TimedOut);
    }
}
