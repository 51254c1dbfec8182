// Copyright 2026 the strand authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Thin non-blocking syscall wrappers. Every function reports failures
//! through [`IoError`]; `EINTR` is retried here so callers never see it.

use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use socket2::SockAddr;

use crate::io::{IoError, IoResult};

macro_rules! retry_eintr {
    ($call:expr) => {
        loop {
            let ret = $call;
            if ret >= 0 {
                break Ok(ret as usize);
            }
            let err = IoError::last_os_error();
            if err != IoError::Other(crate::io::SystemError(libc::EINTR)) {
                break Err(err);
            }
        }
    };
}

pub(crate) fn set_nonblocking(fd: RawFd) -> IoResult<()> {
    // Safety: fcntl on a caller-provided fd; no memory is involved.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(IoError::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(IoError::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn read(fd: RawFd, buf: &mut [u8], offset: Option<u64>) -> IoResult<usize> {
    // Safety: the buffer outlives the call and the length is its own.
    unsafe {
        match offset {
            Some(offset) => retry_eintr!(libc::pread(
                fd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset as libc::off_t,
            )),
            None => retry_eintr!(libc::read(fd, buf.as_mut_ptr().cast(), buf.len())),
        }
    }
}

pub(crate) fn write(fd: RawFd, buf: &[u8], offset: Option<u64>) -> IoResult<usize> {
    // Safety: the buffer outlives the call and the length is its own.
    unsafe {
        match offset {
            Some(offset) => retry_eintr!(libc::pwrite(
                fd,
                buf.as_ptr().cast(),
                buf.len(),
                offset as libc::off_t,
            )),
            None => retry_eintr!(libc::write(fd, buf.as_ptr().cast(), buf.len())),
        }
    }
}

pub(crate) fn recvfrom(
    fd: RawFd,
    buf: &mut [u8],
    flags: i32,
) -> IoResult<(usize, Option<SockAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    // Safety: buffer and sockaddr storage are live locals of known size.
    let n = unsafe {
        retry_eintr!(libc::recvfrom(
            fd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            flags,
            (&raw mut storage).cast(),
            &raw mut len,
        ))?
    };
    Ok((n, addr_from_storage(&storage, len)))
}

pub(crate) fn sendto(
    fd: RawFd,
    buf: &[u8],
    flags: i32,
    addr: Option<&SockAddr>,
) -> IoResult<usize> {
    let (addr_ptr, addr_len) = match addr {
        Some(addr) => (addr.as_ptr().cast::<libc::sockaddr>(), addr.len()),
        None => (std::ptr::null(), 0),
    };
    // Safety: buffer and (optional) address are live for the call.
    unsafe {
        retry_eintr!(libc::sendto(
            fd,
            buf.as_ptr().cast(),
            buf.len(),
            flags,
            addr_ptr,
            addr_len,
        ))
    }
}

pub(crate) fn sendmsg(fd: RawFd, msg: &libc::msghdr, flags: i32) -> IoResult<usize> {
    // Safety: the caller assembled a valid msghdr over live buffers.
    unsafe { retry_eintr!(libc::sendmsg(fd, msg, flags)) }
}

pub(crate) fn recvmsg(fd: RawFd, msg: &mut libc::msghdr, flags: i32) -> IoResult<usize> {
    // Safety: the caller assembled a valid msghdr over live buffers.
    unsafe { retry_eintr!(libc::recvmsg(fd, msg, flags)) }
}

pub(crate) fn accept(fd: RawFd) -> IoResult<(OwnedFd, Option<SockAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    // Safety: the sockaddr storage is a live local of known size.
    let accepted = unsafe {
        retry_eintr!(libc::accept4(
            fd,
            (&raw mut storage).cast(),
            &raw mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        ))?
    };
    // Safety: accept4 returned a fresh descriptor we now own.
    let owned = unsafe { OwnedFd::from_raw_fd(accepted as RawFd) };
    Ok((owned, addr_from_storage(&storage, len)))
}

pub(crate) fn connect(fd: RawFd, addr: &SockAddr) -> IoResult<()> {
    // Safety: the address is live for the call.
    let ret = unsafe { libc::connect(fd, addr.as_ptr().cast(), addr.len()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

/// Reads and clears `SO_ERROR`, the outcome of a non-blocking connect.
pub(crate) fn take_socket_error(fd: RawFd) -> IoResult<()> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // Safety: out-params are live locals of the advertised size.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&raw mut err).cast(),
            &raw mut len,
        )
    };
    if ret != 0 {
        Err(IoError::last_os_error())
    } else if err != 0 {
        Err(IoError::from_errno(err))
    } else {
        Ok(())
    }
}

pub(crate) fn pipe() -> IoResult<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    // Safety: fds is a live two-element array.
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if ret != 0 {
        return Err(IoError::last_os_error());
    }
    // Safety: pipe2 returned two fresh descriptors we now own.
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> IoResult<()> {
    // Safety: plain syscall on a caller-provided fd.
    let ret = unsafe { libc::shutdown(fd, how) };
    if ret == 0 || IoError::last_os_error() == IoError::NotConnected {
        Ok(())
    } else {
        Err(IoError::last_os_error())
    }
}

fn addr_from_storage(
    storage: &libc::sockaddr_storage,
    len: libc::socklen_t,
) -> Option<SockAddr> {
    if len == 0 || storage.ss_family == libc::AF_UNSPEC as libc::sa_family_t {
        return None;
    }
    // Safety: the kernel filled `len` bytes of a valid address of the
    // reported family into the storage.
    Some(unsafe { SockAddr::new(*storage, len) })
}
