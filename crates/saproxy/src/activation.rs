//! Socket activation.
//!
//! The supervisor passes listening sockets starting at descriptor
//! `LISTEN_FDS_START` and announces them through `LISTEN_PID` (who they are
//! meant for) and `LISTEN_FDS` (how many). Exactly one stream listener is
//! accepted.

use crate::socket::ListenSocket;

use saproxy_core::constants::LISTEN_FDS_START;
use saproxy_core::error::{ProxyError, Result};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{getsockopt, sockopt, SockType};
use nix::unistd::getpid;

use std::env;
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

const ENV_LISTEN_PID: &str = "LISTEN_PID";
const ENV_LISTEN_FDS: &str = "LISTEN_FDS";
const ENV_LISTEN_FDNAMES: &str = "LISTEN_FDNAMES";

/// Count the descriptors passed to this process.
///
/// Zero when the variables are absent or addressed to another process.
/// Every passed descriptor is marked close-on-exec. With `unset_env` the
/// activation variables are removed so children do not see them.
pub fn listen_fds(unset_env: bool) -> Result<usize> {
    let pid = env::var(ENV_LISTEN_PID).ok();
    let fds = env::var(ENV_LISTEN_FDS).ok();
    let result = parse_listen_env(pid.as_deref(), fds.as_deref(), getpid().as_raw());

    if unset_env {
        env::remove_var(ENV_LISTEN_PID);
        env::remove_var(ENV_LISTEN_FDS);
        env::remove_var(ENV_LISTEN_FDNAMES);
    }

    let n = result?;
    for fd in LISTEN_FDS_START..LISTEN_FDS_START + n as RawFd {
        let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
        fcntl(fd, FcntlArg::F_SETFD(flags | FdFlag::FD_CLOEXEC))?;
    }
    Ok(n)
}

fn parse_listen_env(pid: Option<&str>, fds: Option<&str>, own_pid: i32) -> Result<usize> {
    let Some(pid) = pid else {
        return Ok(0);
    };
    let pid: i32 = pid
        .trim()
        .parse()
        .map_err(|_| ProxyError::Activation(format!("{ENV_LISTEN_PID}={pid:?} is not a pid")))?;
    if pid != own_pid {
        return Ok(0);
    }

    let Some(fds) = fds else {
        return Ok(0);
    };
    let n: usize = fds
        .trim()
        .parse()
        .map_err(|_| ProxyError::Activation(format!("{ENV_LISTEN_FDS}={fds:?} is not a count")))?;
    if n > (RawFd::MAX - LISTEN_FDS_START) as usize {
        return Err(ProxyError::Activation(format!("{ENV_LISTEN_FDS}={n} is out of range")));
    }
    Ok(n)
}

/// Require `fd` to be a stream socket in the listening state.
pub fn check_listening_stream(fd: BorrowedFd<'_>) -> Result<()> {
    let ty = getsockopt(&fd, sockopt::SockType).map_err(|e| match e {
        Errno::ENOTSOCK => {
            ProxyError::Activation(format!("descriptor {} is not a socket", fd.as_raw_fd()))
        }
        other => other.into(),
    })?;
    if ty != SockType::Stream {
        return Err(ProxyError::Activation(format!(
            "descriptor {} is a {:?} socket, not a stream socket",
            fd.as_raw_fd(),
            ty
        )));
    }
    if !getsockopt(&fd, sockopt::AcceptConn)? {
        return Err(ProxyError::Activation(format!(
            "descriptor {} is not listening",
            fd.as_raw_fd()
        )));
    }
    Ok(())
}

/// Take over the inherited listener at `LISTEN_FDS_START`.
///
/// `ignore_env` skips the environment count check but never the socket
/// check.
pub fn inherit_listener(ignore_env: bool) -> Result<ListenSocket> {
    if !ignore_env {
        match listen_fds(true)? {
            0 => return Err(ProxyError::NoListenFds),
            1 => {}
            n => return Err(ProxyError::TooManyListenFds(n)),
        }
    }
    adopt(LISTEN_FDS_START)
}

fn adopt(fd: RawFd) -> Result<ListenSocket> {
    match fcntl(fd, FcntlArg::F_GETFD) {
        Ok(_) => {}
        Err(Errno::EBADF) => {
            return Err(ProxyError::Activation(format!("descriptor {fd} is not open")))
        }
        Err(e) => return Err(e.into()),
    }

    // Open, checked above, and owned by nobody else in this process.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    check_listening_stream(borrowed)?;

    debug!(fd, "adopting inherited listener");
    ListenSocket::from_owned(unsafe { OwnedFd::from_raw_fd(fd) })
}
