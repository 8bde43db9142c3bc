//! Outbound connection attempts.
//!
//! `Connector::connect` returns as soon as a non-blocking `connect(2)` has
//! been issued. `EINPROGRESS` is the normal outcome; completion is signalled
//! later by the upstream socket becoming writable. Any other connect error
//! fails the attempt immediately.
//!
//! Inet destinations are resolved with `getaddrinfo(AF_UNSPEC, SOCK_STREAM)`
//! and only the first candidate is tried.

use crate::socket::{peer_from_storage, Socket};

use saproxy_core::address::AddressSpec;
use saproxy_core::error::{ProxyError, Result};

use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, OwnedFd};
use std::path::Path;
use std::ptr;

use tracing::debug;

/// Produces a non-blocking, possibly still connecting, upstream stream.
pub trait Connector {
    type Stream: crate::socket::Stream;

    fn connect(&mut self, destination: &AddressSpec) -> Result<Self::Stream>;
}

/// Connects real sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketConnector;

impl Connector for SocketConnector {
    type Stream = Socket;

    fn connect(&mut self, destination: &AddressSpec) -> Result<Socket> {
        let target = match destination {
            AddressSpec::Inet { host, service } => resolve_first(host, service)?,
            AddressSpec::LocalPath { path } => local_target(path)?,
        };
        connect_nonblocking(&target, destination)
    }
}

/// A resolved socket address ready for `socket(2)` + `connect(2)`.
struct Target {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
    family: libc::c_int,
    protocol: libc::c_int,
}

/// Frees a `getaddrinfo` result list on drop.
struct AddrInfoList(*mut libc::addrinfo);

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

fn resolve_first(host: &str, service: &str) -> Result<Target> {
    let resolve_err = |reason: String| ProxyError::Resolve {
        host: host.to_string(),
        service: service.to_string(),
        reason,
    };

    let c_host = CString::new(host).map_err(|_| resolve_err("host contains NUL".into()))?;
    let c_service =
        CString::new(service).map_err(|_| resolve_err("service contains NUL".into()))?;

    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;

    debug!(host, service, "looking up address info");

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_service.as_ptr(), &hints, &mut res) };
    let list = AddrInfoList(res);
    if rc != 0 {
        let reason = if rc == libc::EAI_SYSTEM {
            io::Error::last_os_error().to_string()
        } else {
            unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
                .to_string_lossy()
                .into_owned()
        };
        return Err(resolve_err(reason));
    }
    if list.0.is_null() {
        return Err(resolve_err("no result".into()));
    }

    let ai = unsafe { &*list.0 };
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = (ai.ai_addrlen as usize).min(mem::size_of::<libc::sockaddr_storage>());
    unsafe {
        ptr::copy_nonoverlapping(
            ai.ai_addr as *const u8,
            &mut storage as *mut _ as *mut u8,
            len,
        );
    }

    Ok(Target {
        storage,
        len: len as libc::socklen_t,
        family: ai.ai_family,
        protocol: ai.ai_protocol,
    })
}

fn local_target(path: &Path) -> Result<Target> {
    let bytes = path.as_os_str().as_bytes();

    let mut sun: libc::sockaddr_un = unsafe { mem::zeroed() };
    sun.sun_family = libc::AF_UNIX as libc::sa_family_t;

    // Leave room for the terminating NUL.
    if bytes.len() >= sun.sun_path.len() {
        return Err(ProxyError::InvalidAddress(format!(
            "socket path {} is longer than {} bytes",
            path.display(),
            sun.sun_path.len() - 1
        )));
    }
    if bytes.contains(&0) {
        return Err(ProxyError::InvalidAddress("socket path contains NUL".into()));
    }
    for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    unsafe {
        ptr::copy_nonoverlapping(
            &sun as *const _ as *const u8,
            &mut storage as *mut _ as *mut u8,
            mem::size_of::<libc::sockaddr_un>(),
        );
    }

    Ok(Target {
        storage,
        len: (mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t,
        family: libc::AF_UNIX,
        protocol: 0,
    })
}

fn connect_nonblocking(target: &Target, destination: &AddressSpec) -> Result<Socket> {
    let fd = unsafe {
        libc::socket(
            target.family,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            target.protocol,
        )
    };
    if fd < 0 {
        return Err(ProxyError::Socket(io::Error::last_os_error()));
    }
    // Owned from here on: every early return closes it.
    let socket = Socket::from_owned(unsafe { OwnedFd::from_raw_fd(fd) });

    let ret = unsafe {
        libc::connect(
            fd,
            &target.storage as *const _ as *const libc::sockaddr,
            target.len,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        let in_progress = matches!(err.raw_os_error(), Some(libc::EINPROGRESS) | Some(libc::EINTR));
        if !in_progress {
            return Err(ProxyError::Connect {
                target: destination.to_string(),
                cause: err,
            });
        }
    }

    debug!(
        fd,
        destination = %destination,
        resolved = %peer_from_storage(&target.storage),
        "upstream connection initiated"
    );
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Stream;
    use std::net::TcpListener;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_connect_inet_numeric() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let dest = AddressSpec::parse("127.0.0.1", Some(&port)).unwrap();

        let sock = SocketConnector.connect(&dest).unwrap();
        let (_accepted, _) = listener.accept().unwrap();
        assert!(sock.take_error().unwrap().is_none());
    }

    #[test]
    fn test_resolve_unknown_service() {
        let dest = AddressSpec::parse("127.0.0.1", Some("no-such-service-saproxy")).unwrap();
        assert!(matches!(
            SocketConnector.connect(&dest),
            Err(ProxyError::Resolve { .. })
        ));
    }

    #[test]
    fn test_connect_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upstream.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let dest = AddressSpec::parse(path.to_str().unwrap(), None).unwrap();

        let sock = SocketConnector.connect(&dest).unwrap();
        assert!(sock.fd() >= 0);
        listener.accept().unwrap();
    }

    #[test]
    fn test_connect_missing_local_path_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody-home.sock");
        let dest = AddressSpec::parse(path.to_str().unwrap(), None).unwrap();

        match SocketConnector.connect(&dest) {
            Err(ProxyError::Connect { cause, .. }) => {
                assert_eq!(cause.raw_os_error(), Some(libc::ENOENT))
            }
            other => panic!("expected connect error, got {:?}", other.map(|s| s.fd())),
        }
    }

    #[test]
    fn test_local_path_too_long() {
        // Built directly: parse would reject it first.
        let dest = AddressSpec::LocalPath {
            path: format!("/{}", "x".repeat(200)).into(),
        };
        assert!(matches!(
            SocketConnector.connect(&dest),
            Err(ProxyError::InvalidAddress(_))
        ));
    }
}
