//! Non-blocking stream sockets.
//!
//! `Stream` is the only I/O surface the relay state machine touches;
//! `Listener` is the only one the acceptor touches. Both report would-block
//! as `io::ErrorKind::WouldBlock` (or `Ok(None)` for accept), never as a
//! failure.

use saproxy_core::error::Result;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{getsockopt, sockopt};

use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// A connected, non-blocking byte stream.
pub trait Stream {
    fn fd(&self) -> RawFd;

    /// Read into `buf`. `Ok(0)` means orderly shutdown by the remote end.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning how many bytes the kernel took.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Pending asynchronous error (`SO_ERROR`), cleared by reading it.
    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(None)
    }
}

/// A listening socket that hands out `Stream`s.
pub trait Listener {
    type Stream: Stream;

    fn fd(&self) -> RawFd;

    /// Accept one pending client. `Ok(None)` when none is pending.
    fn accept(&mut self) -> io::Result<Option<(Self::Stream, PeerAddr)>>;
}

/// Client address as reported by accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAddr {
    Inet(SocketAddr),
    Other,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Inet(addr) => write!(f, "{}", addr),
            PeerAddr::Other => write!(f, "non-IP"),
        }
    }
}

/// Set `O_NONBLOCK` on a descriptor, keeping its other status flags.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Decode an IPv4/IPv6 socket address; anything else is `PeerAddr::Other`.
pub(crate) fn peer_from_storage(storage: &libc::sockaddr_storage) -> PeerAddr {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            PeerAddr::Inet(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            PeerAddr::Inet(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => PeerAddr::Other,
    }
}

/// An owned non-blocking stream socket. Closed on drop.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    /// Wrap a descriptor that is already non-blocking.
    pub fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl Stream for Socket {
    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        // MSG_NOSIGNAL: a vanished receiver is EPIPE here, not SIGPIPE.
        let n = unsafe {
            libc::send(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        let err = getsockopt(&self.fd, sockopt::SocketError).map_err(io::Error::from)?;
        Ok((err != 0).then(|| io::Error::from_raw_os_error(err)))
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// An owned listening socket, non-blocking. Closed on drop.
#[derive(Debug)]
pub struct ListenSocket {
    fd: OwnedFd,
}

impl ListenSocket {
    /// Take ownership of a bound, listening descriptor and make it non-blocking.
    pub fn from_owned(fd: OwnedFd) -> Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self { fd })
    }
}

impl Listener for ListenSocket {
    type Stream = Socket;

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn accept(&mut self) -> io::Result<Option<(Socket, PeerAddr)>> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

        loop {
            let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            // Accepted sockets do not inherit O_NONBLOCK from the listener.
            let fd = unsafe {
                libc::accept4(
                    self.fd.as_raw_fd(),
                    &mut storage as *mut _ as *mut libc::sockaddr,
                    &mut len,
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if fd >= 0 {
                let socket = Socket::from_owned(unsafe { OwnedFd::from_raw_fd(fd) });
                return Ok(Some((socket, peer_from_storage(&storage))));
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(None),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }
}

impl AsRawFd for ListenSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
