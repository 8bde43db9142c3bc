//! Error types for the proxy

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors that can occur while setting up or running the proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Destination failed validation
    #[error("invalid destination: {0}")]
    InvalidAddress(String),

    /// Host/service lookup failed
    #[error("could not resolve {host}:{service}: {reason}")]
    Resolve {
        host: String,
        service: String,
        reason: String,
    },

    /// Creating the outbound socket failed
    #[error("socket: {0}")]
    Socket(io::Error),

    /// Outbound connect failed with something other than EINPROGRESS
    #[error("connect to {target}: {cause}")]
    Connect { target: String, cause: io::Error },

    /// Accepting a client failed
    #[error("accept: {0}")]
    Accept(io::Error),

    /// Relay buffer allocation failed
    #[error("could not allocate {0} byte relay buffer")]
    Alloc(usize),

    /// A reactor call failed (registration, interest change, wait)
    #[error("reactor: {0}")]
    Reactor(io::Error),

    /// Watcher handle does not name a live watcher
    #[error("unknown watcher {0}")]
    UnknownWatcher(usize),

    /// No inherited descriptors were found
    #[error("found zero inheritable sockets; is this running as a socket-activated service?")]
    NoListenFds,

    /// More than one inherited descriptor was found
    #[error("can't listen on more than one socket (got {0})")]
    TooManyListenFds(usize),

    /// Activation environment or descriptor is unusable
    #[error("socket activation: {0}")]
    Activation(String),

    /// Configuration is invalid
    #[error("config: {0}")]
    Config(&'static str),

    /// Other OS error
    #[error("os error: {0}")]
    Os(io::Error),
}

// Messages embed the io::Error; no variant reports a `source`.
impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        ProxyError::Os(e)
    }
}

impl From<Errno> for ProxyError {
    fn from(e: Errno) -> Self {
        ProxyError::Os(io::Error::from_raw_os_error(e as i32))
    }
}
