//! Upstream destination description.
//!
//! A destination is either an Internet host plus service (port number or
//! service name, resolved later), or a filesystem path to a local stream
//! socket. The kind is decided by the first character: a leading `/` means
//! a local path, anything else is a host.

use crate::constants::UNIX_PATH_MAX;
use crate::error::{ProxyError, Result};

use std::fmt;
use std::path::PathBuf;

/// Where relayed connections are sent. Validated once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    Inet { host: String, service: String },
    LocalPath { path: PathBuf },
}

impl AddressSpec {
    /// Build from the positional `destination [port-or-service]` pair.
    pub fn parse(destination: &str, service: Option<&str>) -> Result<Self> {
        if destination.is_empty() {
            return Err(ProxyError::InvalidAddress("destination is empty".into()));
        }

        if destination.starts_with('/') {
            if service.is_some() {
                return Err(ProxyError::InvalidAddress(
                    "a port or service is not allowed for Unix socket destinations".into(),
                ));
            }
            // sun_path needs room for the terminating NUL.
            if destination.len() >= UNIX_PATH_MAX {
                return Err(ProxyError::InvalidAddress(format!(
                    "socket path is longer than {} bytes",
                    UNIX_PATH_MAX - 1
                )));
            }
            if destination.contains('\0') {
                return Err(ProxyError::InvalidAddress("socket path contains NUL".into()));
            }
            return Ok(AddressSpec::LocalPath { path: PathBuf::from(destination) });
        }

        match service {
            Some(s) if !s.is_empty() => Ok(AddressSpec::Inet {
                host: destination.to_string(),
                service: s.to_string(),
            }),
            _ => Err(ProxyError::InvalidAddress(
                "a port or service is required for IP destinations".into(),
            )),
        }
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpec::Inet { host, service } if host.contains(':') => {
                write!(f, "[{}]:{}", host, service)
            }
            AddressSpec::Inet { host, service } => write!(f, "{}:{}", host, service),
            AddressSpec::LocalPath { path } => write!(f, "unix:{}", path.display()),
        }
    }
}
