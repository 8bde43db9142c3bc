//! Proxy configuration.
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use saproxy::ProxyConfig;
//! use saproxy_core::AddressSpec;
//!
//! let dest = AddressSpec::parse("db.internal", Some("5432"))?;
//! let config = ProxyConfig::from_env(dest).ignore_env(true);
//! config.validate()?;
//! ```

use saproxy_core::address::AddressSpec;
use saproxy_core::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_EVENTS};
use saproxy_core::env::env_get;
use saproxy_core::error::{ProxyError, Result};

/// Largest per-direction buffer accepted by `validate`.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Where every accepted client is relayed to
    pub destination: AddressSpec,
    /// Bytes buffered per direction per pair
    pub buffer_size: usize,
    /// Readiness records harvested per poll
    pub max_events: usize,
    /// Skip the LISTEN_PID / LISTEN_FDS checks
    pub ignore_env: bool,
}

impl ProxyConfig {
    /// Library defaults, no environment lookups.
    pub fn new(destination: AddressSpec) -> Self {
        Self {
            destination,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
            ignore_env: false,
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SAPROXY_BUFFER_SIZE` - Per-direction buffer in bytes
    /// - `SAPROXY_MAX_EVENTS` - Events per reactor poll
    pub fn from_env(destination: AddressSpec) -> Self {
        Self {
            destination,
            buffer_size: env_get("SAPROXY_BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
            max_events: env_get("SAPROXY_MAX_EVENTS", DEFAULT_MAX_EVENTS),
            ignore_env: false,
        }
    }

    // Builder methods

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn ignore_env(mut self, ignore: bool) -> Self {
        self.ignore_env = ignore;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(ProxyError::Config("buffer_size must be > 0"));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ProxyError::Config("buffer_size must be <= 16MiB"));
        }
        if self.max_events == 0 {
            return Err(ProxyError::Config("max_events must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> AddressSpec {
        AddressSpec::parse("localhost", Some("80")).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::new(dest());
        assert_eq!(config.buffer_size, 16384);
        assert_eq!(config.max_events, 64);
        assert!(!config.ignore_env);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ProxyConfig::new(dest())
            .buffer_size(4096)
            .max_events(8)
            .ignore_env(true);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.max_events, 8);
        assert!(config.ignore_env);
    }

    #[test]
    fn test_validation() {
        assert!(ProxyConfig::new(dest()).buffer_size(0).validate().is_err());
        assert!(ProxyConfig::new(dest())
            .buffer_size(MAX_BUFFER_SIZE + 1)
            .validate()
            .is_err());
        assert!(matches!(
            ProxyConfig::new(dest()).max_events(0).validate(),
            Err(ProxyError::Config(_))
        ));
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("SAPROXY_BUFFER_SIZE", "2048");
        let config = ProxyConfig::from_env(dest());
        std::env::remove_var("SAPROXY_BUFFER_SIZE");
        assert_eq!(config.buffer_size, 2048);
    }
}
