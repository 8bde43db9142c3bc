//! Environment variable utilities
//!
//! Typed lookups with defaults, used for `SAPROXY_*` tuning overrides.
//!
//! # Usage
//!
//! ```ignore
//! use saproxy_core::env::{env_get, env_get_opt};
//!
//! let buffer: usize = env_get("SAPROXY_BUFFER_SIZE", 16384);
//! let events: Option<usize> = env_get_opt("SAPROXY_MAX_EVENTS");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Unset and unparsable values both yield the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully,
/// `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
