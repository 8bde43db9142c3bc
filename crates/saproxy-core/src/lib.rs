//! # saproxy-core
//!
//! Core types and traits for the socket-activation proxy.
//!
//! This crate is platform-agnostic and performs no socket I/O of its own.
//! The epoll implementation of [`Reactor`] lives in `saproxy-reactor`; the
//! relay state machine that consumes it lives in `saproxy`.
//!
//! ## Modules
//!
//! - `interest` - Readable/Writable interest sets
//! - `reactor` - Reactor contract, watcher handles and the dispatch loop
//! - `address` - Validated upstream destination (`AddressSpec`)
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod address;
pub mod env;
pub mod error;
pub mod interest;
pub mod reactor;

// Re-exports for convenience
pub use address::AddressSpec;
pub use env::{env_get, env_get_opt};
pub use error::{ProxyError, Result};
pub use interest::Interest;
pub use reactor::{run, turn, EventHandler, Reactor, Readiness, Token, WatcherId};

/// Constants shared across the workspace
pub mod constants {
    /// Per-direction relay buffer capacity in bytes
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    /// Events harvested per reactor poll
    pub const DEFAULT_MAX_EVENTS: usize = 64;

    /// First inherited descriptor under socket activation (`SD_LISTEN_FDS_START`)
    pub const LISTEN_FDS_START: i32 = 3;

    /// Size of `sockaddr_un.sun_path` on Linux, terminating NUL included
    pub const UNIX_PATH_MAX: usize = 108;
}
