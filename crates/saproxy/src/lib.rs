//! # saproxy: socket-activation relay engine
//!
//! Accepts clients on an inherited listening socket, opens one upstream
//! connection per client and shuttles bytes both ways through a single
//! reactor, with a fixed-size buffer per direction.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  readable   ┌──────────────────────────────────────┐
//! │  listener    │────────────▶│ Proxy::on_accept_ready               │
//! └──────────────┘             │   accept → Connector::connect        │
//!                              │   Arena::insert(ConnectionPair)      │
//!                              │   watch upstream for WRITABLE        │
//!                              └──────────────────┬───────────────────┘
//!                                                 │ writable (connected)
//!                              ┌──────────────────▼───────────────────┐
//!                              │ Proxy::on_upstream_connected         │
//!                              │   drop watcher, check SO_ERROR       │
//!                              │   watch both sides for READABLE      │
//!                              └──────────────────┬───────────────────┘
//!                                                 │ readable / writable
//!                              ┌──────────────────▼───────────────────┐
//!                              │ ConnectionPair::on_readable/writable │
//!                              │   fill buffer → flush to peer        │
//!                              │   toggle interest for backpressure   │
//!                              └──────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! - **Token = kind | side | generation | index**: events route to a pair
//!   without lookup tables, and stale tokens from a torn-down pair miss.
//! - **Pair is the unit of ownership**: both endpoints live in one arena
//!   slot; the peer of an endpoint is the other `Side` of the same slot.
//! - **Generic over `Stream`**: the state machine runs unchanged over real
//!   sockets or in-memory test doubles.

pub mod activation;
pub mod arena;
pub mod config;
pub mod connector;
pub mod endpoint;
pub mod pair;
pub mod proxy;
pub mod socket;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the main types
pub use arena::PairId;
pub use config::ProxyConfig;
pub use connector::{Connector, SocketConnector};
pub use endpoint::Endpoint;
pub use pair::{ConnectionPair, PairState, Side};
pub use proxy::Proxy;
pub use socket::{ListenSocket, Listener, PeerAddr, Socket, Stream};
