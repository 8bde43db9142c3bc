//! A client/upstream pair and the relay algorithm that runs over it.
//!
//! The pair owns both endpoints; the peer of an endpoint is always the other
//! `Side` of the same pair. Callbacks return a `Flow` instead of tearing the
//! pair down themselves: only the owner of the arena slot can do that.

use crate::arena::PairId;
use crate::endpoint::{Endpoint, Fill};
use crate::socket::Stream;
use crate::token;

use saproxy_core::error::{ProxyError, Result};
use saproxy_core::{Interest, Reactor};

use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Client, Side::Upstream];

    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Upstream => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a live pair is in its lifecycle. A closed pair is no longer in the
/// arena at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Upstream `connect` issued, waiting for it to become writable.
    Connecting,
    /// Both endpoints watched, bytes flowing.
    Relaying,
}

/// What the owner should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Teardown,
}

#[derive(Debug)]
pub struct ConnectionPair<S> {
    state: PairState,
    ends: [Endpoint<S>; 2],
}

impl<S: Stream> ConnectionPair<S> {
    /// Allocate both endpoints with `capacity`-byte buffers.
    pub fn new(client: S, upstream: S, capacity: usize) -> Result<Self> {
        let client = Endpoint::new(client, capacity)?;
        let upstream = Endpoint::new(upstream, capacity)?;
        Ok(Self {
            state: PairState::Connecting,
            ends: [client, upstream],
        })
    }

    pub fn state(&self) -> PairState {
        self.state
    }

    pub fn endpoint(&self, side: Side) -> &Endpoint<S> {
        &self.ends[side.index()]
    }

    /// `(side, side.peer())`, both mutable.
    fn split_mut(&mut self, side: Side) -> (&mut Endpoint<S>, &mut Endpoint<S>) {
        let [client, upstream] = &mut self.ends;
        match side {
            Side::Client => (client, upstream),
            Side::Upstream => (upstream, client),
        }
    }

    /// Watch the upstream for the writability that signals connect completion.
    pub fn watch_connect<R: Reactor>(&mut self, reactor: &mut R, id: PairId) -> Result<()> {
        self.ends[Side::Upstream.index()].watch(reactor, Interest::WRITABLE, token::connect(id))
    }

    /// Connect finished: verify it succeeded and start relaying both ways.
    pub fn on_upstream_connected<R: Reactor>(&mut self, reactor: &mut R, id: PairId) -> Result<()> {
        let upstream = &mut self.ends[Side::Upstream.index()];
        upstream.unwatch(reactor)?;

        if let Some(err) = upstream.stream().take_error()? {
            return Err(ProxyError::Os(err));
        }

        for side in Side::BOTH {
            self.ends[side.index()].watch(reactor, Interest::READABLE, token::relay(id, side))?;
        }
        self.state = PairState::Relaying;
        Ok(())
    }

    /// `side` is readable: pull what it has, then push it to the peer.
    pub fn on_readable<R: Reactor>(&mut self, reactor: &mut R, side: Side) -> Flow {
        let ep = &mut self.ends[side.index()];
        match ep.fill() {
            Ok(Fill::Open) => {}
            Ok(Fill::Closed) => {
                debug!(fd = ep.fd(), side = %side, "orderly shutdown");
                return Flow::Teardown;
            }
            Err(e) => {
                warn!(fd = ep.fd(), side = %side, error = %e, "read failed");
                return Flow::Teardown;
            }
        }
        trace!(side = %side, filled = ep.filled(), "buffered");
        self.flush(reactor, side)
    }

    /// `side` is writable: deliver whatever its peer is holding for it.
    pub fn on_writable<R: Reactor>(&mut self, reactor: &mut R, side: Side) -> Flow {
        self.flush(reactor, side.peer())
    }

    /// Move bytes buffered from `from` into its peer and set interest to match
    /// what is left.
    fn flush<R: Reactor>(&mut self, reactor: &mut R, from: Side) -> Flow {
        let (sender, receiver) = self.split_mut(from);

        if let Err(e) = sender.drain_into(receiver.stream_mut()) {
            warn!(fd = receiver.fd(), side = %from.peer(), error = %e, "write failed");
            return Flow::Teardown;
        }

        let updated = if sender.pending() > 0 {
            // Receiver is behind: stop reading once there is no room left.
            let r = if sender.is_full() {
                sender.remove_interest(reactor, Interest::READABLE)
            } else {
                Ok(())
            };
            r.and_then(|_| receiver.add_interest(reactor, Interest::WRITABLE))
        } else {
            sender.reset();
            sender
                .add_interest(reactor, Interest::READABLE)
                .and_then(|_| receiver.remove_interest(reactor, Interest::WRITABLE))
        };

        match updated {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!(side = %from, error = %e, "failed to update interest");
                Flow::Teardown
            }
        }
    }

    /// Drop every watcher, then close both descriptors.
    pub fn release<R: Reactor>(mut self, reactor: &mut R) {
        for ep in &mut self.ends {
            if let Err(e) = ep.unwatch(reactor) {
                error!(fd = ep.fd(), error = %e, "failed to remove watcher");
            }
        }
    }
}
