//! Acceptor and dispatcher.
//!
//! `Proxy` owns the listener, the connector and the arena of live pairs. It
//! implements `EventHandler`, so the reactor's dispatch loop drives it
//! directly: every readiness record is decoded from its token and routed to
//! one of the named transitions below.
//!
//! ```text
//!   accept ──▶ Connecting ──(upstream writable, SO_ERROR == 0)──▶ Relaying
//!                  │                                                 │
//!                  └──── connect / registration failure ────┐        │ EOF, I/O error
//!                                                           ▼        ▼
//!                                                         teardown (removed)
//! ```

use crate::arena::{Arena, PairId};
use crate::config::ProxyConfig;
use crate::connector::Connector;
use crate::pair::{ConnectionPair, Flow, PairState, Side};
use crate::socket::{Listener, Stream};
use crate::token::{self, Target};

use saproxy_core::address::AddressSpec;
use saproxy_core::error::{ProxyError, Result};
use saproxy_core::{EventHandler, Interest, Reactor, Readiness, WatcherId};

use tracing::{debug, error, trace, warn};

pub struct Proxy<L, C>
where
    L: Listener,
    C: Connector<Stream = L::Stream>,
{
    listener: L,
    listen_watcher: Option<WatcherId>,
    connector: C,
    destination: AddressSpec,
    buffer_size: usize,
    pairs: Arena<ConnectionPair<L::Stream>>,
    /// Pairs assembled and not yet torn down.
    active: usize,
}

impl<L, C> Proxy<L, C>
where
    L: Listener,
    C: Connector<Stream = L::Stream>,
{
    pub fn new(config: &ProxyConfig, listener: L, connector: C) -> Self {
        Self {
            listener,
            listen_watcher: None,
            connector,
            destination: config.destination.clone(),
            buffer_size: config.buffer_size,
            pairs: Arena::new(),
            active: 0,
        }
    }

    pub fn active_pairs(&self) -> usize {
        self.active
    }

    pub fn pair(&self, id: PairId) -> Option<&ConnectionPair<L::Stream>> {
        self.pairs.get(id)
    }

    pub fn pair_ids(&self) -> Vec<PairId> {
        self.pairs.ids()
    }

    /// Begin accepting.
    pub fn start<R: Reactor>(&mut self, reactor: &mut R) -> Result<()> {
        let id = reactor.add_watcher(self.listener.fd(), Interest::READABLE, token::listener())?;
        self.listen_watcher = Some(id);
        debug!(fd = self.listener.fd(), destination = %self.destination, "accepting");
        Ok(())
    }

    /// The listener is readable: accept one client and start its upstream
    /// connect. Any failure drops only this client.
    pub fn on_accept_ready<R: Reactor>(&mut self, reactor: &mut R) {
        let (client, peer) = match self.listener.accept() {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                trace!("accept would block");
                return;
            }
            Err(e) => {
                error!(error = %ProxyError::Accept(e), "failed to accept client");
                return;
            }
        };
        debug!(fd = client.fd(), peer = %peer, clients = self.active + 1, "accepted client");

        let upstream = match self.connector.connect(&self.destination) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "upstream unavailable, dropping client");
                return;
            }
        };

        let pair = match ConnectionPair::new(client, upstream, self.buffer_size) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "dropping client");
                return;
            }
        };

        let id = self.pairs.insert(pair);
        let watched = match self.pairs.get_mut(id) {
            Some(pair) => pair.watch_connect(reactor, id),
            None => return,
        };
        if let Err(e) = watched {
            warn!(pair = %id, error = %e, "failed to watch upstream connect, dropping client");
            if let Some(pair) = self.pairs.remove(id) {
                pair.release(reactor);
            }
            return;
        }

        self.active += 1;
    }

    /// The upstream of `id` became writable for the first time.
    pub fn on_upstream_connected<R: Reactor>(&mut self, reactor: &mut R, id: PairId) {
        let Some(pair) = self.pairs.get_mut(id) else {
            trace!(pair = %id, "connect event for closed pair");
            return;
        };
        if pair.state() != PairState::Connecting {
            return;
        }

        if let Err(e) = pair.on_upstream_connected(reactor, id) {
            warn!(pair = %id, destination = %self.destination, error = %e, "upstream connect failed");
            self.teardown(reactor, id);
            return;
        }
        debug!(pair = %id, "relaying");
    }

    pub fn on_relay_readable<R: Reactor>(&mut self, reactor: &mut R, id: PairId, side: Side) {
        self.on_relay_event(reactor, id, side, Interest::READABLE);
    }

    pub fn on_relay_writable<R: Reactor>(&mut self, reactor: &mut R, id: PairId, side: Side) {
        self.on_relay_event(reactor, id, side, Interest::WRITABLE);
    }

    /// Read path first, then the write path if the pair survived it.
    fn on_relay_event<R: Reactor>(&mut self, reactor: &mut R, id: PairId, side: Side, ready: Interest) {
        let Some(pair) = self.pairs.get_mut(id) else {
            trace!(pair = %id, side = %side, "event for closed pair");
            return;
        };

        let mut flow = Flow::Continue;
        if ready.contains(Interest::READABLE) {
            flow = pair.on_readable(reactor, side);
        }
        if flow == Flow::Continue && ready.contains(Interest::WRITABLE) {
            flow = pair.on_writable(reactor, side);
        }

        if flow == Flow::Teardown {
            self.teardown(reactor, id);
        }
    }

    /// Remove both watchers and close both descriptors of `id`. No-op for a
    /// pair that is already gone.
    pub fn teardown<R: Reactor>(&mut self, reactor: &mut R, id: PairId) {
        let Some(pair) = self.pairs.remove(id) else {
            return;
        };
        pair.release(reactor);
        self.active = self.active.saturating_sub(1);
        debug!(pair = %id, clients = self.active, "pair closed");
    }

    /// Tear down every pair and stop accepting.
    pub fn shutdown<R: Reactor>(&mut self, reactor: &mut R) {
        for id in self.pairs.ids() {
            self.teardown(reactor, id);
        }
        if let Some(id) = self.listen_watcher.take() {
            if let Err(e) = reactor.remove_watcher(id) {
                error!(error = %e, "failed to remove listener watcher");
            }
        }
    }
}

impl<R, L, C> EventHandler<R> for Proxy<L, C>
where
    R: Reactor,
    L: Listener,
    C: Connector<Stream = L::Stream>,
{
    fn on_event(&mut self, reactor: &mut R, event: Readiness) {
        match token::decode(event.token) {
            Some(Target::Listener) => self.on_accept_ready(reactor),
            Some(Target::Connect(id)) => self.on_upstream_connected(reactor, id),
            Some(Target::Relay(id, side)) => self.on_relay_event(reactor, id, side, event.ready),
            None => warn!(token = event.token.0, "event for unknown token"),
        }
    }
}
