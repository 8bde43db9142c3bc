//! One direction of a relayed session.
//!
//! An `Endpoint` owns a stream and the buffer of bytes read *from* that
//! stream that are still owed to the peer. `filled` counts bytes read in,
//! `sent` counts bytes of those already written out, so
//! `sent <= filled <= capacity` always holds.
//!
//! The endpoint also mirrors its reactor registration: `interest` is the mask
//! last handed to the reactor, and the watcher is enabled exactly when that
//! mask is non-empty.

use crate::socket::Stream;

use saproxy_core::error::{ProxyError, Result};
use saproxy_core::{Interest, Reactor, Token, WatcherId};

use std::io;
use std::os::unix::io::RawFd;

/// Outcome of a read pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Stream still open; the buffer may or may not be full.
    Open,
    /// Remote end shut down its write side.
    Closed,
}

#[derive(Debug)]
pub struct Endpoint<S> {
    stream: S,
    buffer: Box<[u8]>,
    filled: usize,
    sent: usize,
    interest: Interest,
    watcher: Option<WatcherId>,
}

impl<S: Stream> Endpoint<S> {
    /// Wrap `stream` with a zeroed buffer of `capacity` bytes.
    pub fn new(stream: S, capacity: usize) -> Result<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| ProxyError::Alloc(capacity))?;
        buffer.resize(capacity, 0u8);

        Ok(Self {
            stream,
            buffer: buffer.into_boxed_slice(),
            filled: 0,
            sent: 0,
            interest: Interest::empty(),
            watcher: None,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.fd()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Bytes read but not yet delivered to the peer.
    pub fn pending(&self) -> usize {
        self.filled - self.sent
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.buffer.len()
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn watcher(&self) -> Option<WatcherId> {
        self.watcher
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Read until the buffer is full or the stream would block.
    pub fn fill(&mut self) -> io::Result<Fill> {
        while self.filled < self.buffer.len() {
            match self.stream.recv(&mut self.buffer[self.filled..]) {
                Ok(0) => return Ok(Fill::Closed),
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Fill::Open)
    }

    /// Write pending bytes to `to` until done or it would block.
    pub fn drain_into(&mut self, to: &mut S) -> io::Result<()> {
        while self.sent < self.filled {
            match to.send(&self.buffer[self.sent..self.filled]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Forget delivered bytes. Only meaningful once `pending() == 0`.
    pub fn reset(&mut self) {
        self.filled = 0;
        self.sent = 0;
    }

    /// Register a fresh watcher, replacing nothing: the endpoint must not be
    /// watched already.
    pub fn watch<R: Reactor>(&mut self, reactor: &mut R, interest: Interest, token: Token) -> Result<()> {
        debug_assert!(self.watcher.is_none());
        let id = reactor.add_watcher(self.stream.fd(), interest, token)?;
        self.watcher = Some(id);
        self.interest = interest;
        Ok(())
    }

    /// Drop the watcher, if any. Safe to call repeatedly.
    pub fn unwatch<R: Reactor>(&mut self, reactor: &mut R) -> Result<()> {
        self.interest = Interest::empty();
        match self.watcher.take() {
            Some(id) => reactor.remove_watcher(id),
            None => Ok(()),
        }
    }

    pub fn add_interest<R: Reactor>(&mut self, reactor: &mut R, interest: Interest) -> Result<()> {
        let Some(id) = self.watcher else {
            return Ok(());
        };
        let wanted = self.interest | interest;
        if wanted == self.interest {
            return Ok(());
        }
        reactor.set_interest(id, wanted)?;
        reactor.enable(id)?;
        self.interest = wanted;
        Ok(())
    }

    pub fn remove_interest<R: Reactor>(&mut self, reactor: &mut R, interest: Interest) -> Result<()> {
        let Some(id) = self.watcher else {
            return Ok(());
        };
        let wanted = self.interest - interest;
        if wanted == self.interest {
            return Ok(());
        }
        reactor.set_interest(id, wanted)?;
        if wanted.is_empty() {
            reactor.disable(id)?;
        }
        self.interest = wanted;
        Ok(())
    }
}
