//! Reactor contract.
//!
//! A `Reactor` multiplexes readiness for many descriptors on one thread.
//! Callers register a descriptor with an initial interest and a `Token`;
//! every dispatch round hands back `Readiness` records carrying that token
//! and the subset of the registered interest that is now satisfied.
//!
//! # Implementors
//!
//! - `EpollReactor` (saproxy-reactor, default on Linux): level-triggered
//!   epoll. A watcher is in the epoll set only while it is enabled and its
//!   interest is non-empty.
//!
//! # Watcher states
//!
//! Each watcher carries an interest mask and an enabled flag, independently.
//! `set_interest` changes the mask without touching the flag; a disabled
//! watcher never reports readiness whatever its mask.
//!
//! **Contract:** no method may block except `poll`, and `poll` only for up
//! to its timeout. A signal interrupting the wait is reported as an empty
//! round, not an error.

use crate::error::Result;
use crate::interest::Interest;

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Caller-chosen value reported back with each readiness record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Token(pub u64);

/// Handle to a registered watcher, issued by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub usize);

/// One satisfied-interest notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub ready: Interest,
}

/// Per-descriptor interest registration and dispatch.
pub trait Reactor {
    /// Start watching `fd`. The watcher begins enabled.
    fn add_watcher(&mut self, fd: RawFd, interest: Interest, token: Token) -> Result<WatcherId>;

    /// Replace the watcher's interest mask.
    fn set_interest(&mut self, watcher: WatcherId, interest: Interest) -> Result<()>;

    /// Let the watcher report readiness again.
    fn enable(&mut self, watcher: WatcherId) -> Result<()>;

    /// Stop the watcher reporting readiness, keeping its registration.
    fn disable(&mut self, watcher: WatcherId) -> Result<()>;

    /// Forget the watcher. Must be called before the descriptor is closed.
    fn remove_watcher(&mut self, watcher: WatcherId) -> Result<()>;

    /// Wait for readiness and fill `events` (cleared first).
    ///
    /// `None` waits indefinitely. Returns the number of records written.
    fn poll(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<usize>;
}

/// Receives readiness records, one at a time, from the dispatch loop.
pub trait EventHandler<R: Reactor> {
    fn on_event(&mut self, reactor: &mut R, event: Readiness);
}

/// One dispatch round: poll once, then deliver every record in order.
pub fn turn<R, H>(
    reactor: &mut R,
    handler: &mut H,
    events: &mut Vec<Readiness>,
    timeout: Option<Duration>,
) -> Result<usize>
where
    R: Reactor,
    H: EventHandler<R>,
{
    let n = reactor.poll(events, timeout)?;
    for event in events.drain(..) {
        handler.on_event(reactor, event);
    }
    Ok(n)
}

/// Longest a single `run` round waits before `stop` is checked again.
pub const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Dispatch until `stop` is raised or the reactor fails.
///
/// `stop` is checked between rounds. A signal that interrupts the wait is
/// seen at once; one that lands just before the wait starts is seen within
/// `STOP_CHECK_INTERVAL`.
pub fn run<R, H>(reactor: &mut R, handler: &mut H, stop: &AtomicBool) -> Result<()>
where
    R: Reactor,
    H: EventHandler<R>,
{
    let mut events = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        turn(reactor, handler, &mut events, Some(STOP_CHECK_INTERVAL))?;
    }
    tracing::debug!("dispatch loop stopped");
    Ok(())
}
