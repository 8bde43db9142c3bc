//! In-memory reactor, streams, listener and connector for driving the relay
//! state machine without sockets.

use crate::connector::Connector;
use crate::socket::{Listener, PeerAddr, Stream};

use saproxy_core::address::AddressSpec;
use saproxy_core::error::{ProxyError, Result};
use saproxy_core::{Interest, Reactor, Readiness, Token, WatcherId};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

// ── Reactor ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockWatcher {
    pub fd: RawFd,
    pub token: Token,
    pub interest: Interest,
    pub enabled: bool,
}

/// Records registrations; never reports readiness on its own.
#[derive(Debug, Default)]
pub struct MockReactor {
    watchers: Vec<Option<MockWatcher>>,
    /// Fail the next `add_watcher` call, then reset.
    pub fail_next_add: bool,
}

impl MockReactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watcher(&self, token: Token) -> Option<&MockWatcher> {
        self.watchers.iter().flatten().find(|w| w.token == token)
    }

    /// Interest that would actually be reported for `token` right now.
    pub fn active(&self, token: Token) -> Interest {
        match self.watcher(token) {
            Some(w) if w.enabled => w.interest,
            _ => Interest::empty(),
        }
    }

    pub fn live(&self) -> usize {
        self.watchers.iter().flatten().count()
    }

    fn slot(&mut self, id: WatcherId) -> Result<&mut MockWatcher> {
        self.watchers
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ProxyError::UnknownWatcher(id.0))
    }
}

impl Reactor for MockReactor {
    fn add_watcher(&mut self, fd: RawFd, interest: Interest, token: Token) -> Result<WatcherId> {
        if std::mem::take(&mut self.fail_next_add) {
            return Err(ProxyError::Reactor(io::Error::from_raw_os_error(libc::ENOMEM)));
        }
        self.watchers.push(Some(MockWatcher {
            fd,
            token,
            interest,
            enabled: true,
        }));
        Ok(WatcherId(self.watchers.len() - 1))
    }

    fn set_interest(&mut self, watcher: WatcherId, interest: Interest) -> Result<()> {
        self.slot(watcher)?.interest = interest;
        Ok(())
    }

    fn enable(&mut self, watcher: WatcherId) -> Result<()> {
        self.slot(watcher)?.enabled = true;
        Ok(())
    }

    fn disable(&mut self, watcher: WatcherId) -> Result<()> {
        self.slot(watcher)?.enabled = false;
        Ok(())
    }

    fn remove_watcher(&mut self, watcher: WatcherId) -> Result<()> {
        self.slot(watcher)?;
        self.watchers[watcher.0] = None;
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Readiness>, _timeout: Option<Duration>) -> Result<usize> {
        events.clear();
        Ok(0)
    }
}

// ── Stream ──

#[derive(Debug, Default)]
struct StreamState {
    inbound: VecDeque<u8>,
    eof: bool,
    read_error: Option<io::ErrorKind>,
    outbound: Vec<u8>,
    write_budget: Option<usize>,
    write_error: Option<io::ErrorKind>,
    pending_error: Option<i32>,
    closed: bool,
}

/// Test-side view of a `MockStream`, valid after the stream is dropped.
#[derive(Debug, Clone)]
pub struct MockHandle(Rc<RefCell<StreamState>>);

impl MockHandle {
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.0.borrow_mut().inbound.extend(bytes);
    }

    pub fn inbound_len(&self) -> usize {
        self.0.borrow().inbound.len()
    }

    /// Report orderly shutdown once the inbound bytes run out.
    pub fn set_eof(&self) {
        self.0.borrow_mut().eof = true;
    }

    pub fn set_read_error(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().read_error = Some(kind);
    }

    /// Bytes the stream accepts before it would block; `None` is unlimited.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.0.borrow_mut().write_budget = budget;
    }

    pub fn set_write_error(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().write_error = Some(kind);
    }

    /// Errno handed out once by `take_error`.
    pub fn set_pending_error(&self, errno: i32) {
        self.0.borrow_mut().pending_error = Some(errno);
    }

    pub fn outbound(&self) -> Vec<u8> {
        self.0.borrow().outbound.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }
}

#[derive(Debug)]
pub struct MockStream {
    fd: RawFd,
    state: Rc<RefCell<StreamState>>,
}

impl MockStream {
    pub fn new(fd: RawFd) -> (Self, MockHandle) {
        let state = Rc::new(RefCell::new(StreamState::default()));
        (
            Self {
                fd,
                state: Rc::clone(&state),
            },
            MockHandle(state),
        )
    }
}

impl Stream for MockStream {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut st = self.state.borrow_mut();
        if let Some(kind) = st.read_error {
            return Err(kind.into());
        }
        if st.inbound.is_empty() {
            return if st.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(st.inbound.len());
        for (dst, src) in buf.iter_mut().zip(st.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut st = self.state.borrow_mut();
        if let Some(kind) = st.write_error {
            return Err(kind.into());
        }
        let n = match st.write_budget {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(budget) => budget.min(buf.len()),
            None => buf.len(),
        };
        if let Some(budget) = st.write_budget.as_mut() {
            *budget -= n;
        }
        st.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        Ok(self
            .state
            .borrow_mut()
            .pending_error
            .take()
            .map(io::Error::from_raw_os_error))
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

// ── Listener / Connector ──

/// Queue of accept results; empty means would-block.
pub type AcceptQueue = Rc<RefCell<VecDeque<io::Result<(MockStream, PeerAddr)>>>>;

#[derive(Debug)]
pub struct MockListener {
    pub fd: RawFd,
    pub queue: AcceptQueue,
}

impl MockListener {
    pub fn new(fd: RawFd) -> (Self, AcceptQueue) {
        let queue = AcceptQueue::default();
        (
            Self {
                fd,
                queue: Rc::clone(&queue),
            },
            queue,
        )
    }
}

impl Listener for MockListener {
    type Stream = MockStream;

    fn fd(&self) -> RawFd {
        self.fd
    }

    fn accept(&mut self) -> io::Result<Option<(MockStream, PeerAddr)>> {
        self.queue.borrow_mut().pop_front().transpose()
    }
}

/// Queue of connect results; an empty queue refuses the connection.
pub type ConnectQueue = Rc<RefCell<VecDeque<Result<MockStream>>>>;

#[derive(Debug)]
pub struct MockConnector {
    pub queue: ConnectQueue,
    pub attempts: Rc<RefCell<usize>>,
}

impl MockConnector {
    pub fn new() -> (Self, ConnectQueue) {
        let queue = ConnectQueue::default();
        (
            Self {
                queue: Rc::clone(&queue),
                attempts: Rc::default(),
            },
            queue,
        )
    }
}

impl Connector for MockConnector {
    type Stream = MockStream;

    fn connect(&mut self, destination: &AddressSpec) -> Result<MockStream> {
        *self.attempts.borrow_mut() += 1;
        self.queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProxyError::Connect {
                    target: destination.to_string(),
                    cause: io::Error::from_raw_os_error(libc::ECONNREFUSED),
                })
            })
    }
}
