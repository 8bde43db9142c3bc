//! `EpollReactor`: level-triggered epoll.
//!
//! Watchers live in a slab; the slab index is the epoll `data` word, so a
//! readiness record is translated back to its caller token at harvest time.
//!
//! A watcher sits in the kernel's epoll set only while it is enabled AND
//! its interest is non-empty. Every state change re-derives that and issues
//! the matching `EPOLL_CTL_ADD` / `MOD` / `DEL`, so a disabled watcher cannot
//! wake the loop even for `EPOLLHUP`/`EPOLLERR` (which epoll reports
//! regardless of the requested mask).

use saproxy_core::error::{ProxyError, Result};
use saproxy_core::interest::Interest;
use saproxy_core::reactor::{Reactor, Readiness, Token, WatcherId};

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::trace;

struct Watcher {
    fd: RawFd,
    token: Token,
    interest: Interest,
    enabled: bool,
    /// Currently present in the epoll set.
    registered: bool,
}

pub struct EpollReactor {
    epfd: OwnedFd,
    watchers: Vec<Option<Watcher>>,
    free: Vec<usize>,
    raw: Vec<libc::epoll_event>,
}

impl EpollReactor {
    /// Create a reactor harvesting at most `max_events` records per poll.
    pub fn new(max_events: usize) -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(ProxyError::Reactor(io::Error::last_os_error()));
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(Self {
            epfd,
            watchers: Vec::new(),
            free: Vec::new(),
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    /// Number of live watchers (enabled or not).
    pub fn watcher_count(&self) -> usize {
        self.watchers.len() - self.free.len()
    }

    fn alloc(&mut self, watcher: Watcher) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.watchers[idx] = Some(watcher);
                idx
            }
            None => {
                self.watchers.push(Some(watcher));
                self.watchers.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Option<Watcher> {
        let w = self.watchers.get_mut(idx)?.take()?;
        self.free.push(idx);
        Some(w)
    }

    fn slot(&mut self, id: WatcherId) -> Result<&mut Watcher> {
        self.watchers
            .get_mut(id.0)
            .and_then(|w| w.as_mut())
            .ok_or(ProxyError::UnknownWatcher(id.0))
    }

    /// Bring the kernel's view of watcher `idx` in line with its state.
    fn sync(&mut self, idx: usize) -> Result<()> {
        let epfd = self.epfd.as_raw_fd();
        let w = self
            .watchers
            .get_mut(idx)
            .and_then(|w| w.as_mut())
            .ok_or(ProxyError::UnknownWatcher(idx))?;

        let wanted = w.enabled && !w.interest.is_empty();
        let op = match (w.registered, wanted) {
            (false, true) => libc::EPOLL_CTL_ADD,
            (true, true) => libc::EPOLL_CTL_MOD,
            (true, false) => libc::EPOLL_CTL_DEL,
            (false, false) => return Ok(()),
        };

        epoll_ctl(epfd, op, w.fd, epoll_mask(w.interest), idx as u64)
            .map_err(ProxyError::Reactor)?;
        w.registered = wanted;
        trace!(fd = w.fd, interest = %w.interest, enabled = w.enabled, "epoll_ctl");
        Ok(())
    }
}

impl Reactor for EpollReactor {
    fn add_watcher(&mut self, fd: RawFd, interest: Interest, token: Token) -> Result<WatcherId> {
        let idx = self.alloc(Watcher {
            fd,
            token,
            interest,
            enabled: true,
            registered: false,
        });
        if let Err(e) = self.sync(idx) {
            self.release(idx);
            return Err(e);
        }
        Ok(WatcherId(idx))
    }

    fn set_interest(&mut self, watcher: WatcherId, interest: Interest) -> Result<()> {
        let w = self.slot(watcher)?;
        if w.interest == interest {
            return Ok(());
        }
        w.interest = interest;
        self.sync(watcher.0)
    }

    fn enable(&mut self, watcher: WatcherId) -> Result<()> {
        let w = self.slot(watcher)?;
        if w.enabled {
            return Ok(());
        }
        w.enabled = true;
        self.sync(watcher.0)
    }

    fn disable(&mut self, watcher: WatcherId) -> Result<()> {
        let w = self.slot(watcher)?;
        if !w.enabled {
            return Ok(());
        }
        w.enabled = false;
        self.sync(watcher.0)
    }

    fn remove_watcher(&mut self, watcher: WatcherId) -> Result<()> {
        let w = self
            .release(watcher.0)
            .ok_or(ProxyError::UnknownWatcher(watcher.0))?;
        if w.registered {
            epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, w.fd, 0, 0)
                .map_err(ProxyError::Reactor)?;
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>) -> Result<usize> {
        events.clear();

        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.raw.as_mut_ptr(),
                self.raw.len() as i32,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ProxyError::Reactor(err));
        }

        for raw in &self.raw[..n as usize] {
            // epoll_event is packed on x86_64: copy fields out, never borrow.
            let flags = raw.events;
            let idx = raw.u64 as usize;

            let Some(w) = self.watchers.get(idx).and_then(|w| w.as_ref()) else {
                continue;
            };
            let ready = readiness(flags) & w.interest;
            if !w.enabled || ready.is_empty() {
                continue;
            }
            events.push(Readiness { token: w.token, ready });
        }

        Ok(events.len())
    }
}

fn epoll_ctl(epfd: RawFd, op: i32, fd: RawFd, events: u32, data: u64) -> io::Result<()> {
    let mut ev = libc::epoll_event { events, u64: data };
    let ret = unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn epoll_mask(interest: Interest) -> u32 {
    let mut mask = 0u32;
    if interest.contains(Interest::READABLE) {
        mask |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITABLE) {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

/// Map kernel flags to interest. Hang-up and error satisfy both directions:
/// the next read or write on the descriptor reports what happened.
fn readiness(flags: u32) -> Interest {
    let hup_or_err = (libc::EPOLLHUP | libc::EPOLLERR) as u32;
    let mut ready = Interest::empty();
    if flags & (libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32 | hup_or_err) != 0 {
        ready |= Interest::READABLE;
    }
    if flags & (libc::EPOLLOUT as u32 | hup_or_err) != 0 {
        ready |= Interest::WRITABLE;
    }
    ready
}

/// Round up so a sub-millisecond timeout does not become a busy poll.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = (d.as_nanos() + 999_999) / 1_000_000;
            ms.min(i32::MAX as u128) as i32
        }
    }
}
