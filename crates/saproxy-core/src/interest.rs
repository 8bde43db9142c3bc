//! Readiness interest sets

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// The readiness conditions a watcher asks the reactor for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::READABLE), self.contains(Self::WRITABLE)) {
            (true, true) => write!(f, "rw"),
            (true, false) => write!(f, "r"),
            (false, true) => write!(f, "w"),
            (false, false) => write!(f, "-"),
        }
    }
}
