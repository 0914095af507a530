//! Session identifier type

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier for one forwarded connection, used for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Hands out session IDs, starting at 1
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: AtomicU32,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate a new session ID
    pub fn allocate(&self) -> SessionId {
        SessionId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
