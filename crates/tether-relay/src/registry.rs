//! Live session registry

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use tether_core::ServiceTarget;
use tether_protocol::{SessionId, SessionIdAllocator};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Remote session is being established
    Connecting = 0,
    /// Header frame is being sent or awaited
    Handshaking = 1,
    /// Both directions are running
    Relaying = 2,
    /// Local connection closed
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Handshaking,
            2 => Self::Relaying,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Handle to a live session
#[derive(Debug)]
pub struct SessionHandle {
    /// Session ID
    pub id: SessionId,
    /// Peer of the local connection
    pub peer: String,
    target: OnceLock<ServiceTarget>,
    state: AtomicU8,
}

impl SessionHandle {
    /// Current state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Service the session is bridged to, once known
    pub fn target(&self) -> Option<&ServiceTarget> {
        self.target.get()
    }

    /// Record the target learned from a handshake; the first value wins
    pub(crate) fn set_target(&self, target: ServiceTarget) {
        let _ = self.target.set(target);
    }
}

/// Tracks the sessions spawned by one manager or controller
#[derive(Debug, Default)]
pub struct SessionRegistry {
    ids: SessionIdAllocator,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    closed_total: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session in the `Connecting` state
    pub fn open(&self, peer: impl Into<String>, target: Option<ServiceTarget>) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle {
            id: self.ids.allocate(),
            peer: peer.into(),
            target: OnceLock::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
        });
        if let Some(target) = target {
            handle.set_target(target);
        }
        self.sessions.insert(handle.id, Arc::clone(&handle));
        handle
    }

    /// Mark a session closed and forget it.
    ///
    /// Returns false if the session was already closed.
    pub fn close(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, handle)) => {
                handle.set_state(SessionState::Closed);
                self.closed_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    /// List live sessions
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions closed since the registry was created
    pub fn closed_total(&self) -> u64 {
        self.closed_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close() {
        let registry = SessionRegistry::new();
        let a = registry.open("127.0.0.1:5000", Some(ServiceTarget::new("svc", 80)));
        let b = registry.open("127.0.0.1:5001", None);
        assert_eq!(a.target(), Some(&ServiceTarget::new("svc", 80)));
        assert!(b.target().is_none());
        b.set_target(ServiceTarget::new("late", 1));
        b.set_target(ServiceTarget::new("ignored", 2));
        assert_eq!(b.target().map(|t| t.name.as_str()), Some("late"));

        assert_ne!(a.id, b.id);
        assert_eq!(a.state(), SessionState::Connecting);
        assert_eq!(registry.len(), 2);

        assert!(registry.close(a.id));
        assert_eq!(a.state(), SessionState::Closed);
        assert!(registry.get(a.id).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.closed_total(), 1);
    }

    #[test]
    fn test_close_twice_counts_once() {
        let registry = SessionRegistry::new();
        let handle = registry.open("peer", None);
        assert!(registry.close(handle.id));
        assert!(!registry.close(handle.id));
        assert_eq!(registry.closed_total(), 1);
    }

    #[test]
    fn test_state_transitions() {
        let registry = SessionRegistry::new();
        let handle = registry.open("peer", None);
        handle.set_state(SessionState::Handshaking);
        assert_eq!(handle.state(), SessionState::Handshaking);
        handle.set_state(SessionState::Relaying);
        assert_eq!(handle.state().to_string(), "relaying");
    }
}
