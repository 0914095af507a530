//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named service behind the controller, plus the port to reach it on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Service name as known to the controller (e.g. "buildkitd")
    pub name: String,
    /// Port the service listens on
    pub port: u16,
}

impl ServiceTarget {
    /// Create a new service target
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// Which way a relay direction copies bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local connection to remote session
    Outbound,
    /// Remote session to local connection
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => f.write_str("local->remote"),
            Direction::Inbound => f.write_str("remote->local"),
        }
    }
}
