//! Tunnel client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tether_protocol::{Credential, MAX_PAYLOAD_SIZE};

use super::controller::ControllerConfig;
use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::ServiceTarget;

/// Default relay read buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Top-level tether configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Controller address the client opens remote sessions to
    pub controller_address: String,

    /// Credential presented in every session handshake
    pub token: Option<String>,

    /// Timeout for establishing one remote session
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Relay tuning
    pub relay: RelayConfig,

    /// Forwards started by `tether forward` without arguments
    pub forwards: Vec<ForwardConfig>,

    /// Controller-side settings
    pub controller: ControllerConfig,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            controller_address: "127.0.0.1:9400".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            relay: RelayConfig::default(),
            forwards: vec![],
            controller: ControllerConfig::default(),
        }
    }
}

impl TetherConfig {
    /// The credential to attach to sessions, empty if no token is set
    pub fn credential(&self) -> Credential {
        Credential::new(self.token.clone().unwrap_or_default())
    }

    /// Check values that serde alone cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_address.is_empty() {
            return Err(ConfigError::MissingField("controller_address".to_string()));
        }
        self.relay.validate()?;
        for forward in &self.forwards {
            forward.validate()?;
        }
        self.controller.validate()
    }
}

/// Relay tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Largest chunk read from a local connection per Data frame
    pub buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 || self.buffer_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "relay.buffer_size must be between 1 and {} bytes, got {}",
                MAX_PAYLOAD_SIZE, self.buffer_size
            )));
        }
        Ok(())
    }
}

/// One local port forwarded to a remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Local address to bind
    #[serde(default = "default_local_host")]
    pub local_host: String,
    /// Local port to bind
    pub local_port: u16,
    /// Remote service name
    pub service: String,
    /// Remote service port
    pub remote_port: u16,
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

impl ForwardConfig {
    /// The remote end of this forward
    pub fn target(&self) -> ServiceTarget {
        ServiceTarget::new(self.service.clone(), self.remote_port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::MissingField("forwards.service".to_string()));
        }
        if self.remote_port == 0 {
            return Err(ConfigError::Invalid(format!(
                "forward to '{}' has remote_port 0",
                self.service
            )));
        }
        Ok(())
    }
}
