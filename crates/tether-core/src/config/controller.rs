//! Controller configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the controller side of the tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address the controller accepts tunnel sessions on
    pub bind_address: String,

    /// Accepted credentials. Empty accepts any credential.
    pub tokens: Vec<String>,

    /// Service name to host. Unlisted names are dialed as hostnames.
    pub services: HashMap<String, String>,

    /// Only allow services listed in `services`
    pub restrict_services: bool,

    /// Time allowed for the handshake frame and for dialing the service
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9400".to_string(),
            tokens: vec![],
            services: HashMap::new(),
            restrict_services: false,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ControllerConfig {
    /// Resolve a service name to the host to dial
    pub fn resolve_host(&self, service: &str) -> Option<String> {
        match self.services.get(service) {
            Some(host) => Some(host.clone()),
            None if self.restrict_services => None,
            None => Some(service.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.is_empty() {
            return Err(ConfigError::MissingField("controller.bind_address".to_string()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "controller.handshake_timeout must be at least 1 second".to_string(),
            ));
        }
        if let Some((name, _)) = self.services.iter().find(|(_, host)| host.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "controller.services.{} has an empty host",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_host() {
        let mut config = ControllerConfig::default();
        config
            .services
            .insert("buildkitd".to_string(), "10.0.0.5".to_string());

        assert_eq!(config.resolve_host("buildkitd").as_deref(), Some("10.0.0.5"));
        assert_eq!(config.resolve_host("syncthing").as_deref(), Some("syncthing"));

        config.restrict_services = true;
        assert_eq!(config.resolve_host("syncthing"), None);
    }

    #[test]
    fn test_rejects_empty_host() {
        let mut config = ControllerConfig::default();
        config.services.insert("x".to_string(), String::new());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
