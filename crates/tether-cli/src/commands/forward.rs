//! `tether forward`: listen locally and tunnel each connection

use anyhow::{bail, Context, Result};
use futures::future::try_join_all;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tether_core::config::{ForwardConfig, TetherConfig};
use tether_relay::{TcpSessionFactory, TunnelManager};

use crate::output::{format_forwards, print_info, print_success, print_warning};

/// Forward requested on the command line
#[derive(Debug, Clone, Default)]
pub struct ForwardArgs {
    pub service: Option<String>,
    pub remote_port: Option<u16>,
    pub local_port: Option<u16>,
    pub local_host: Option<String>,
}

impl ForwardArgs {
    /// Resolve into forwards, falling back to the configured list
    pub fn into_forwards(self, config: &TetherConfig) -> Result<Vec<ForwardConfig>> {
        let Some(service) = self.service else {
            if self.remote_port.is_some() || self.local_port.is_some() {
                bail!("--service is required when forwarding from flags");
            }
            if config.forwards.is_empty() {
                bail!("No forwards given on the command line or configured");
            }
            return Ok(config.forwards.clone());
        };

        let remote_port = self
            .remote_port
            .with_context(|| format!("--remote-port is required for service '{}'", service))?;
        let forward = ForwardConfig {
            local_host: self.local_host.unwrap_or_else(|| "127.0.0.1".to_string()),
            local_port: self.local_port.unwrap_or(remote_port),
            service,
            remote_port,
        };
        forward.validate()?;
        Ok(vec![forward])
    }
}

/// Run every forward until cancelled. The first forward that fails
/// ends the command.
pub async fn forward_command(
    config: &TetherConfig,
    forwards: Vec<ForwardConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    config.relay.validate()?;
    if config.token.is_none() {
        print_warning("No token configured; sessions carry an empty credential");
    }

    let factory = TcpSessionFactory::new(config.controller_address.clone(), config.connect_timeout);
    let summary = format!("Tunnelling through {}:", factory.address());
    let manager = TunnelManager::new(factory, config.credential(), config.relay.clone(), cancel);

    print_info(&format!(
        "{}\n{}",
        summary,
        format_forwards(
            &forwards
                .iter()
                .map(|f| (format!("{}:{}", f.local_host, f.local_port), f.target().to_string()))
                .collect::<Vec<_>>()
        )
    ));

    let runs = forwards.into_iter().map(|forward| {
        let manager = manager.clone();
        async move {
            let target = forward.target();
            let (ready_tx, ready_rx) = oneshot::channel();
            {
                let target = target.clone();
                tokio::spawn(async move {
                    if let Ok(addr) = ready_rx.await {
                        print_success(&format!("Listening on {} for {}", addr, target));
                    }
                });
            }

            manager
                .run(
                    &forward.local_host,
                    forward.local_port,
                    &forward.service,
                    forward.remote_port,
                    Some(ready_tx),
                )
                .await
                .with_context(|| format!("Forward to {} failed", target))
        }
    });

    try_join_all(runs).await?;
    tracing::info!("All forwards stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_build_one_forward() {
        let args = ForwardArgs {
            service: Some("buildkitd".to_string()),
            remote_port: Some(1234),
            ..Default::default()
        };
        let forwards = args.into_forwards(&TetherConfig::default()).unwrap();
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].local_host, "127.0.0.1");
        assert_eq!(forwards[0].local_port, 1234);
        assert_eq!(forwards[0].target().to_string(), "buildkitd:1234");
    }

    #[test]
    fn test_falls_back_to_config() {
        let mut config = TetherConfig::default();
        config.forwards.push(ForwardConfig {
            local_host: "0.0.0.0".to_string(),
            local_port: 8080,
            service: "web".to_string(),
            remote_port: 80,
        });
        let forwards = ForwardArgs::default().into_forwards(&config).unwrap();
        assert_eq!(forwards, config.forwards);
    }

    #[test]
    fn test_missing_forwards() {
        assert!(ForwardArgs::default()
            .into_forwards(&TetherConfig::default())
            .is_err());

        let port_only = ForwardArgs {
            local_port: Some(1),
            ..Default::default()
        };
        assert!(port_only.into_forwards(&TetherConfig::default()).is_err());

        let no_remote = ForwardArgs {
            service: Some("svc".to_string()),
            ..Default::default()
        };
        assert!(no_remote.into_forwards(&TetherConfig::default()).is_err());
    }
}
