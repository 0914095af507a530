//! `tether controller`: terminate tunnels and dial services

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use tether_core::config::{ControllerConfig, RelayConfig, TetherConfig};
use tether_core::traits::{AllowAll, CredentialValidator, StaticTokens};
use tether_relay::Controller;

use crate::output::print_warning;

/// Run the controller until cancelled
pub async fn controller_command(
    config: &TetherConfig,
    bind: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut controller = config.controller.clone();
    if let Some(bind) = bind {
        controller.bind_address = bind;
    }
    controller.validate()?;
    config.relay.validate()?;

    let validator = StaticTokens::new(controller.tokens.clone());
    if validator.is_empty() {
        print_warning("No tokens configured - any credential will be accepted");
        serve(controller, AllowAll, config.relay.clone(), cancel).await
    } else {
        tracing::info!("Loaded {} accepted tokens", validator.len());
        serve(controller, validator, config.relay.clone(), cancel).await
    }
}

async fn serve<V>(
    config: ControllerConfig,
    validator: V,
    relay: RelayConfig,
    cancel: CancellationToken,
) -> Result<()>
where
    V: CredentialValidator + 'static,
{
    if config.restrict_services {
        tracing::info!("Serving {} configured services", config.services.len());
    }
    let controller = Controller::new(config, validator, relay, cancel);
    controller.run(None).await?;

    let live = controller.registry().len();
    if live > 0 {
        tracing::info!("Controller stopped with {} sessions still draining", live);
    }
    Ok(())
}
