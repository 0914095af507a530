//! tether CLI
//!
//! Single binary for both ends of a stream tunnel:
//! - Forwarder (listens locally, opens one remote session per connection)
//! - Controller (accepts sessions and dials the requested service)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether::commands::{self, ForwardArgs};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Stream tunnels from local ports to remote services")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Credential sent in every session handshake (overrides config)
    #[arg(long, global = true, env = "TETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward local ports to remote services through the controller
    Forward {
        /// Remote service name (uses configured forwards if omitted)
        #[arg(short, long)]
        service: Option<String>,
        /// Remote service port
        #[arg(short, long)]
        remote_port: Option<u16>,
        /// Local port to listen on (defaults to the remote port)
        #[arg(short, long)]
        local_port: Option<u16>,
        /// Local address to listen on
        #[arg(long)]
        local_host: Option<String>,
        /// Controller address (overrides config)
        #[arg(long)]
        controller: Option<String>,
    },

    /// Run the controller that terminates tunnel sessions
    Controller {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force),
            ConfigAction::Show => commands::config_show(cli.config.as_ref()),
        },

        Commands::Forward {
            service,
            remote_port,
            local_port,
            local_host,
            controller,
        } => {
            let mut config = commands::load_or_default(cli.config.as_ref())?;
            if let Some(token) = cli.token {
                config.token = Some(token);
            }
            if let Some(controller) = controller {
                config.controller_address = controller;
            }

            let forwards = ForwardArgs {
                service,
                remote_port,
                local_port,
                local_host,
            }
            .into_forwards(&config)?;

            let cancel = shutdown_token();
            commands::forward_command(&config, forwards, cancel).await
        }

        Commands::Controller { bind } => {
            let config = commands::load_or_default(cli.config.as_ref())?;
            let cancel = shutdown_token();

            tracing::info!("tether controller starting...");
            commands::controller_command(&config, bind, cancel).await?;
            tracing::info!("Controller shutdown complete");
            Ok(())
        }
    }
}

/// Token cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
