//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use tether_core::config::{self, TetherConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the explicit config file, or the default one if it exists.
///
/// An explicit path that fails to load is an error. A broken default file
/// is reported and replaced by defaults.
pub fn load_or_default(config_path: Option<&PathBuf>) -> Result<TetherConfig> {
    let config = if let Some(path) = config_path {
        config::load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                TetherConfig::default()
            })
        } else {
            tracing::debug!("Using default configuration");
            TetherConfig::default()
        }
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'tether config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write a commented default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
    }

    write_default(&path)?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn write_default(path: &Path) -> Result<()> {
    let rendered = toml::to_string_pretty(&TetherConfig::default())
        .context("Failed to render default configuration")?;
    let content = format!("{}{}{}", HEADER, rendered, FORWARD_EXAMPLE);
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

const HEADER: &str = "# tether configuration
#
# `token` is the credential sent in every session handshake. It can also
# be supplied with --token or TETHER_TOKEN.

";

const FORWARD_EXAMPLE: &str = "
# Forwards started by `tether forward` without arguments. Replace
# `forwards = []` above with entries such as:
#
# [[forwards]]
# local_host = \"127.0.0.1\"
# local_port = 1234
# service = \"buildkitd\"
# remote_port = 1234
";
