//! CLI command implementations

mod config;
mod controller;
mod forward;

pub use config::{config_init, config_show, load_or_default};
pub use controller::controller_command;
pub use forward::{forward_command, ForwardArgs};
