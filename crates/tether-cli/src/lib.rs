//! tether: Command-line interface for stream tunnels
//!
//! Provides the `tether` binary, which runs either the forwarding side
//! (`tether forward`) or the controller (`tether controller`).

pub mod commands;
pub mod output;
