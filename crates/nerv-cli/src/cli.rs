//! Clap CLI definitions for nerv.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nerv: control plane for remote in-game computers.
#[derive(Parser)]
#[command(name = "nerv", version, about)]
pub struct Cli {
    /// Path to config file (default: ~/.nerv/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server (default).
    Start,
    /// Print the effective configuration as TOML.
    Config,
}
