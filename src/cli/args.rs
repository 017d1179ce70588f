//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use super::enums::SourceArg;

/// Operator console for live license-plate detection
#[derive(Parser, Debug)]
#[command(name = "plate-console")]
#[command(version, about = "Stream camera frames to a plate detector and save confirmed plates", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the operator console (default)
    Run(RunArgs),
    /// List capture devices
    ListDevices {
        /// Include audio inputs
        #[arg(long)]
        all: bool,
    },
    /// List saved plates
    ListPlates {
        /// Entries to skip
        #[arg(long, default_value = "0")]
        skip: u64,
        /// Maximum entries to fetch
        #[arg(long, default_value = "100")]
        limit: u64,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the `run` subcommand. Unset flags fall back to the config file.
#[derive(ClapArgs, Debug, Default, Clone, PartialEq)]
pub struct RunArgs {
    /// Camera device to start with (from list-devices)
    #[arg(long, short)]
    pub device: Option<String>,

    /// Detector websocket endpoint
    #[arg(long, short)]
    pub endpoint: Option<String>,

    /// Frame source
    #[arg(long)]
    pub source: Option<SourceArg>,

    /// Video or image file for --source sample/still
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Milliseconds between sampled frames
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Number of recent detections kept
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Reconnect when the detector drops the connection
    #[arg(long)]
    pub reconnect: bool,

    /// Start detecting immediately
    #[arg(long)]
    pub autostart: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
