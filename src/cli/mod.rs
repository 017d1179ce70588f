//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing, enums, and subcommand handlers.

mod args;
mod commands;
mod enums;

pub use args::{Args, Command, ConfigAction, RunArgs};
pub use commands::{
    apply_run_overrides, handle_config_action, list_devices, list_plates, run_console, CliError,
};
pub use enums::SourceArg;
