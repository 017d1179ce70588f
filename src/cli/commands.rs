//! Subcommand handlers for run, list-devices, list-plates and config actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;

use super::args::{ConfigAction, RunArgs};
use crate::capture::{self, CaptureError};
use crate::channel::{Connector, WsConnector};
use crate::config::{default_config_toml, default_path, Config, ConfigError, SourceKind};
use crate::console::{self, Flow};
use crate::session::SessionController;
use crate::store::{PlateStore, StoreError};

/// Errors surfaced by subcommands; the binary prints them and exits 1.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Config file already exists: {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fold `run` flags into the loaded config and re-validate.
pub fn apply_run_overrides(mut config: Config, run: &RunArgs) -> Result<Config, ConfigError> {
    if let Some(endpoint) = &run.endpoint {
        config.detection.endpoint = endpoint.clone();
    }
    if let Some(device) = &run.device {
        config.capture.device = Some(device.clone());
    }
    if let Some(sample) = &run.sample {
        config.capture.sample_path = Some(sample.clone());
        if run.source.is_none() {
            config.capture.source = SourceKind::Sample;
        }
    }
    if let Some(source) = run.source {
        config.capture.source = source.into();
    }
    if let Some(interval_ms) = run.interval_ms {
        config.sampler.interval_ms = interval_ms;
    }
    if let Some(capacity) = run.capacity {
        config.buffer.capacity = capacity;
    }
    if run.reconnect {
        config.reconnect.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> Result<PlateStore, StoreError> {
    let token = std::env::var(&config.store.token_env)
        .ok()
        .filter(|t| !t.is_empty());
    PlateStore::with_token(config.store.base_url.clone(), token)
}

/// Run the interactive operator console until `quit`, end of input or Ctrl-C.
pub async fn run_console(config: Config, run: &RunArgs) -> Result<(), CliError> {
    let source = config.build_source()?;
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(config.connect_timeout()));
    let store = open_store(&config)?;
    let mut controller = SessionController::new(config.to_session_config(), source, connector);

    println!("plate-console: detector {}", config.detection.endpoint);
    println!("{}", console::HELP);

    if run.autostart {
        let (_, message) = console::execute(
            console::OperatorCommand::Start { device: None },
            &mut controller,
            &store,
        )
        .await;
        println!("{}", message);
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    log::debug!("stdin closed");
                    controller.stop();
                    break;
                };
                match console::parse_command(&line) {
                    Ok(Some(command)) => {
                        let (flow, message) = console::execute(command, &mut controller, &store).await;
                        println!("{}", message);
                        if flow == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }
            event = controller.next_event() => {
                let Some(event) = event else { break };
                let update = controller.handle(event);
                if let Some(message) = console::describe_update(&update) {
                    println!("{}", message);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                controller.stop();
                break;
            }
        }
    }

    Ok(())
}

/// List capture devices and print them to stdout.
pub fn list_devices(all: bool) -> Result<(), CliError> {
    let devices = capture::list_devices()?;
    capture::print_devices(&devices, !all);
    Ok(())
}

/// Fetch and print one page of saved plates.
pub async fn list_plates(config: &Config, skip: u64, limit: u64) -> Result<(), CliError> {
    let store = open_store(config)?;
    let page = store.list_plates(skip, limit).await?;

    if page.data.is_empty() {
        println!("No saved plates.");
        return Ok(());
    }

    println!("{:<38} {:<12} {:<10} {}", "ID", "PLATE", "TALLY", "SAVED");
    for entry in &page.data {
        println!(
            "{:<38} {:<12} {:<10} {}",
            entry.id.to_string(),
            entry.plate_number,
            entry.tally_number.as_deref().unwrap_or("-"),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("Showing {} of {} saved plates.", page.data.len(), page.count);
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>) -> Result<(), CliError> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load(Some(&config_path))?;
            println!("Current configuration:");
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            println!();

            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
        }
        ConfigAction::Init => {
            write_default_config(&config_path)?;
            println!("Created config file: {}", config_path.display());
        }
    }
    Ok(())
}

fn write_default_config(config_path: &Path) -> Result<(), CliError> {
    if config_path.exists() {
        return Err(CliError::ConfigExists(config_path.to_path_buf()));
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, default_config_toml())?;
    Ok(())
}
