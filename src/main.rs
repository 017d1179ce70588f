use clap::Parser;

use plate_console::cli::{self, Args, CliError, Command, RunArgs};
use plate_console::config::Config;

/// Load .env file and install the logger.
///
/// Does not override existing environment variables. Log level defaults to
/// `info` and can be changed with `RUST_LOG`.
fn init_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

async fn dispatch(args: Args) -> Result<(), CliError> {
    let config_path = args.config.as_deref();

    match args.command {
        Some(Command::ListDevices { all }) => cli::list_devices(all),
        Some(Command::ListPlates { skip, limit }) => {
            let config = Config::load(config_path)?;
            cli::list_plates(&config, skip, limit).await
        }
        Some(Command::Config { action }) => cli::handle_config_action(action, config_path),
        Some(Command::Run(run)) => start_console(config_path, &run).await,
        None => start_console(config_path, &RunArgs::default()).await,
    }
}

async fn start_console(
    config_path: Option<&std::path::Path>,
    run: &RunArgs,
) -> Result<(), CliError> {
    let config = cli::apply_run_overrides(Config::load(config_path)?, run)?;
    cli::run_console(config, run).await
}

#[tokio::main]
async fn main() {
    init_env();

    let args = Args::parse();

    if let Err(e) = dispatch(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
