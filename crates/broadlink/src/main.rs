mod cli;
mod handlers;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::handlers::{Action, discovery_config, handle_devices, handle_discover};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG overrides the level chosen by --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = discovery_config(cli.timeout, cli.local_addr);

    match cli.command {
        Command::Version => {
            println!("broadlink {}", env!("CARGO_PKG_VERSION"));
            println!("broadlink-core {}", broadlink_core::VERSION);
        }
        Command::Discover => handle_discover(config).await,
        Command::State { mac } => handle_devices(config, mac, Action::GetState).await,
        Command::Set { mac, update } => {
            handle_devices(config, mac, Action::SetState(update.to_power_state())).await
        }
        Command::Demo { mac } => handle_devices(config, mac, Action::Demo).await,
    }
}
