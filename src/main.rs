use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use waypost::config::Config;
use waypost::{session, web};

#[derive(Parser)]
#[command(name = "waypost", version, about = "Relay route-trace tasks over MQTT or HTTP.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the MQTT task relay until interrupted
    Mqtt,
    /// Run the HTTP trace server
    Web,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_logging(config.debug);

    match cli.command {
        Command::Mqtt => session::run(config).await,
        Command::Web => web::run(config).await,
    }
}

fn init_logging(debug: bool) {
    let default_directives = if debug { "info,waypost=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
