use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{AutoSyncCommand, ConfigCommand, NodeClient, WatchCommand};
use datashare::config::ServerConfig;

#[derive(Parser)]
#[command(name = "datashare")]
#[command(version)]
#[command(about = "Operate a running datashare node", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Node URL (default: http://127.0.0.1:<configured port>)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show node health
    Status,

    /// List discovered peers
    Peers,

    /// Write a timestamped backup of all collections
    Export,

    /// Import the shared snapshot now
    Import,

    /// Control the periodic export/import timer
    AutoSync(AutoSyncCommand),

    /// Follow change events
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ServerConfig::load(cli.config)?;
    let url = cli
        .url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.port.value));
    let client = NodeClient::new(&url);

    match cli.command {
        Some(Commands::Status) => commands::status(&client).await?,
        Some(Commands::Peers) => commands::peers(&client).await?,
        Some(Commands::Export) => commands::export(&client).await?,
        Some(Commands::Import) => commands::import(&client).await?,
        Some(Commands::AutoSync(cmd)) => cmd.run(&client).await?,
        Some(Commands::Watch(cmd)) => cmd.run(&client).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
