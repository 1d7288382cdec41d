use clap::{Args, Subcommand};

use super::client::{ClientError, NodeClient};
use datashare::sync::AutoSyncStatus;

/// Control the node's export/import timer
#[derive(Debug, Args)]
pub struct AutoSyncCommand {
    #[command(subcommand)]
    command: AutoSyncSubcommand,
}

#[derive(Debug, Subcommand)]
enum AutoSyncSubcommand {
    /// Start the timer
    Start,
    /// Stop the timer
    Stop,
    /// Show timer state and last result
    Status,
}

impl AutoSyncCommand {
    pub async fn run(&self, client: &NodeClient) -> Result<(), ClientError> {
        match self.command {
            AutoSyncSubcommand::Start => {
                let response = client.start_auto_sync().await?;
                if response.changed {
                    println!("✓ Auto-sync started");
                } else {
                    println!("Auto-sync already running");
                }
                print_status(&response.status);
            }
            AutoSyncSubcommand::Stop => {
                let response = client.stop_auto_sync().await?;
                if response.changed {
                    println!("✓ Auto-sync stopped");
                } else {
                    println!("Auto-sync was not running");
                }
            }
            AutoSyncSubcommand::Status => print_status(&client.auto_sync_status().await?),
        }
        Ok(())
    }
}

fn print_status(status: &AutoSyncStatus) {
    println!();
    println!("Running:    {}", if status.running { "yes" } else { "no" });
    println!("Interval:   {}ms", status.interval_ms);
    if let Some(path) = &status.shared_path {
        println!("Shared:     {}", path.display());
    }
    println!(
        "Last sync:  {}",
        status.last_sync.as_deref().unwrap_or("never")
    );
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }
}
