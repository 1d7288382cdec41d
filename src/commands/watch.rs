use clap::Args;
use futures::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::client::{ClientError, NodeClient};
use datashare::notifier::ChangeEvent;
use datashare::Collection;

/// Print change events from the node as they happen
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Only show changes to this collection
    #[arg(long, short)]
    collection: Option<Collection>,
}

impl WatchCommand {
    pub async fn run(&self, client: &NodeClient) -> Result<(), ClientError> {
        let (mut socket, _) = connect_async(client.ws_url()).await?;

        while let Some(message) = socket.next().await {
            let text = match message? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<ChangeEvent>(&text) {
                Ok(ChangeEvent::Connected) => {
                    println!("Watching {} (Ctrl-C to stop)", client.base_url())
                }
                Ok(ChangeEvent::DataChanged { collection, origin }) => {
                    if self.collection.is_some_and(|c| c != collection) {
                        continue;
                    }
                    println!(
                        "{}  {:<10} {:?}",
                        chrono::Local::now().format("%H:%M:%S"),
                        collection.name(),
                        origin
                    );
                }
                Err(e) => eprintln!("Ignoring unrecognized event: {}", e),
            }
        }

        println!("Node closed the connection.");
        Ok(())
    }
}
