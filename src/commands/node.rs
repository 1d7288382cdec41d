//! One-shot commands against a running node.

use super::client::{ClientError, NodeClient};

/// Show node health
pub async fn status(client: &NodeClient) -> Result<(), ClientError> {
    let health = client.health().await?;

    println!("Node Status");
    println!("===========");
    println!();
    println!("URL:         {}", client.base_url());
    println!("Status:      {}", health.status);
    println!("Version:     {}", health.version);
    println!("Mode:        {}", health.mode);
    println!("Node ID:     {}", health.node_id);
    match &health.shared_path {
        Some(path) => println!("Shared path: {}", path.display()),
        None => println!("Shared path: (not configured)"),
    }
    println!(
        "Auto-sync:   {}",
        if health.auto_sync { "running" } else { "stopped" }
    );
    println!("Peers:       {}", health.peers);

    Ok(())
}

/// List peers the node knows about
pub async fn peers(client: &NodeClient) -> Result<(), ClientError> {
    let peers = client.peers().await?;

    if peers.is_empty() {
        println!("No peers discovered.");
        return Ok(());
    }

    println!("{} peer{}:", peers.len(), if peers.len() == 1 { "" } else { "s" });
    for peer in peers {
        println!("  {}", peer);
    }
    Ok(())
}

/// Write a timestamped backup on the node
pub async fn export(client: &NodeClient) -> Result<(), ClientError> {
    let path = client.export().await?;
    println!("✓ Backup written to {}", path);
    Ok(())
}

/// Import the shared snapshot once
pub async fn import(client: &NodeClient) -> Result<(), ClientError> {
    let changed = client.import().await?;
    if changed.is_empty() {
        println!("Already up to date.");
    } else {
        println!("✓ Updated: {}", changed.join(", "));
    }
    Ok(())
}
