//! `boardwalk-coordinator tail <url>`: joins a session as a regular client
//! and prints every sync event as one JSON line.

use anyhow::{Context, Result};
use boardwalk_client::{ClientConfig, SyncClient, SyncEvent};
use tokio::signal;
use tracing::{info, warn};

use crate::config::TailArgs;

pub async fn run(args: TailArgs) -> Result<()> {
    let mut config = ClientConfig::new(args.url.clone());
    config.reconnect.backoff.max_attempts = args.max_reconnects;

    let (client, mut events) = SyncClient::connect(config)
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;
    info!(url = %args.url, "tailing session");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "failed to encode event"),
                }
                if matches!(event, SyncEvent::GaveUp { .. }) {
                    break;
                }
            }
            _ = signal::ctrl_c() => break,
        }
    }

    let state = client.state();
    info!(
        version = state.version,
        tracks = state.tracks.len(),
        opens = client.connection_opens(),
        "tail finished"
    );
    client.close().await;
    Ok(())
}
