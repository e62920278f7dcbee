//! collab-daemon: Headless collaboration client for notebook documents.
//!
//! Connects a file-backed notebook to the realtime channel and applies
//! incoming updates as they arrive. With no user present to review updates,
//! every incoming update is applied immediately; the duplicate-above rule
//! still preserves any prior local content.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use collab_channel::{ChannelClient, NotebookFile, RestApi};
use collab_core::{CollabApi, CollabSession, Notebook, UpdateDecision};

#[derive(Parser, Debug)]
#[command(name = "collab-daemon")]
#[command(about = "Headless notebook collaboration client")]
struct Args {
    /// Path to the notebook JSON file
    #[arg(short, long)]
    notebook: PathBuf,

    /// WebSocket server base URL
    #[arg(short, long, default_value = "ws://localhost:8080")]
    server: String,

    /// REST backend base URL
    #[arg(short, long, default_value = "http://localhost:8080/api")]
    api: String,

    /// User ID (generated if not provided)
    #[arg(long)]
    user_id: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,collab_channel=debug"
    } else {
        "info,collab_channel=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting collab-daemon");
    info!("Notebook file: {:?}", args.notebook);
    info!("Server: {}", args.server);

    let user_id = args.user_id.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Generated user ID: {}", id);
        id
    });

    let file = NotebookFile::load(&args.notebook).await?;
    let notebook = file.notebook();
    info!("Notebook loaded, id: {}", notebook.notebook_id());

    let api = Arc::new(RestApi::new(&args.api));
    let session = CollabSession::new(Arc::clone(&notebook), api as Arc<dyn CollabApi>);

    let (mut channel, mut event_rx) = ChannelClient::new(&args.server, &user_id);
    channel.establish(session.notebook_id()).await?;
    session.refresh_presence().await;
    info!(
        "Channel live, {} peer(s) present. Press Ctrl+C to stop.",
        session.presence().peer_count()
    );

    loop {
        tokio::select! {
            // Handle channel events (updates, presence)
            Some(event) = event_rx.recv() => {
                let Some(update) = session.handle_event(event) else {
                    continue;
                };
                info!(id = %update.id, sender = %update.sender, "Applying incoming update");
                match session.resolve(update, UpdateDecision::UpdateNow).await {
                    Ok(()) => {
                        if let Err(e) = file.save().await {
                            error!("Failed to save notebook: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("Failed to apply update: {e}");
                    }
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    channel.teardown().await;
    if let Err(e) = file.save().await {
        error!("Final save failed: {e}");
    }
    info!("Shutting down");
    Ok(())
}
