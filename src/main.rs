//! GroupDeck backend daemon: runs the task dispatcher and the event
//! pipeline against a shared store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::EnvFilter;

use groupdeck_bridge::{BridgeClient, HttpBridge};
use groupdeck_core::notify::{NotifyHub, NotifySink};
use groupdeck_core::DeckConfig;
use groupdeck_dispatcher::{DispatchTiming, Dispatcher};
use groupdeck_events::{EventPipeline, HttpBackend, ResponseBackend, TenantEvent};
use groupdeck_store::Store;

#[derive(Parser)]
#[command(name = "groupdeck", about = "Group monitoring and scheduling backend", version)]
struct Cli {
    /// Path to the config file (default: ~/.groupdeck/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DeckConfig::load_from(path)?,
        None => DeckConfig::load()?,
    };
    info!("💾 Opening store at {}", config.database_path);
    let store = Arc::new(Store::open(Path::new(&config.database_path))?);

    let bridge: Arc<dyn BridgeClient> = Arc::new(HttpBridge::new(&config.bridge.base_url));
    let hub = NotifyHub::new();
    let sink: Arc<dyn NotifySink> = hub.clone();
    let responder: Arc<dyn ResponseBackend> = Arc::new(HttpBackend::new());

    let timing = DispatchTiming {
        poll_interval: std::time::Duration::from_secs(config.scheduler.poll_interval_secs),
        ..DispatchTiming::default()
    };
    let dispatcher = Dispatcher::new(
        store.clone(),
        bridge.clone(),
        sink.clone(),
        timing,
        config.scheduler.timezone_offset_hours,
    );

    // The bridge transport (and the dashboard's WS layer, via `hub`) attach
    // to these two seams; `event_tx` is what a transport feeds.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<(i64, TenantEvent)>();
    let pipeline = EventPipeline::new(store.clone(), bridge.clone(), sink.clone(), responder);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });
    let pipeline_handle = tokio::spawn(async move { pipeline.run(event_rx).await });

    info!("✅ GroupDeck running (bridge at {})", config.bridge.base_url);
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    drop(event_tx);
    dispatcher_handle.await?;
    pipeline_handle.await?;
    Ok(())
}
