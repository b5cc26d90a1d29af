//! poker-server - background daemon hosting planning-poker sessions

use anyhow::Result;
use clap::Parser;
use planning_poker::config::Config;
use planning_poker::notify::MemoryNotifier;
use planning_poker::server::ServerListener;
use planning_poker::sync::LocalBackend;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "poker-server")]
#[command(about = "planning-poker background server daemon")]
struct Cli {
    /// Server name
    #[arg(short, long, default_value = "default")]
    name: String,

    /// Socket path override
    #[arg(long)]
    socket: Option<std::path::PathBuf>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting planning-poker server: {}", cli.name);

    let socket_path = cli
        .socket
        .unwrap_or_else(|| config.socket_path(&cli.name));
    let notifier = Arc::new(MemoryNotifier::new(config.server.subscription_buffer));
    let backend = LocalBackend::in_memory(notifier);
    let listener = ServerListener::new(cli.name, socket_path, backend)
        .with_client_buffer(config.server.client_buffer);

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    listener.run(shutdown_rx).await
}
