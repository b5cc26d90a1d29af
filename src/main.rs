//! poker - command-line client for planning-poker sessions

use anyhow::Result;
use clap::{Parser, Subcommand};
use planning_poker::client;
use planning_poker::config::Config;
use planning_poker::model::Effort;

#[derive(Parser)]
#[command(name = "poker")]
#[command(about = "Estimate work together with planning poker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Name of the server to talk to
    #[arg(short, long, default_value = "default")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new session and host it
    Create {
        /// Your display name
        #[arg(short, long)]
        name: String,
    },
    /// Join an existing session
    Join {
        /// Session id, e.g. calm-otter-42
        session_id: String,
        /// Your display name
        #[arg(short, long)]
        name: String,
    },
    /// Cast your vote
    Vote {
        session_id: String,
        /// Card to play: ? 0.5 1 2 3 5 8 13 20 40 100 coffee
        effort: Effort,
    },
    /// Reveal or hide everyone's votes (host only)
    Toggle { session_id: String },
    /// Reset every vote (host only)
    Clear { session_id: String },
    /// Print the session once
    Show {
        session_id: String,
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow the session live and play from the prompt
    Watch { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let server = cli.server.as_str();

    match cli.command {
        Commands::Create { name } => client::create_session(&config, server, &name).await,
        Commands::Join { session_id, name } => {
            client::join_session(&config, server, &session_id, &name).await
        }
        Commands::Vote { session_id, effort } => {
            client::cast_vote(&config, server, &session_id, effort).await
        }
        Commands::Toggle { session_id } => client::toggle_votes(&config, server, &session_id).await,
        Commands::Clear { session_id } => client::clear_votes(&config, server, &session_id).await,
        Commands::Show { session_id, json } => {
            client::show_session(&config, server, &session_id, json).await
        }
        Commands::Watch { session_id } => {
            tracing::info!("Watching session: {}", session_id);
            client::watch_session(&config, server, &session_id).await
        }
    }
}
