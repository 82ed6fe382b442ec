//! Coordinator binary

use clap::{Parser, Subcommand};
use oxistore::common::Config;
use oxistore::Daemon;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oxistore-proxy")]
#[command(about = "oxistore cluster coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator server
    Serve {
        /// Node ID
        #[arg(long)]
        id: String,

        /// Bind address for the control-plane HTTP API
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Configuration directory
        #[arg(long, default_value = "./proxy-conf")]
        confdir: PathBuf,

        /// Public URL of this node
        #[arg(long)]
        public_url: String,

        /// Intra-control URL (defaults to the public URL)
        #[arg(long, default_value = "")]
        intra_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            confdir,
            public_url,
            intra_url,
        } => {
            // load the config file when present, CLI arguments win
            let config_path = confdir.join("oxistore.json");
            let mut config = if config_path.exists() {
                Config::from_file(&config_path)?
            } else {
                Config::default()
            };
            config.node_id = id;
            config.confdir = confdir;
            config.bind_addr = bind.parse()?;
            config.public_url = public_url;
            config.intra_url = intra_url;

            let daemon = Daemon::init(config).await?;
            daemon.serve().await?;
        }
    }

    Ok(())
}
