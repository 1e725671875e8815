use std::path::PathBuf;
use std::sync::Arc;

use beeper_mcp::{
    ConfigOverrides, HeadlessPlatform, McpHandler, MemoryStore, RecordStore, Supervisor, ToolRegistry,
    resolve_config,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "beeper-mcp")]
#[command(about = "MCP server for Beeper chats, contacts and messages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the server under the supervisor until interrupted
    Start {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// JSON file with `chats`, `contacts` and `messages` rows
        #[arg(long)]
        fixtures: Option<PathBuf>,
        #[arg(long)]
        ping_interval_secs: Option<u64>,
        #[arg(long)]
        restart_delay_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { host, port, fixtures, ping_interval_secs, restart_delay_secs } => {
            let overrides = ConfigOverrides {
                host,
                port,
                fixtures,
                ping_interval_secs,
                restart_delay_secs,
                ..Default::default()
            };
            let config = resolve_config(&overrides, &ConfigOverrides::from_process_env());

            let store: Arc<dyn RecordStore> = match &config.fixtures {
                Some(path) => Arc::new(MemoryStore::load(path)?),
                None => {
                    warn!("no fixtures given, serving an empty store");
                    Arc::new(MemoryStore::new())
                }
            };
            let handler = McpHandler::new(Arc::new(ToolRegistry::with_default_tools()), store);
            let supervisor = Supervisor::new(config, handler, Arc::new(HeadlessPlatform));

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, shutting down");
                }
                trigger.cancel();
            });
            supervisor.run(shutdown).await?;
        }
    }
    Ok(())
}
