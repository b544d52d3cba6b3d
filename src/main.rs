use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use task_ring::cluster::{Membership, TaskRing, DEFAULT_REPLICAS};
use task_ring::config::ServerConfig;
use task_ring::dispatch::DistributedTaskService;
use task_ring::logging;
use task_ring::task::{InMemoryTaskStore, LoggingActionHandler};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dispatcher node until Ctrl+C
    Run {
        /// Config file; searched in the default locations when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print which server owns each key
    Locate {
        /// Comma separated server ids
        #[arg(short, long, value_delimiter = ',', required = true)]
        servers: Vec<String>,
        #[arg(short, long, default_value_t = DEFAULT_REPLICAS)]
        replicas: u32,
        /// Keys to resolve, e.g. application ids
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Write a default config file
    InitConfig {
        #[arg(default_value = "task-ring.yml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Locate { servers, replicas, keys } => {
            let ring = TaskRing::with_servers(replicas, &servers);
            for key in keys {
                println!("{}\t{}", key, ring.locate(&key)?);
            }
            Ok(())
        }
        Commands::InitConfig { path } => {
            ServerConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => ServerConfig::load_from_file(&path)?,
        None => ServerConfig::load()?,
    };
    logging::init(&config.logging).context("Failed to initialize logging")?;

    let membership = Arc::new(Membership::new(config.cluster.replicas));
    let service = DistributedTaskService::new(
        membership,
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(LoggingActionHandler),
        config.dispatcher.clone(),
    );

    let mut servers = config.cluster.servers.clone();
    if servers.is_empty() {
        servers.push(config.cluster.server_id.clone());
    }
    service.init(&servers, config.cluster.server_id.clone())?;
    info!(server = %config.cluster.server_id, members = servers.len(), "Node started");

    // Setup Ctrl+C handler
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })
    .context("Error setting Ctrl-C handler")?;

    let poll_loop = service.start();
    rx.recv().await;

    info!("Shutting down");
    service.stop();
    if let Err(e) = poll_loop.await {
        error!("Poll loop ended abnormally: {}", e);
    }
    service.membership().teardown();
    Ok(())
}
