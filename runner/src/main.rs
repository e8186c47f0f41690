use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wallet_api::ApiContext;
use wallet_indexer::config::IndexerConfig;
use wallet_indexer::db::Ledger;
use wallet_indexer::derive::HashDeriver;
use wallet_indexer::materializer::WalletMaterializer;
use wallet_indexer::projector::TxProjector;
use wallet_indexer::runtime::spawn_projector;

#[derive(Parser)]
#[command(author, version, about = "Run the wallet indexer service", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Socket address the HTTP API binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => IndexerConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => IndexerConfig::default(),
    };
    config = config.with_env_overrides();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let ledger =
        Arc::new(Ledger::open(&config.database_path()).context("opening projection store")?);
    let projector = spawn_projector(TxProjector::new(Arc::clone(&ledger), config.block_reward_lock));
    let materializer =
        Arc::new(WalletMaterializer::new(Arc::clone(&ledger), Arc::new(HashDeriver)));

    info!(
        data_dir = %config.data_dir.display(),
        block_reward_lock = config.block_reward_lock,
        "wallet indexer starting"
    );

    let context = ApiContext {
        ledger,
        materializer,
        projector,
        config: Arc::new(config),
    };
    wallet_api::serve(context, cli.listen)
        .await
        .context("serving wallet API")?;
    Ok(())
}
