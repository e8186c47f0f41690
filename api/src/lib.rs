//! HTTP surface for the wallet indexer service.
//!
//! Read queries are served from store snapshots and may run concurrently
//! with projection; writes (event ingest, wallet registration) are funnelled
//! through the core's single-writer paths.

mod error;
mod routes;

pub use error::ErrorKind;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use wallet_indexer::config::IndexerConfig;
use wallet_indexer::db::Ledger;
use wallet_indexer::materializer::WalletMaterializer;
use wallet_indexer::runtime::ProjectorHandle;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct ApiContext {
    pub ledger: Arc<Ledger>,
    pub materializer: Arc<WalletMaterializer>,
    pub projector: ProjectorHandle,
    pub config: Arc<IndexerConfig>,
}

/// Assemble the service router.
pub fn router(context: ApiContext) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/event", post(routes::events::submit_event))
        .route(
            "/wallet",
            get(routes::wallet::wallet_status).post(routes::wallet::register_wallet),
        )
        .route("/wallet/addresses", get(routes::wallet::wallet_addresses))
        .route("/wallet/balances", get(routes::wallet::wallet_balances))
        .route("/wallet/history", get(routes::wallet::wallet_history))
        .with_state(context)
}

/// Bind and serve until the listener fails.
pub async fn serve(context: ApiContext, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "wallet API listening");
    axum::serve(listener, router(context)).await
}
