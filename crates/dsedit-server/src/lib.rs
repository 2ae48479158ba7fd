//! dsedit-server: Axum service holding dataset items behind the REST API the
//! dsedit state layer talks to.

pub mod api;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dsedit_core::storage::DatasetStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub use state::ServerConfig;

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the server on the given address.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let store = match &config.data_dir {
        Some(dir) => DatasetStore::open(dir)?,
        None => DatasetStore::in_memory(),
    };
    let app = build_router(AppState::new(Arc::new(store)));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("dsedit item service at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
