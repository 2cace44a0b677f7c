//! Fathom HTTP Server
//!
//! A thin REST wrapper around the schema engine and the shard pool:
//! bodies are decoded per `Content-Type` (JSON/MsgPack), endpoints are
//! resolved from the URL path, a shard is checked out, the schema walk
//! builds the document, and the result is written through the Index
//! Backend before the shard is checked back in. Modified schemas are
//! published only after a walk completes without error.

pub mod body;
pub mod config;
pub mod error;
pub mod patch;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Fathom HTTP server
pub struct FathomServer {
    state: Arc<AppState>,
    router: Router,
}

impl FathomServer {
    /// Create a server over the in-process backend.
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(AppState::new(config));
        let router = routes::build_router(state.clone());
        FathomServer { state, router }
    }

    /// Create a server over an arbitrary backend factory.
    pub fn with_factory(
        config: ServerConfig,
        factory: Arc<dyn fathom_core::BackendFactory>,
    ) -> Self {
        let state = Arc::new(AppState::with_factory(config, factory));
        let router = routes::build_router(state.clone());
        FathomServer { state, router }
    }

    /// The shared application state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The router (for tests).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.state.config.listen;
        let listener = TcpListener::bind(addr).await?;
        info!(
            addr = %addr,
            shards = self.state.config.n_shards,
            "Fathom server starting"
        );
        let result = axum::serve(listener, self.router).await;
        self.state.pool.finish();
        result
    }
}
