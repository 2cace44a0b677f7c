//! Fathom server CLI
//!
//! Run with: `cargo run -p fathom-server -- --help`

use clap::Parser;
use fathom_server::{telemetry, FathomServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    telemetry::init_logging();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        shards = config.n_shards,
        "Starting Fathom server"
    );

    let server = FathomServer::new(config);
    server.run().await.map_err(Into::into)
}
