//! Server configuration.

use clap::Parser;
use std::net::SocketAddr;

/// Fathom HTTP server configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "fathom-server")]
#[command(about = "Document indexing and search server")]
pub struct ServerConfig {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8880", env = "FATHOM_LISTEN")]
    pub listen: SocketAddr,

    /// Number of physical shards per index
    #[arg(long, default_value = "1", env = "FATHOM_SHARDS")]
    pub n_shards: usize,

    /// Maximum shard queues kept per LRU table
    #[arg(long, default_value = "100", env = "FATHOM_POOL_QUEUES")]
    pub pool_queues: usize,

    /// Maximum reusable handles per readable queue
    #[arg(long, default_value = "10", env = "FATHOM_POOL_HANDLES")]
    pub pool_handles: usize,

    /// Shard checkout timeout in milliseconds
    #[arg(long, default_value = "10000", env = "FATHOM_CHECKOUT_TIMEOUT_MS")]
    pub checkout_timeout_ms: u64,

    /// Default search result limit
    #[arg(long, default_value = "10", env = "FATHOM_SEARCH_LIMIT")]
    pub search_limit: usize,

    /// Maximum search result limit
    #[arg(long, default_value = "1000", env = "FATHOM_SEARCH_MAX_LIMIT")]
    pub search_max_limit: usize,

    /// Enable permissive CORS
    #[arg(long, env = "FATHOM_CORS")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: "127.0.0.1:8880".parse().unwrap(),
            n_shards: 1,
            pool_queues: 100,
            pool_handles: 10,
            checkout_timeout_ms: 10_000,
            search_limit: 10,
            search_max_limit: 1000,
            cors_enabled: false,
        }
    }
}

impl ServerConfig {
    /// Checkout timeout as a Duration
    pub fn checkout_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.checkout_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let config = ServerConfig::parse_from(["fathom-server"]);
        assert_eq!(config.n_shards, 1);
        assert_eq!(config.search_limit, 10);
    }

    #[test]
    fn test_flags_override() {
        let config =
            ServerConfig::parse_from(["fathom-server", "--n-shards", "3", "--search-limit", "5"]);
        assert_eq!(config.n_shards, 3);
        assert_eq!(config.search_limit, 5);
    }
}
