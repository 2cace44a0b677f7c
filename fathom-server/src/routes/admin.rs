//! Liveness and per-index statistics.

use crate::error::{Result, ServerError};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use fathom_pool::OpenFlags;
use std::sync::Arc;

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `GET /:index/_stats`
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let (total, shards) = tokio::task::spawn_blocking(move || -> Result<(u64, Vec<u64>)> {
        let endpoints = state.endpoints(&index)?;
        let handle = state.pool.checkout(
            &endpoints,
            OpenFlags::empty(),
            state.config.checkout_timeout(),
        )?;
        let shards: Vec<u64> = (0..handle.shard_count())
            .map(|i| handle.doccount(i).unwrap_or(0))
            .collect();
        Ok((shards.iter().sum(), shards))
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;

    Ok(Json(serde_json::json!({
        "doc_count": total,
        "shard_count": shards.len(),
        "shards": shards,
    })))
}
