//! Schema read/write handlers.

use crate::body;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use fathom_pool::OpenFlags;
use std::sync::Arc;

/// `GET /:index/_schema`
pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
) -> Result<impl axum::response::IntoResponse> {
    let json = tokio::task::spawn_blocking(move || -> Result<String> {
        let endpoints = state.endpoints(&index)?;
        let hash = endpoints.hash();
        let handle = state.pool.checkout(
            &endpoints,
            OpenFlags::empty(),
            state.config.checkout_timeout(),
        )?;
        let schema = state.load_schema(hash, &handle)?;
        Ok(schema.current().to_json())
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;
    Ok(([("content-type", "application/json")], json))
}

/// `PUT /:index/_schema` - install a schema wholesale (replace).
pub async fn put_schema(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
    bytes: axum::body::Bytes,
) -> Result<impl axum::response::IntoResponse> {
    let obj = body::decode_object(&headers, &bytes)?;
    let json = tokio::task::spawn_blocking(move || -> Result<String> {
        let endpoints = state.endpoints(&index)?;
        let hash = endpoints.hash();
        let lock = state.write_lock(hash);
        let _guard = lock.lock();

        let handle = state.pool.checkout(
            &endpoints,
            OpenFlags::WRITABLE | OpenFlags::SPAWN,
            state.config.checkout_timeout(),
        )?;
        let mut schema = state.load_schema(hash, &handle)?;
        schema.write(&obj, true)?;
        let published = match schema.get_modified_schema() {
            Some(modified) => {
                state.publish_schema(hash, &handle, modified.clone())?;
                modified.to_json()
            }
            None => schema.current().to_json(),
        };
        Ok(published)
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;
    Ok(([("content-type", "application/json")], json))
}
