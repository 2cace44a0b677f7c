//! Document CRUD handlers.

use crate::body;
use crate::error::{Result, ServerError};
use crate::patch;
use crate::state::{AppState, HandleStats};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use fathom_core::{Error as CoreError, Object, Value};
use fathom_pool::OpenFlags;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Query parameters accepted by the write endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    /// Force a backend commit after the write
    #[serde(default)]
    pub commit: bool,
    /// Fail with 409 when the document already exists
    #[serde(default)]
    pub create: bool,
}

/// Parse a path id: numeric ids stay numeric so the id type can be
/// guessed as `positive` on a fresh schema.
fn parse_id(raw: &str) -> Value {
    match raw.parse::<u64>() {
        Ok(n) => Value::UInt(n),
        Err(_) => Value::Str(raw.to_string()),
    }
}

struct WriteOutcome {
    created: bool,
    document_id: Value,
}

fn run_write(
    state: &Arc<AppState>,
    index: &str,
    id: Option<Value>,
    obj: Object,
    params: &WriteParams,
) -> Result<WriteOutcome> {
    let endpoints = state.endpoints(index)?;
    let hash = endpoints.hash();

    // Schema updates are serialised per endpoint set
    let lock = state.write_lock(hash);
    let _guard = lock.lock();

    let handle = state.pool.checkout(
        &endpoints,
        OpenFlags::WRITABLE | OpenFlags::SPAWN,
        state.config.checkout_timeout(),
    )?;

    let mut schema = state.load_schema(hash, &handle)?;
    let outcome = schema.index(&obj, id.as_ref(), &HandleStats(&handle), None)?;

    let backend = handle.backend_for_term(&outcome.term_id).clone();
    let existed = backend.get_document(&outcome.term_id).is_ok();
    if existed && params.create {
        return Err(ServerError::Core(CoreError::DocVersionConflict(format!(
            "{}",
            outcome.document_id
        ))));
    }

    backend.replace_document(&outcome.term_id, outcome.document)?;

    // Only a completed walk publishes schema changes
    if let Some(modified) = schema.get_modified_schema() {
        state.publish_schema(hash, &handle, modified)?;
    }
    if params.commit {
        backend.commit()?;
    }

    debug!(index, id = %outcome.document_id, created = !existed, "indexed document");
    Ok(WriteOutcome {
        created: !existed,
        document_id: outcome.document_id,
    })
}

fn write_response(index: &str, outcome: WriteOutcome) -> impl IntoResponse {
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(serde_json::json!({
            "_index": index,
            "_id": serde_json::to_value(&outcome.document_id).unwrap_or(serde_json::Value::Null),
            "created": outcome.created,
        })),
    )
}

/// `PUT /:index/:id` - index or replace a document.
pub async fn put_document(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    bytes: axum::body::Bytes,
) -> Result<impl IntoResponse> {
    let obj = body::decode_object(&headers, &bytes)?;
    let id = parse_id(&id);
    let outcome = tokio::task::spawn_blocking({
        let state = state.clone();
        let index = index.clone();
        move || run_write(&state, &index, Some(id), obj, &params)
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;
    Ok(write_response(&index, outcome))
}

/// `POST /:index` - index with an autogenerated id.
pub async fn post_document(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    bytes: axum::body::Bytes,
) -> Result<impl IntoResponse> {
    let obj = body::decode_object(&headers, &bytes)?;
    let outcome = tokio::task::spawn_blocking({
        let state = state.clone();
        let index = index.clone();
        move || run_write(&state, &index, None, obj, &params)
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;
    // Autogenerated ids always create
    Ok((StatusCode::CREATED, write_response(&index, outcome).into_response()))
}

fn fetch_data(state: &Arc<AppState>, index: &str, id: &Value) -> Result<Value> {
    let endpoints = state.endpoints(index)?;
    let hash = endpoints.hash();
    let handle = state
        .pool
        .checkout(&endpoints, OpenFlags::empty(), state.config.checkout_timeout())?;
    let schema = state.load_schema(hash, &handle)?;
    let term_id = schema.id_term(id)?;
    let doc = handle.backend_for_term(&term_id).get_document(&term_id)?;
    Ok(Value::from_json(doc.data())?)
}

/// `GET /:index/:id` - fetch stored data.
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let id = parse_id(&id);
    let data = tokio::task::spawn_blocking(move || fetch_data(&state, &index, &id))
        .await
        .map_err(|e| ServerError::internal(e.to_string()))??;
    Ok(([("content-type", "application/json")], data.to_json()))
}

/// `DELETE /:index/:id` - delete a document.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
    Query(params): Query<WriteParams>,
) -> Result<impl IntoResponse> {
    let id = parse_id(&id);
    let deleted = tokio::task::spawn_blocking(move || -> Result<bool> {
        let endpoints = state.endpoints(&index)?;
        let hash = endpoints.hash();
        let handle = state.pool.checkout(
            &endpoints,
            OpenFlags::WRITABLE,
            state.config.checkout_timeout(),
        )?;
        let schema = state.load_schema(hash, &handle)?;
        let term_id = schema.id_term(&id)?;
        let backend = handle.backend_for_term(&term_id).clone();
        let deleted = backend.delete_document(&term_id)?;
        if params.commit {
            backend.commit()?;
        }
        Ok(deleted)
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;

    if !deleted {
        return Err(ServerError::not_found("document"));
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// `PATCH /:index/:id` - partial update with JSON-Patch semantics.
pub async fn patch_document(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
    Query(params): Query<WriteParams>,
    headers: HeaderMap,
    bytes: axum::body::Bytes,
) -> Result<impl IntoResponse> {
    let patch_doc = body::decode(&headers, &bytes)?;
    let id = parse_id(&id);
    let outcome = tokio::task::spawn_blocking({
        let state = state.clone();
        let index = index.clone();
        move || -> Result<WriteOutcome> {
            // Read-modify-write over the stored data
            let mut data = fetch_data(&state, &index, &id)?;
            patch::apply(&mut data, &patch_doc)?;
            let mut obj = match data {
                Value::Map(m) => m,
                other => {
                    return Err(ServerError::bad_request(format!(
                        "patched document is not an object: {}",
                        other
                    )))
                }
            };
            obj.remove("_id");
            run_write(&state, &index, Some(id), obj, &params)
        }
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "_index": index,
            "_id": serde_json::to_value(&outcome.document_id).unwrap_or(serde_json::Value::Null),
        })),
    ))
}
