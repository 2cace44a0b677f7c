//! Search handler: compiles query bodies through the schema's
//! query-time field resolution and range synthesis.

use crate::body;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use fathom_core::{Hit, Object, Query as IndexQuery, Value};
use fathom_pool::OpenFlags;
use fathom_schema::Schema;
use std::sync::Arc;

/// Compile one field condition into a term or range query.
fn compile_condition(schema: &Schema, field_name: &str, condition: &Value) -> Result<IndexQuery> {
    let field = schema.get_data_field(field_name)?;

    if let Value::Map(m) = condition {
        let range = match m.get("_range") {
            Some(Value::Map(inner)) => Some(inner),
            Some(other) => {
                return Err(ServerError::bad_request(format!(
                    "_range must be an object, got {}",
                    other
                )))
            }
            None if m.contains_key("_from") || m.contains_key("_to") => Some(m),
            None => None,
        };
        if let Some(range) = range {
            let from = range.get("_from").cloned().ok_or_else(|| {
                ServerError::bad_request(format!("range on {:?} is missing _from", field_name))
            })?;
            let to = range.get("_to").cloned().ok_or_else(|| {
                ServerError::bad_request(format!("range on {:?} is missing _to", field_name))
            })?;
            return Ok(Schema::range_query(&field, &from, &to)?);
        }
        return Err(ServerError::bad_request(format!(
            "unsupported condition on {:?}",
            field_name
        )));
    }

    Ok(Schema::term_query(&field, condition)?)
}

/// Compile the `query` object into one conjunctive index query.
fn compile_query(schema: &Schema, query: &Object) -> Result<IndexQuery> {
    let mut parts = Vec::with_capacity(query.len());
    for (field_name, condition) in query.iter() {
        parts.push(compile_condition(schema, field_name, condition)?);
    }
    Ok(IndexQuery::and(parts))
}

fn hit_json(hit: &Hit) -> serde_json::Value {
    let data = Value::from_json(&hit.data).unwrap_or(Value::Nil);
    let id = data
        .as_object()
        .and_then(|m| m.get("_id"))
        .cloned()
        .unwrap_or(Value::Nil);
    serde_json::json!({
        "_id": serde_json::to_value(&id).unwrap_or(serde_json::Value::Null),
        "_data": serde_json::to_value(&data).unwrap_or(serde_json::Value::Null),
        "_weight": hit.weight,
    })
}

/// `POST /:index/_search`
pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    headers: HeaderMap,
    bytes: axum::body::Bytes,
) -> Result<Json<serde_json::Value>> {
    let request = body::decode_object(&headers, &bytes)?;
    let limit = request
        .get("limit")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(state.config.search_limit)
        .min(state.config.search_max_limit);
    let query_obj = match request.get("query") {
        Some(Value::Map(m)) => m.clone(),
        Some(other) => {
            return Err(ServerError::bad_request(format!(
                "query must be an object, got {}",
                other
            )))
        }
        None => Object::new(),
    };

    let hits = tokio::task::spawn_blocking(move || -> Result<Vec<Hit>> {
        let endpoints = state.endpoints(&index)?;
        let hash = endpoints.hash();
        let handle = state.pool.checkout(
            &endpoints,
            OpenFlags::empty(),
            state.config.checkout_timeout(),
        )?;
        let schema = state.load_schema(hash, &handle)?;
        let query = compile_query(&schema, &query_obj)?;
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for i in 0..handle.shard_count() {
            if let Some(backend) = handle.backend(i) {
                hits.extend(backend.search(&query, limit)?);
            }
        }
        hits.truncate(limit);
        Ok(hits)
    })
    .await
    .map_err(|e| ServerError::internal(e.to_string()))??;

    Ok(Json(serde_json::json!({
        "total": hits.len(),
        "hits": hits.iter().map(hit_json).collect::<Vec<_>>(),
    })))
}
