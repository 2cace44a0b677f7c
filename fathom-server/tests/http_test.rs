//! HTTP surface integration tests, driven through the router without a
//! live listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use fathom_server::{FathomServer, ServerConfig};
use tower::ServiceExt;

fn server() -> Router {
    FathomServer::new(ServerConfig::default()).router()
}

async fn call(
    router: &Router,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let router = server();
    let (status, body) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let router = server();

    let (status, body) = call(
        &router,
        "PUT",
        "/idx/1",
        Some(r#"{"age": 37, "name": "ana"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    assert_eq!(body["created"], true);

    let (status, data) = call(&router, "GET", "/idx/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["age"], 37);
    assert_eq!(data["name"], "ana");
    assert_eq!(data["_id"], 1);

    // Replacing the same id is a 200, not a 201
    let (status, _) = call(&router, "PUT", "/idx/1", Some(r#"{"age": 38}"#)).await;
    assert_eq!(status, StatusCode::OK);

    // create=true turns an existing id into a conflict
    let (status, _) = call(
        &router,
        "PUT",
        "/idx/1?create=true",
        Some(r#"{"age": 39}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_post_autogenerates_uuid_id() {
    let router = server();
    let (status, body) = call(&router, "POST", "/idx", Some(r#"{"age": 1}"#)).await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    let id = body["_id"].as_str().expect("string id");
    assert!(uuid_like(id), "id {:?} is not a uuid", id);
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.as_bytes()[8] == b'-'
}

#[tokio::test]
async fn test_schema_reflects_guessed_types() {
    let router = server();
    call(&router, "PUT", "/idx/1", Some(r#"{"age": 37, "name": "ana"}"#)).await;

    let (status, schema) = call(&router, "GET", "/idx/_schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["schema"]["age"]["_type"], "positive");
    assert_eq!(schema["schema"]["name"]["_type"], "text");
}

#[tokio::test]
async fn test_strict_schema_rejects_unknown_field() {
    let router = server();
    let (status, _) = call(&router, "PUT", "/idx/_schema", Some(r#"{"_strict": true}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, "PUT", "/idx/2", Some(r#"{"score": 3.13}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let msg = body["error"].as_str().unwrap_or_default();
    assert!(msg.contains("score"), "error names the field: {}", msg);
}

#[tokio::test]
async fn test_search_terms_and_ranges() {
    let router = server();
    for (id, age, name) in [(1, 25, "ana"), (2, 250, "bob"), (3, 2750, "ana")] {
        let body = format!(r#"{{"age": {}, "name": "{}"}}"#, age, name);
        let (status, _) = call(&router, "PUT", &format!("/idx/{}", id), Some(&body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // Term search
    let (status, result) = call(
        &router,
        "POST",
        "/idx/_search",
        Some(r#"{"query": {"name": "ana"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["total"], 2, "result: {}", result);

    // Range search over accuracy buckets
    let (status, result) = call(
        &router,
        "POST",
        "/idx/_search",
        Some(r#"{"query": {"age": {"_range": {"_from": 200, "_to": 2800}}}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let total = result["total"].as_u64().unwrap();
    assert!(total >= 2, "range missed documents: {}", result);

    // Conjunction
    let (status, result) = call(
        &router,
        "POST",
        "/idx/_search",
        Some(r#"{"query": {"name": "ana", "age": {"_range": {"_from": 2000, "_to": 2800}}}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["total"], 1, "result: {}", result);
}

#[tokio::test]
async fn test_delete_then_404() {
    let router = server();
    call(&router, "PUT", "/idx/1", Some(r#"{"age": 1}"#)).await;

    let (status, body) = call(&router, "DELETE", "/idx/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = call(&router, "GET", "/idx/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&router, "DELETE", "/idx/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_document() {
    let router = server();
    call(&router, "PUT", "/idx/1", Some(r#"{"age": 37, "name": "ana"}"#)).await;

    let (status, _) = call(
        &router,
        "PATCH",
        "/idx/1",
        Some(r#"[{"op": "replace", "path": "/age", "value": 38}]"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, data) = call(&router, "GET", "/idx/1", None).await;
    assert_eq!(data["age"], 38);
    assert_eq!(data["name"], "ana");
}

#[tokio::test]
async fn test_unknown_index_is_404() {
    let router = server();
    let (status, _) = call(&router, "GET", "/nope/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(
        &router,
        "POST",
        "/nope/_search",
        Some(r#"{"query": {"a": 1}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let router = server();
    let request = Request::builder()
        .method("PUT")
        .uri("/idx/1")
        .header("content-type", "text/csv")
        .body(Body::from("a,b"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_msgpack_body() {
    let router = server();
    let value = fathom_core::Value::from_json(r#"{"age": 5}"#).unwrap();
    let bytes = rmp_serde::to_vec(&value).unwrap();
    let request = Request::builder()
        .method("PUT")
        .uri("/idx/9")
        .header("content-type", "application/x-msgpack")
        .body(Body::from(bytes))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let (status, data) = call(&router, "GET", "/idx/9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data["age"], 5);
}

#[tokio::test]
async fn test_stats() {
    let router = server();
    call(&router, "PUT", "/idx/1", Some(r#"{"a": 1}"#)).await;
    call(&router, "PUT", "/idx/2", Some(r#"{"a": 2}"#)).await;

    let (status, stats) = call(&router, "GET", "/idx/_stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["doc_count"], 2);
    assert_eq!(stats["shard_count"], 1);
}

#[tokio::test]
async fn test_schema_write_replaces() {
    let router = server();
    call(&router, "PUT", "/idx/1", Some(r#"{"age": 37}"#)).await;

    let (status, schema) = call(
        &router,
        "PUT",
        "/idx/_schema",
        Some(r#"{"name": {"_type": "text"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(schema["schema"]["name"]["_type"], "text");
    assert!(schema["schema"]["age"].is_null(), "replace clears: {}", schema);
}

#[tokio::test]
async fn test_sharded_index_routes_all_documents() {
    let config = ServerConfig {
        n_shards: 3,
        ..ServerConfig::default()
    };
    let router = FathomServer::new(config).router();

    for id in 0..12 {
        let (status, _) = call(
            &router,
            "PUT",
            &format!("/idx/{}", id),
            Some(r#"{"a": 1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, stats) = call(&router, "GET", "/idx/_stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["doc_count"], 12);
    assert_eq!(stats["shard_count"], 3);

    // Every document is retrievable through deterministic routing
    for id in 0..12 {
        let (status, _) = call(&router, "GET", &format!("/idx/{}", id), None).await;
        assert_eq!(status, StatusCode::OK, "doc {} unreachable", id);
    }
}
