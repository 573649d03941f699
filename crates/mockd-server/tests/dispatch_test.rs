//! End-to-end dispatch: loaded mocks through the router into the SSE,
//! chunked, and plain response paths.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use mockd_server::router::Router;
use mockd_server::{handle_request, AppState};
use mockd_stream::buffer::EventBufferPool;
use mockd_stream::{ConnectionManager, StreamHandler};
use serde_json::json;
use std::sync::Arc;

fn state(mocks: serde_json::Value) -> Arc<AppState> {
    let mocks: Vec<mockd_core::Mock> = serde_json::from_value(mocks).unwrap();
    let router = Router::new(mocks).unwrap();
    Arc::new(AppState {
        router,
        handler: StreamHandler::new(
            Arc::new(ConnectionManager::new(0)),
            Arc::new(EventBufferPool::new()),
        ),
    })
}

fn get(path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .uri(path)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn body_string(response: hyper::Response<mockd_stream::handler::StreamBody>) -> String {
    let collected = response.into_body().collect().await.unwrap();
    String::from_utf8_lossy(&collected.to_bytes()).into_owned()
}

#[tokio::test]
async fn test_plain_response_dispatch() {
    let state = state(json!([{
        "id": "hello",
        "type": "http",
        "http": {
            "matcher": { "method": "GET", "path": "/hello" },
            "response": {
                "statusCode": 201,
                "body": { "greeting": "hi" },
                "headers": { "X-Mock": "hello" }
            }
        }
    }]));

    let response = handle_request(state, get("/hello"), "127.0.0.1:1".to_string()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("X-Mock").unwrap(), "hello");
    // Non-string bodies are stored as JSON text at decode time.
    assert_eq!(body_string(response).await, "{\"greeting\":\"hi\"}");
}

#[tokio::test]
async fn test_unmatched_request_is_404() {
    let state = state(json!([]));
    let response = handle_request(state, get("/nope"), "127.0.0.1:1".to_string()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_string(response).await.contains("no mock matched"));
}

#[tokio::test]
async fn test_sse_dispatch_wire_format() {
    let state = state(json!([{
        "id": "events",
        "type": "http",
        "http": {
            "matcher": { "path": "/events" },
            "sse": {
                "events": [
                    { "data": "Hello" },
                    { "data": "World" },
                    { "data": "!" }
                ],
                "timing": { "fixedDelayMs": 10 },
                "lifecycle": { "maxEvents": 3 }
            }
        }
    }]));

    let response = handle_request(state, get("/events"), "127.0.0.1:1".to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream; charset=utf-8"
    );

    let wire = body_string(response).await;
    let data_lines: Vec<&str> = wire.lines().filter(|l| l.starts_with("data:")).collect();
    assert_eq!(data_lines, vec!["data:Hello", "data:World", "data:!"]);
    assert!(wire.ends_with("\n\n"));
}

#[tokio::test]
async fn test_chunked_dispatch() {
    let state = state(json!([{
        "id": "chunks",
        "type": "http",
        "http": {
            "matcher": { "path": "/chunks" },
            "chunked": {
                "data": "Hello World! This is chunked data.",
                "chunkSize": 10,
                "chunkDelayMs": 5
            }
        }
    }]));

    let response = handle_request(state, get("/chunks"), "127.0.0.1:1".to_string()).await;
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );
    assert_eq!(
        body_string(response).await,
        "Hello World! This is chunked data."
    );
}

#[tokio::test]
async fn test_ndjson_dispatch() {
    let state = state(json!([{
        "id": "ndjson",
        "type": "http",
        "http": {
            "matcher": { "path": "/items" },
            "chunked": {
                "format": "ndjson",
                "ndjsonItems": [
                    { "id": 1, "name": "Alice" },
                    { "id": 2, "name": "Bob" },
                    { "id": 3, "name": "Charlie" }
                ],
                "chunkDelayMs": 5
            }
        }
    }]));

    let response = handle_request(state, get("/items"), "127.0.0.1:1".to_string()).await;
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/x-ndjson"
    );

    let body = body_string(response).await;
    let lines: Vec<&str> = body.split('\n').filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 3);
    for (i, line) in lines.iter().enumerate() {
        let item: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(item["id"], (i + 1) as u64);
    }
}

#[tokio::test]
async fn test_body_matcher_dispatch() {
    let state = state(json!([{
        "id": "by-body",
        "type": "http",
        "http": {
            "matcher": { "path": "/rpc", "bodyContains": "ping" },
            "response": { "body": "pong" }
        }
    }]));

    let request = Request::builder()
        .method("POST")
        .uri("/rpc")
        .body(Full::new(Bytes::from_static(b"{\"op\":\"ping\"}")))
        .unwrap();
    let response = handle_request(Arc::clone(&state), request, "127.0.0.1:1".to_string()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "pong");

    let miss = Request::builder()
        .method("POST")
        .uri("/rpc")
        .body(Full::new(Bytes::from_static(b"{\"op\":\"other\"}")))
        .unwrap();
    let response = handle_request(state, miss, "127.0.0.1:1".to_string()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
