// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Capability Endpoints
//!
//! | Path | Methods | Runs on |
//! |------|---------|---------|
//! | `/info` | GET, HEAD, POST | event loop |
//! | `/initialize` | POST | worker pool |
//! | `/invoke` | POST | worker pool |
//! | `/verify` | POST | worker pool |
//!
//! Anything else is a plain-text 404, and a known path with the wrong method
//! a plain-text 405.

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{Method, StatusCode},
    response::Response,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info_span;

use crate::{error::plain_error, state::AppState};

pub mod extract;
pub mod info;
pub mod initialize;
pub mod invoke;
pub mod verify;

/// Build the routing table. Called once at startup.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/info", get(info::get_info).post(info::get_info))
        .route("/initialize", post(initialize::initialize))
        .route("/invoke", post(invoke::invoke))
        .route("/verify", post(verify::verify))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

async fn not_found(method: Method) -> Response {
    plain_error(&method, StatusCode::NOT_FOUND, "Not Found")
}

async fn method_not_allowed(method: Method) -> Response {
    plain_error(&method, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::EnclaveIdentity;
    use crate::testing::{sample_record, StubEnclave};
    use crate::worker::WorkerPool;
    use axum::body::{to_bytes, Body};
    use axum::http::header;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    const STORAGE_URL: &str = "http://sservice:7201/";

    fn app_with(enclave: StubEnclave, workers: usize, queue: usize, max_body: usize) -> Router {
        let identity = Arc::new(EnclaveIdentity::new(sample_record(), Box::new(enclave)));
        let pool = Arc::new(WorkerPool::new(workers, queue).unwrap());
        router(AppState::new(identity, pool, STORAGE_URL), max_body)
    }

    fn app() -> Router {
        app_with(StubEnclave::default(), 2, 4, 1024)
    }

    fn post_json(uri: &str, body: Value) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn invoke_body(method: &str) -> Value {
        json!({"context_id": "ctx-1", "method": method, "params": {"n": 1}})
    }

    #[tokio::test]
    async fn info_answers_get_and_post() {
        let app = app();
        for method in ["GET", "POST"] {
            let response = app.clone().oneshot(empty(method, "/info")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key("x-request-id"));

            let body = body_json(response).await;
            let record = sample_record();
            assert_eq!(body["enclave_id"], record.info.enclave_id);
            assert_eq!(body["verifying_key"], record.info.verifying_key);
            assert_eq!(body["encryption_key"], record.info.encryption_key);
            assert_eq!(body["storage_service_url"], STORAGE_URL);
        }
    }

    #[tokio::test]
    async fn unknown_path_is_plain_text_404() {
        let response = app().oneshot(empty("GET", "/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Not Found\n");
    }

    #[tokio::test]
    async fn head_error_has_no_body() {
        let response = app().oneshot(empty("HEAD", "/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn wrong_method_is_plain_text_405() {
        let response = app().oneshot(empty("GET", "/invoke")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_text(response).await, "Method Not Allowed\n");
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let big = "x".repeat(4096);
        let response = app()
            .oneshot(post_json("/invoke", json!({"context_id": "c", "method": big})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_body_is_client_error() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/initialize")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let response = app()
            .oneshot(post_json("/initialize", json!({"contract_id": 5})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app().oneshot(empty("POST", "/verify")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn initialize_invoke_verify() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json("/initialize", json!({"contract_id": "k", "creator_id": "me"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["context_id"], "ctx-1");

        let response = app.clone().oneshot(post_json("/invoke", invoke_body("add"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sequence"], 1);
        assert_eq!(body["result"], json!({"n": 1}));

        let claim = json!({
            "context_id": "ctx-1",
            "sequence": 1,
            "state_hash": body["state_hash"],
            "signature": body["signature"],
        });
        let response = app.clone().oneshot(post_json("/verify", claim)).await.unwrap();
        assert_eq!(body_json(response).await, json!({"valid": true}));
    }

    #[tokio::test]
    async fn enclave_errors_are_structured() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post_json("/invoke", json!({"context_id": "missing", "method": "m"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let response = app
            .clone()
            .oneshot(post_json("/initialize", json!({"contract_id": "", "creator_id": "me"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.clone().oneshot(post_json("/invoke", invoke_body("panic"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // The pool survives a panicking unit.
        let response = app.oneshot(post_json("/invoke", invoke_body("add"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn info_stays_responsive_while_pool_is_saturated() {
        let enclave = StubEnclave::slow(Duration::from_millis(400));
        let entered = enclave.entered();
        let app = app_with(enclave, 1, 1, 1024);

        let mut invokes = Vec::new();
        for _ in 0..3 {
            let app = app.clone();
            invokes.push(tokio::spawn(async move {
                app.oneshot(post_json("/invoke", invoke_body("slow"))).await.unwrap().status()
            }));
        }
        while entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let response = tokio::time::timeout(Duration::from_millis(200), app.oneshot(empty("GET", "/info")))
            .await
            .expect("info blocked behind the worker pool")
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_millis(200));

        for invoke in invokes {
            assert_eq!(invoke.await.unwrap(), StatusCode::OK);
        }
        assert_eq!(entered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn requests_beyond_pool_size_queue_and_complete() {
        let app = app_with(StubEnclave::slow(Duration::from_millis(10)), 2, 1, 1024);

        let mut invokes = Vec::new();
        for _ in 0..12 {
            let app = app.clone();
            invokes.push(tokio::spawn(async move {
                app.oneshot(post_json("/invoke", invoke_body("work"))).await.unwrap()
            }));
        }

        let mut sequences = Vec::new();
        for invoke in invokes {
            let response = invoke.await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            sequences.push(body_json(response).await["sequence"].as_u64().unwrap());
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=12).collect::<Vec<_>>());
    }
}
