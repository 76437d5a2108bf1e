// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-over-HTTP client for auxiliary services.
//!
//! ## Failure classes
//!
//! - **Transport**: the request never produced an HTTP response (unreachable
//!   host, refused or reset connection, timeout).
//! - **Protocol**: a response arrived but it is unusable: non-2xx status, or
//!   a body declared as JSON that does not parse.
//!
//! A 2xx response whose content type is not JSON yields `Ok(None)`: plain
//! text pages from proxies and load balancers are logged and tolerated.
//!
//! No retries happen here; callers own their retry policy.

use std::time::Duration;

use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Request timeout applied to every call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("{url} returned invalid JSON: {reason}")]
    InvalidJson { url: String, reason: String },

    #[error("failed to encode request for {url}: {reason}")]
    Encode { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Status { .. } | ClientError::InvalidJson { .. })
    }

    /// HTTP status of a protocol failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Posts JSON documents to a single service URL.
#[derive(Debug, Clone)]
pub struct JsonClient {
    url: String,
    session: String,
    http: Client,
}

impl JsonClient {
    pub fn new(url: impl AsRef<str>) -> Result<Self, ClientError> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl AsRef<str>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        let session = format!("session{:05}", OsRng.next_u32() & 0xffff);
        let url = url.as_ref().trim_end_matches('/').to_string();
        debug!(session = %session, url = %url, "Starting client session");

        Ok(Self { url, session, http })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Label used to correlate this client's requests in the logs.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Post `request` and decode the JSON reply.
    ///
    /// Returns `Ok(None)` when the service answers 2xx with a non-JSON body.
    pub async fn post<T: Serialize + ?Sized>(&self, request: &T) -> Result<Option<Value>, ClientError> {
        let body = serde_json::to_vec(request).map_err(|e| ClientError::Encode {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        debug!(
            session = %self.session,
            url = %self.url,
            len = body.len(),
            "Posting request"
        );

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    format!("timed out: {e}")
                } else {
                    e.to_string()
                };
                warn!(session = %self.session, url = %self.url, error = %reason, "Request failed");
                ClientError::Transport {
                    url: self.url.clone(),
                    reason,
                }
            })?;

        let status = response.status();
        let is_json = is_json(response.headers().get(CONTENT_TYPE));

        let bytes = response.bytes().await.map_err(|e| ClientError::Transport {
            url: self.url.clone(),
            reason: format!("reading response body failed: {e}"),
        })?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).trim().to_string();
            warn!(session = %self.session, url = %self.url, %status, "Request rejected");
            return Err(ClientError::Status {
                url: self.url.clone(),
                status,
                body,
            });
        }

        if !is_json {
            info!(
                session = %self.session,
                url = %self.url,
                body = %String::from_utf8_lossy(&bytes),
                "Service responded with a non-JSON message"
            );
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ClientError::InvalidJson {
                url: self.url.clone(),
                reason: e.to_string(),
            })
    }

    /// Post and decode the reply into `R`.
    pub async fn post_as<T, R>(&self, request: &T) -> Result<Option<R>, ClientError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        match self.post(request).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ClientError::InvalidJson {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }
}

/// True if the content type's media type is `application/json`.
fn is_json(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::post, Json, Router};
    use serde_json::json;
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn session_label_is_five_digits() {
        let client = JsonClient::new("http://localhost:1/").unwrap();
        assert!(client.session().starts_with("session"));
        assert_eq!(client.session().len(), "session".len() + 5);
        assert_eq!(client.url(), "http://localhost:1");
    }

    #[test]
    fn json_detection_ignores_parameters() {
        let v = HeaderValue::from_static("application/json; charset=utf-8");
        assert!(is_json(Some(&v)));
        let v = HeaderValue::from_static("text/plain");
        assert!(!is_json(Some(&v)));
        assert!(!is_json(None));
    }

    #[tokio::test]
    async fn echoes_json() {
        let app = Router::new().route("/", post(|Json(v): Json<Value>| async move { Json(v) }));
        let addr = serve(app).await;

        let client = JsonClient::new(format!("http://{addr}/")).unwrap();
        let reply = client.post(&json!({"a": 1})).await.unwrap();
        assert_eq!(reply, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn server_error_is_protocol_failure() {
        let app = Router::new().route(
            "/",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let addr = serve(app).await;

        let client = JsonClient::new(format!("http://{addr}")).unwrap();
        let err = client.post(&json!({"a": 1})).await.unwrap_err();
        assert!(err.is_protocol());
        assert!(!err.is_transport());
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        match err {
            ClientError::Status { body, .. } => assert_eq!(body, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn plain_text_success_yields_no_result() {
        let app = Router::new().route(
            "/",
            post(|| async { ([(header::CONTENT_TYPE, "text/plain")], "accepted") }),
        );
        let addr = serve(app).await;

        let client = JsonClient::new(format!("http://{addr}")).unwrap();
        assert_eq!(client.post(&json!({})).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_json_is_protocol_failure() {
        let app = Router::new().route(
            "/",
            post(|| async { ([(header::CONTENT_TYPE, "application/json")], "{not json") }),
        );
        let addr = serve(app).await;

        let client = JsonClient::new(format!("http://{addr}")).unwrap();
        let err = client.post(&json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidJson { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = JsonClient::new(format!("http://{addr}")).unwrap();
        let err = client.post(&json!({})).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn unencodable_request_is_not_a_transport_failure() {
        // Map keys must serialize as strings.
        let mut request = std::collections::BTreeMap::new();
        request.insert(vec![1u8, 2], 1u8);

        let client = JsonClient::new("http://127.0.0.1:1").unwrap();
        let err = client.post(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::Encode { .. }));
        assert!(!err.is_transport());
        assert!(!err.is_protocol());
    }

    #[tokio::test]
    async fn timeout_is_transport_failure() {
        let app = Router::new().route(
            "/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        );
        let addr = serve(app).await;

        let client = JsonClient::with_timeout(format!("http://{addr}"), Duration::from_millis(100)).unwrap();
        let err = client.post(&json!({})).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn post_as_decodes_typed_reply() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Reply {
            a: u32,
        }

        let app = Router::new().route("/", post(|Json(v): Json<Value>| async move { Json(v) }));
        let addr = serve(app).await;

        let client = JsonClient::new(format!("http://{addr}")).unwrap();
        let reply: Option<Reply> = client.post_as(&json!({"a": 7})).await.unwrap();
        assert_eq!(reply, Some(Reply { a: 7 }));
    }
}
