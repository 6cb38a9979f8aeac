// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the gateway HTTP API.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

/// Client-supplied correlation header.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header the correlation id is echoed back on.
pub const RESPONSE_ID_HEADER: &str = "x-response-id";

/// Echo the client's `x-request-id` (or a fresh UUID when absent) as
/// `x-response-id` on every response.
pub async fn correlation(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(RESPONSE_ID_HEADER, value);
    }
    resp
}

/// Logs method, path, status code, and duration for each request using
/// structured fields.
pub struct RequestLogger;

impl RequestLogger {
    /// Axum-compatible handler function.
    pub async fn layer(req: Request, next: Next) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();

        let resp = next.run(req).await;

        info!(
            http.method = %method,
            http.path = %path,
            http.status = resp.status().as_u16(),
            http.duration_ms = start.elapsed().as_millis() as u64,
            "request completed"
        );

        resp
    }
}

/// Permissive CORS for the operational and scan endpoints.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
