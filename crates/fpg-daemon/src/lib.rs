// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP front-end for the fingerprint gateway.
//!
//! Binds the scan pipeline, session store, auxiliary engine calls, and
//! operational endpoints to an Axum router.

#![deny(unsafe_code)]

pub mod aux;
pub mod kbwatch;
pub mod middleware;
pub mod scan;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path as AxPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use fpg_config::ServerConfig;
use fpg_engine::EngineInvoker;
use fpg_error::GatewayError;
use fpg_session::SessionStore;
use fpg_telemetry::{Metrics, VersionCell};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub invoker: EngineInvoker,
    pub sessions: Arc<SessionStore>,
    pub metrics: Metrics,
    pub versions: VersionCell,
}

impl AppState {
    /// Assemble state from a validated configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            invoker: EngineInvoker::new(config.clone()),
            sessions: Arc::new(SessionStore::new(&config.temp_dir)),
            metrics: Metrics::new(),
            versions: VersionCell::new(),
            config,
        }
    }
}

/// Response-side wrapper mapping [`GatewayError`] onto plain-text HTTP
/// errors through a single path.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        warn!(code = self.0.code(), status = status.as_u16(), "request failed: {}", self.0);
        (status, format!("{}\n", self.0)).into_response()
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes();
    Router::new()
        .route("/", get(welcome))
        .route("/health-check", get(health_check))
        .route("/metrics/{kind}", get(metrics_report))
        .route("/scan/direct", post(scan::scan_direct))
        .route("/scan/batch", post(scan::scan_batch))
        .route("/file_contents/{md5}", get(aux::file_contents))
        .route("/sbom/attribution", post(aux::sbom_attribution))
        .route("/license/obligations/{license}", get(aux::license_obligations))
        .route("/kb/details", get(kb_details))
        .layer(axum::middleware::from_fn(middleware::correlation))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(middleware::cors_layer())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn welcome(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.inc_endpoint("welcome");
    Json(json!({
        "service": "fingerprint-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.inc_endpoint("health");
    Json(json!({ "alive": true }))
}

async fn kb_details(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.inc_endpoint("kb_details");
    Json(state.versions.kb_details_json())
}

async fn metrics_report(
    AxPath(kind): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.inc_endpoint("metrics");
    let report = match kind.as_str() {
        "requests" => json!({ "requests": state.metrics.requests_snapshot() }),
        "tasks" => json!({ "scans_in_flight": state.metrics.scans_in_flight() }),
        "heap" => heap_report(),
        "all" => {
            let snapshot = state.metrics.snapshot();
            let mut all = serde_json::to_value(&snapshot)
                .unwrap_or_else(|_| json!({}));
            if let Some(map) = all.as_object_mut() {
                map.insert("heap".into(), heap_report());
                map.insert("versions".into(), json!(state.versions.load()));
            }
            all
        }
        other => {
            return Err(GatewayError::BadInput(format!("unknown metrics type: {other}")).into());
        }
    };
    Ok(Json(report))
}

/// Process memory figures from `/proc/self/statm`; zeros where the platform
/// offers no equivalent.
fn heap_report() -> serde_json::Value {
    let (virtual_bytes, resident_bytes) = read_statm().unwrap_or((0, 0));
    json!({
        "virtual_bytes": virtual_bytes,
        "resident_bytes": resident_bytes,
    })
}

#[cfg(target_os = "linux")]
fn read_statm() -> Option<(u64, u64)> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let pages_virtual: u64 = fields.next()?.parse().ok()?;
    let pages_resident: u64 = fields.next()?.parse().ok()?;
    const PAGE_SIZE: u64 = 4096;
    Some((pages_virtual * PAGE_SIZE, pages_resident * PAGE_SIZE))
}

#[cfg(not(target_os = "linux"))]
fn read_statm() -> Option<(u64, u64)> {
    None
}
