// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scan request orchestration: multipart intake, direct scans, and the
//! chunked-upload batch path.

use crate::{ApiError, AppState};
use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use fpg_error::GatewayError;
use fpg_scan::resolve::ScanFormFields;
use fpg_scan::{parse_wfp, resolve_scan_config, run_scan};
use fpg_session::validate_session_id;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Header carrying the base64 JSON scan settings.
pub const SCAN_SETTINGS_HEADER: &str = "scanoss-scan-settings";
/// Form-field fallback for the same document, raw JSON.
pub const SCAN_SETTINGS_FIELD: &str = "scanoss_scan_settings";
/// Session identifier header for the batch endpoint.
pub const SESSION_ID_HEADER: &str = "session-id";
/// Terminal-chunk marker header for the batch endpoint.
pub const FINAL_CHUNK_HEADER: &str = "x-final-chunk";

/// Collected multipart upload: the payload part plus ordinary text fields.
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    file: Option<Vec<u8>>,
    fields: BTreeMap<String, String>,
}

/// Drain a multipart body. The payload is taken from the `file` part, with
/// `filename` accepted as a fallback name.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadForm, GatewayError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadInput(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" | "filename" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| GatewayError::BadInput(format!("unreadable upload: {e}")))?;
                if form.file.is_none() || name == "file" {
                    form.file = Some(data.to_vec());
                }
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| GatewayError::BadInput(format!("unreadable form field: {e}")))?;
                form.fields.insert(name, text);
            }
        }
    }
    Ok(form)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Merge form fields with their same-named header fallbacks.
fn collect_scan_fields(form: &UploadForm, headers: &HeaderMap) -> ScanFormFields {
    let pick = |key: &str| {
        form.fields
            .get(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .or_else(|| header_string(headers, key))
            .unwrap_or_default()
    };
    ScanFormFields {
        flags: pick("flags"),
        scan_type: pick("type"),
        assets: pick("assets"),
        db_name: pick("db_name"),
        settings_header: header_string(headers, SCAN_SETTINGS_HEADER),
        settings_field: form.fields.get(SCAN_SETTINGS_FIELD).cloned(),
    }
}

/// `POST /scan/direct` — multipart fingerprint upload, merged JSON response.
pub async fn scan_direct(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.inc_endpoint("scan_direct");
    let form = read_upload(&mut multipart).await?;
    let Some(payload) = form.file.as_deref() else {
        return Err(GatewayError::BadInput("no file or filename form part supplied".into()).into());
    };
    if payload.is_empty() {
        return Err(GatewayError::BadInput("empty scan payload".into()).into());
    }
    finish_scan(&state, &headers, &form, payload).await
}

/// `POST /scan/batch` — chunked upload addressed by `Session-Id`; the chunk
/// carrying `X-Final-Chunk: true` triggers the assembled scan.
pub async fn scan_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.inc_endpoint("scan_batch");

    let session_id = header_string(&headers, SESSION_ID_HEADER)
        .ok_or_else(|| GatewayError::BadInput("missing session id".into()))?;
    validate_session_id(&session_id)?;
    let is_final = header_string(&headers, FINAL_CHUNK_HEADER)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let form = read_upload(&mut multipart).await?;
    let Some(chunk) = form.file.as_deref() else {
        return Err(GatewayError::BadInput("no file or filename form part supplied".into()).into());
    };
    if String::from_utf8_lossy(chunk).trim().is_empty() {
        return Err(GatewayError::BadInput("empty scan chunk".into()).into());
    }

    state.sessions.append(&session_id, chunk).await?;
    debug!(session = %session_id, bytes = chunk.len(), is_final, "batch chunk stored");

    if !is_final {
        return Ok((
            StatusCode::ACCEPTED,
            axum::Json(json!({
                "session_id": session_id,
                "status": "chunk accepted",
            })),
        )
            .into_response());
    }

    // Holds the session lock for the duration of the scan; the session file
    // is deleted when `finalized` drops, on success and failure alike.
    let finalized = state.sessions.finalize(&session_id).await?;
    finish_scan(&state, &headers, &form, &finalized.payload).await
}

/// Shared finishing path for direct scans and finalised sessions.
async fn finish_scan(
    state: &AppState,
    headers: &HeaderMap,
    form: &UploadForm,
    payload: &[u8],
) -> Result<Response, ApiError> {
    let started = Instant::now();
    state.metrics.scan_started();
    let result = scan_pipeline(state, headers, form, payload).await;
    state.metrics.scan_finished();

    let (output, unit_count, declared_bytes) = result?;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.record_scan_ms(elapsed_ms);
    if unit_count > 0 {
        state.metrics.record_file_ms(elapsed_ms / unit_count as u64);
        state.metrics.add_files(unit_count as u64);
    }
    state.metrics.add_declared_bytes(declared_bytes);

    info!(
        units = unit_count,
        declared_bytes,
        shards = output.submitted,
        received = output.received,
        elapsed_ms,
        "scan completed"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        output.body,
    )
        .into_response())
}

async fn scan_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    form: &UploadForm,
    payload: &[u8],
) -> Result<(fpg_scan::ScanOutput, usize, u64), ApiError> {
    let text = String::from_utf8_lossy(payload);
    let parsed = parse_wfp(&text, state.config.hpsm_enabled)?;
    let fields = collect_scan_fields(form, headers);
    let cfg = resolve_scan_config(&state.config, &fields)?;

    let result = run_scan(&state.invoker, &parsed, &cfg, &state.config).await;

    if !cfg.sbom_file.is_empty() && state.config.tmp_file_delete {
        let _ = tokio::fs::remove_file(&cfg.sbom_file).await;
    }

    Ok((result?, parsed.unit_count, parsed.declared_bytes))
}
