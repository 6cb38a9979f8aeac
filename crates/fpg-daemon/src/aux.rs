// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auxiliary engine endpoints: file contents, license obligations, SBOM
//! attribution. Single-shot invocations with a short fixed deadline.

use crate::{ApiError, AppState};
use axum::{
    extract::{Multipart, Path as AxPath, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use fpg_error::GatewayError;
use fpg_scan::detect_charset;
use std::io::Write as _;
use std::sync::Arc;

/// Prefix for attribution SBOM temp files.
pub const SBOM_ATTR_PREFIX: &str = "sbom-attr";

/// `GET /file_contents/{md5}` — raw file bytes with a detected charset label.
pub async fn file_contents(
    State(state): State<Arc<AppState>>,
    AxPath(md5): AxPath<String>,
) -> Result<Response, ApiError> {
    state.metrics.inc_endpoint("file_contents");
    let md5 = md5.trim();
    if md5.is_empty() {
        return Err(GatewayError::BadInput("missing file MD5".into()).into());
    }

    let bytes = state.invoker.file_contents(md5).await.map_err(|e| {
        GatewayError::EngineTransient(format!("could not retrieve file contents: {e}"))
    })?;

    let charset = detect_charset(&bytes);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), format!("text/plain; charset={charset}")),
            ("x-detected-charset", charset.to_string()),
            (header::CONTENT_LENGTH.as_str(), bytes.len().to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /license/obligations/{license}` — obligations JSON from the engine.
pub async fn license_obligations(
    State(state): State<Arc<AppState>>,
    AxPath(license): AxPath<String>,
) -> Result<Response, ApiError> {
    state.metrics.inc_endpoint("license_obligations");
    let license = license.trim();
    if license.is_empty() {
        return Err(GatewayError::BadInput("missing license name".into()).into());
    }

    let body = state.invoker.license_obligations(license).await.map_err(|e| {
        GatewayError::EngineTransient(format!("could not retrieve license obligations: {e}"))
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// `POST /sbom/attribution` — attribution notices for an uploaded SBOM.
pub async fn sbom_attribution(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    state.metrics.inc_endpoint("sbom_attribution");

    let mut sbom: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadInput(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "file" || name == "filename" {
            let data = field
                .bytes()
                .await
                .map_err(|e| GatewayError::BadInput(format!("unreadable upload: {e}")))?;
            if sbom.is_none() || name == "file" {
                sbom = Some(data.to_vec());
            }
        }
    }
    let sbom = sbom
        .filter(|b| !b.is_empty())
        .ok_or_else(|| GatewayError::BadInput("no SBOM supplied".into()))?;

    let sbom_path = write_attr_sbom(&state, &sbom)?;
    let result = state.invoker.sbom_attribution(&sbom_path).await;
    if state.config.tmp_file_delete {
        let _ = tokio::fs::remove_file(&sbom_path).await;
    }
    let body = result.map_err(|e| {
        GatewayError::EngineTransient(format!("could not produce attribution notices: {e}"))
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        body,
    )
        .into_response())
}

fn write_attr_sbom(state: &AppState, sbom: &[u8]) -> Result<std::path::PathBuf, GatewayError> {
    let mut file = tempfile::Builder::new()
        .prefix(SBOM_ATTR_PREFIX)
        .suffix(".json")
        .tempfile_in(&state.config.temp_dir)
        .map_err(|e| GatewayError::EngineTransient(format!("could not create SBOM file: {e}")))?;
    file.write_all(sbom)
        .map_err(|e| GatewayError::EngineTransient(format!("could not write SBOM file: {e}")))?;
    let (_file, path) = file
        .keep()
        .map_err(|e| GatewayError::EngineTransient(format!("could not persist SBOM file: {e}")))?;
    Ok(path)
}
