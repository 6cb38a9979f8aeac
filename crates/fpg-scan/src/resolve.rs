// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request scan configuration resolution.
//!
//! Precedence, later wins: server defaults → form fields (with same-named
//! header fallbacks applied by the HTTP layer) → JSON overrides from the
//! base64 `scanoss-scan-settings` header or its form-field equivalent.
//! Ranking and match-config overrides pass through policy gates before they
//! take effect.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fpg_config::{EffectiveScanConfig, SbomType, ServerConfig};
use fpg_error::GatewayError;
use serde::Deserialize;
use std::io::Write as _;
use tracing::warn;

/// Prefix for SBOM temp files under the temp directory.
pub const SBOM_PREFIX: &str = "sbom";
/// Suffix for SBOM temp files.
pub const SBOM_SUFFIX: &str = ".json";

/// Client-supplied scan fields, collected by the HTTP layer from multipart
/// form values with header fallbacks already applied.
#[derive(Debug, Clone, Default)]
pub struct ScanFormFields {
    /// Engine flags as text; empty means unset.
    pub flags: String,
    /// SBOM handling mode (`identify` / `blacklist`); empty means unset.
    pub scan_type: String,
    /// Inline SBOM content; empty means none supplied.
    pub assets: String,
    /// Knowledge-base name override; empty means unset.
    pub db_name: String,
    /// Base64-encoded JSON settings from the dedicated header.
    pub settings_header: Option<String>,
    /// Raw JSON settings from the dedicated form field.
    pub settings_field: Option<String>,
}

/// JSON override document carried by the settings header/field.
#[derive(Debug, Clone, Default, Deserialize)]
struct ScanSettings {
    ranking_enabled: Option<bool>,
    ranking_threshold: Option<u32>,
    min_snippet_hits: Option<u32>,
    min_snippet_lines: Option<u32>,
    snippet_range_tolerance: Option<u32>,
    honour_file_exts: Option<bool>,
}

impl ScanSettings {
    fn has_ranking(&self) -> bool {
        self.ranking_enabled.is_some() || self.ranking_threshold.is_some()
    }

    fn has_match_config(&self) -> bool {
        self.min_snippet_hits.is_some()
            || self.min_snippet_lines.is_some()
            || self.snippet_range_tolerance.is_some()
            || self.honour_file_exts.is_some()
    }
}

/// Build the effective per-request configuration from server defaults and
/// client input.
///
/// A non-empty `assets` value is written to a scoped `sbom*.json` temp file
/// whose path lands in the returned config; the caller applies the standard
/// temp-file deletion policy once the scan completes.
pub fn resolve_scan_config(
    server: &ServerConfig,
    form: &ScanFormFields,
) -> Result<EffectiveScanConfig, GatewayError> {
    let mut cfg = EffectiveScanConfig::from_defaults(server);

    if !form.db_name.is_empty() {
        cfg.db_name = form.db_name.clone();
    }

    let flags = form.flags.trim();
    if !flags.is_empty() {
        if flags.parse::<i64>().is_ok() {
            cfg.flags = flags.to_string();
        } else {
            warn!(target: "fpg.scan", flags, "ignoring non-integer scan flags");
        }
    }

    let scan_type = form.scan_type.trim();
    let has_sbom = !form.assets.trim().is_empty();
    match scan_type {
        "" | "identify" => cfg.sbom_type = SbomType::Identify,
        "blacklist" => cfg.sbom_type = SbomType::Blacklist,
        other if has_sbom => {
            return Err(GatewayError::BadInput(format!(
                "invalid scan type: {other}"
            )));
        }
        other => {
            warn!(target: "fpg.scan", scan_type = other, "ignoring scan type without an SBOM");
        }
    }

    let settings = parse_settings(form)?;
    if settings.has_match_config() && !server.match_config_allowed {
        return Err(GatewayError::BadInput(
            "match-config overrides are not permitted on this server".into(),
        ));
    }
    if settings.has_ranking() {
        if server.ranking_allowed {
            if let Some(v) = settings.ranking_enabled {
                cfg.ranking_enabled = v;
            }
            if let Some(v) = settings.ranking_threshold {
                cfg.ranking_threshold = v;
            }
        } else {
            warn!(target: "fpg.scan", "ranking overrides not permitted; keeping server defaults");
        }
    }
    if let Some(v) = settings.min_snippet_hits {
        cfg.min_snippet_hits = v;
    }
    if let Some(v) = settings.min_snippet_lines {
        cfg.min_snippet_lines = v;
    }
    if let Some(v) = settings.snippet_range_tolerance {
        cfg.snippet_range_tolerance = v;
    }
    if let Some(v) = settings.honour_file_exts {
        cfg.honour_file_exts = v;
    }

    if has_sbom {
        cfg.sbom_file = write_sbom_file(server, &form.assets)?;
    }

    Ok(cfg)
}

/// Decode the settings document: header (base64 JSON) first, then the form
/// field (raw JSON). Absent both, every override is `None`.
fn parse_settings(form: &ScanFormFields) -> Result<ScanSettings, GatewayError> {
    let json = if let Some(header) = form
        .settings_header
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let decoded = BASE64
            .decode(header)
            .map_err(|e| GatewayError::BadInput(format!("invalid scan settings header: {e}")))?;
        String::from_utf8_lossy(&decoded).into_owned()
    } else if let Some(field) = form
        .settings_field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        field.to_string()
    } else {
        return Ok(ScanSettings::default());
    };

    serde_json::from_str(&json)
        .map_err(|e| GatewayError::BadInput(format!("invalid scan settings: {e}")))
}

fn write_sbom_file(server: &ServerConfig, assets: &str) -> Result<String, GatewayError> {
    let mut file = tempfile::Builder::new()
        .prefix(SBOM_PREFIX)
        .suffix(SBOM_SUFFIX)
        .tempfile_in(&server.temp_dir)
        .map_err(|e| GatewayError::EngineFailed(format!("could not create SBOM file: {e}")))?;
    file.write_all(assets.as_bytes())
        .map_err(|e| GatewayError::EngineFailed(format!("could not write SBOM file: {e}")))?;
    let (_file, path) = file
        .keep()
        .map_err(|e| GatewayError::EngineFailed(format!("could not persist SBOM file: {e}")))?;
    Ok(path.to_string_lossy().into_owned())
}
