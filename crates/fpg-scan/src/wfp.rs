// SPDX-License-Identifier: MIT OR Apache-2.0
//! Winnowing Fingerprint payload parsing and validation.
//!
//! A WFP payload is line-oriented text whose logical records begin with a
//! `file=<md5>,<size>,<path>` marker followed by zero or more continuation
//! lines. The marker is the record separator; anything before the first
//! marker is discarded.

use fpg_error::GatewayError;
use tracing::warn;

/// Record separator marker.
pub const FILE_MARKER: &str = "file=";

/// Token indicating High-Precision Snippet Matching data.
pub const HPSM_TOKEN: &str = "hpsm=";

/// A parsed fingerprint payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WfpPayload {
    /// Record bodies with the `file=` marker stripped.
    pub records: Vec<String>,
    /// Number of retained records.
    pub unit_count: usize,
    /// Sum of the sizes claimed in record headers.
    pub declared_bytes: u64,
}

impl WfpPayload {
    /// Rebuild the full payload text, markers re-attached.
    pub fn to_wfp_text(&self) -> String {
        self.records
            .iter()
            .map(|r| format!("{FILE_MARKER}{r}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse and validate a fingerprint payload.
///
/// Fails with a client error when the trimmed payload holds no records, and
/// with [`GatewayError::HpsmForbidden`] when HPSM data is present while the
/// server has HPSM disabled. Malformed record headers are logged and skipped
/// for size accounting but do not fail the request.
pub fn parse_wfp(payload: &str, hpsm_enabled: bool) -> Result<WfpPayload, GatewayError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::BadInput("no scan data supplied".into()));
    }
    if !hpsm_enabled && trimmed.contains(HPSM_TOKEN) {
        return Err(GatewayError::HpsmForbidden);
    }

    let mut records = Vec::new();
    let mut declared_bytes: u64 = 0;
    // The element before the first marker is noise, not a record.
    for raw in trimmed.split(FILE_MARKER).skip(1) {
        let record = raw.trim_end_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        match parse_header_size(record) {
            Some(size) => declared_bytes += size,
            None => {
                let header = record.lines().next().unwrap_or_default();
                warn!(target: "fpg.scan", header, "malformed fingerprint header");
            }
        }
        records.push(record.to_string());
    }

    if records.is_empty() {
        return Err(GatewayError::BadInput("no scan data supplied".into()));
    }

    Ok(WfpPayload {
        unit_count: records.len(),
        declared_bytes,
        records,
    })
}

/// Extract the claimed file size from a record's header line
/// (`<md5>,<size>,<path>`).
fn parse_header_size(record: &str) -> Option<u64> {
    let header = record.lines().next()?;
    let mut parts = header.splitn(3, ',');
    let md5 = parts.next()?;
    let size = parts.next()?;
    let _path = parts.next()?;
    if md5.is_empty() {
        return None;
    }
    size.parse::<u64>().ok()
}
