// SPDX-License-Identifier: MIT OR Apache-2.0
//! Background knowledge-base probe.
//!
//! Every half hour a synthetic, known non-matching fingerprint record is
//! pushed through the engine; the response carries the knowledge-base and
//! engine versions, which refresh the process-wide version cell. Each
//! refresh re-checks the engine version against the configured minimum.

use crate::AppState;
use fpg_config::EffectiveScanConfig;
use fpg_engine::version::{VersionVerdict, check_minimum};
use fpg_error::GatewayError;
use fpg_telemetry::VersionInfo;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Interval between probes; the first fires at startup.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// A fingerprint that matches nothing in any knowledge base.
const PROBE_RECORD: &str = "file=99ccc26a19deeb8b9d15346087365b11,158,probe/handshake.c";

/// Spawn the periodic probe task.
pub fn spawn(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = probe_once(&state).await {
                warn!(target: "fpg.kbwatch", error = %e, "knowledge-base probe failed");
            }
        }
    })
}

/// Run one probe cycle: invoke, extract, store, check.
pub async fn probe_once(state: &AppState) -> Result<(), GatewayError> {
    let cfg = EffectiveScanConfig::from_defaults(&state.config);
    let stdout = state
        .invoker
        .scan(PROBE_RECORD, &cfg)
        .await
        .map_err(|e| GatewayError::EngineTransient(format!("probe invocation failed: {e}")))?;

    let json: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| GatewayError::EngineTransient(format!("probe response is not JSON: {e}")))?;
    let info = extract_versions(&json).ok_or_else(|| {
        GatewayError::EngineTransient("probe response carries no version data".into())
    })?;

    match check_minimum(&info.engine, &state.config.engine_min_version) {
        VersionVerdict::BelowMinimum => error!(
            target: "fpg.kbwatch",
            engine = %info.engine,
            minimum = %state.config.engine_min_version,
            "engine version is below the supported minimum"
        ),
        VersionVerdict::Satisfactory => info!(
            target: "fpg.kbwatch",
            engine = %info.engine,
            kb_monthly = %info.kb_monthly,
            kb_daily = %info.kb_daily,
            "knowledge-base versions refreshed"
        ),
        VersionVerdict::Unparseable => warn!(
            target: "fpg.kbwatch",
            engine = %info.engine,
            "engine version could not be compared"
        ),
    }

    state.versions.store(info);
    Ok(())
}

/// Pull `server.version` and `server.kb_version.{monthly,daily}` out of any
/// element of the scan response object.
pub fn extract_versions(json: &Value) -> Option<VersionInfo> {
    for value in json.as_object()?.values() {
        let Some(elements) = value.as_array() else {
            continue;
        };
        for element in elements {
            let Some(server) = element.get("server") else {
                continue;
            };
            let engine = server.get("version").and_then(Value::as_str);
            let kb = server.get("kb_version");
            let monthly = kb.and_then(|k| k.get("monthly")).and_then(Value::as_str);
            let daily = kb.and_then(|k| k.get("daily")).and_then(Value::as_str);
            if let (Some(engine), Some(monthly), Some(daily)) = (engine, monthly, daily) {
                return Some(VersionInfo {
                    kb_monthly: monthly.to_owned(),
                    kb_daily: daily.to_owned(),
                    engine: engine.to_owned(),
                });
            }
        }
    }
    None
}
