// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide metrics for the fingerprint gateway.
//!
//! Small, infrequently written shared state behind a single mutex: monotonic
//! per-endpoint request counters, scan and per-file latency series with
//! percentile summaries, upload accounting, and the knowledge-base / engine
//! version cell refreshed by the background probe.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Histogram summaries
// ---------------------------------------------------------------------------

/// Aggregate view of one latency series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Number of observations.
    pub count: usize,
    /// Mean in milliseconds.
    pub mean_ms: f64,
    /// Median (p50) in milliseconds.
    pub p50_ms: f64,
    /// 99th percentile in milliseconds.
    pub p99_ms: f64,
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

fn summarise(series: &[u64]) -> HistogramSummary {
    if series.is_empty() {
        return HistogramSummary::default();
    }
    let mut sorted: Vec<u64> = series.to_vec();
    sorted.sort_unstable();
    let total: u64 = sorted.iter().sum();
    HistogramSummary {
        count: sorted.len(),
        mean_ms: total as f64 / sorted.len() as f64,
        p50_ms: percentile(&sorted, 50.0),
        p99_ms: percentile(&sorted, 99.0),
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MetricsInner {
    endpoints: BTreeMap<String, u64>,
    scan_ms: Vec<u64>,
    file_ms: Vec<u64>,
    files_total: u64,
    declared_bytes_total: u64,
    scans_in_flight: u64,
}

/// Point-in-time snapshot of everything the metrics endpoint exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Monotonic per-endpoint request counters (deterministic ordering).
    pub requests: BTreeMap<String, u64>,
    /// Scan request latency summary.
    pub scan_latency: HistogramSummary,
    /// Per-file latency summary.
    pub file_latency: HistogramSummary,
    /// Total fingerprint units accepted.
    pub files_total: u64,
    /// Total client-declared bytes accepted.
    pub declared_bytes_total: u64,
    /// Scans currently executing.
    pub scans_in_flight: u64,
}

/// Thread-safe metrics registry. Clone freely; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<Mutex<MetricsInner>>,
}

impl Metrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the request counter for an endpoint.
    pub fn inc_endpoint(&self, name: &str) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        *inner.endpoints.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Record one whole-scan latency observation.
    pub fn record_scan_ms(&self, ms: u64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.scan_ms.push(ms);
    }

    /// Record an averaged per-file latency observation.
    pub fn record_file_ms(&self, ms: u64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.file_ms.push(ms);
    }

    /// Add accepted fingerprint units.
    pub fn add_files(&self, n: u64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.files_total += n;
    }

    /// Add client-declared upload bytes.
    pub fn add_declared_bytes(&self, n: u64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.declared_bytes_total += n;
    }

    /// Mark a scan as started; pairs with [`Metrics::scan_finished`].
    pub fn scan_started(&self) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.scans_in_flight += 1;
    }

    /// Mark a scan as finished.
    pub fn scan_finished(&self) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.scans_in_flight = inner.scans_in_flight.saturating_sub(1);
    }

    /// Per-endpoint counters only.
    pub fn requests_snapshot(&self) -> BTreeMap<String, u64> {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner.endpoints.clone()
    }

    /// Scans currently executing.
    pub fn scans_in_flight(&self) -> u64 {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner.scans_in_flight
    }

    /// Full snapshot with latency summaries.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            requests: inner.endpoints.clone(),
            scan_latency: summarise(&inner.scan_ms),
            file_latency: summarise(&inner.file_ms),
            files_total: inner.files_total,
            declared_bytes_total: inner.declared_bytes_total,
            scans_in_flight: inner.scans_in_flight,
        }
    }
}

// ---------------------------------------------------------------------------
// Version cell
// ---------------------------------------------------------------------------

/// Placeholder reported until the first successful probe.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Knowledge-base and engine version strings captured from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Monthly knowledge-base version.
    pub kb_monthly: String,
    /// Daily knowledge-base version.
    pub kb_daily: String,
    /// Engine version string.
    pub engine: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            kb_monthly: UNKNOWN_VERSION.into(),
            kb_daily: UNKNOWN_VERSION.into(),
            engine: UNKNOWN_VERSION.into(),
        }
    }
}

/// Process-wide cell holding the last captured [`VersionInfo`].
#[derive(Debug, Clone, Default)]
pub struct VersionCell {
    inner: Arc<Mutex<VersionInfo>>,
}

impl VersionCell {
    /// Create a cell holding placeholder values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored versions.
    pub fn store(&self, info: VersionInfo) {
        let mut inner = self.inner.lock().expect("version lock poisoned");
        *inner = info;
    }

    /// Current versions (placeholders before the first probe).
    pub fn load(&self) -> VersionInfo {
        let inner = self.inner.lock().expect("version lock poisoned");
        inner.clone()
    }

    /// JSON document served by the KB details endpoint.
    pub fn kb_details_json(&self) -> serde_json::Value {
        let info = self.load();
        serde_json::json!({
            "kb_version": {
                "monthly": info.kb_monthly,
                "daily": info.kb_daily,
            }
        })
    }
}
