// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the fingerprint gateway.
//!
//! [`ServerConfig`] is the startup record the rest of the gateway consumes:
//! worker counts, sharding, engine binary location, temp directory, policy
//! gates and scan tuning defaults. It loads from an optional JSON file with
//! `FPG_*` environment overrides applied on top.
//!
//! [`EffectiveScanConfig`] is the immutable per-request tuning record derived
//! from the server defaults plus client input; the resolver that builds it
//! lives in `fpg-scan`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors & warnings
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found or unreadable.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid JSON.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A per-invocation scan timeout larger than the advisory threshold.
    LargeScanTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// Match-config overrides are open to clients; a reminder that clients
    /// can then degrade engine accuracy.
    MatchConfigOpen,
    /// No default knowledge-base name is set; the engine's built-in default
    /// applies.
    NoKbName,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeScanTimeout { secs } => {
                write!(f, "scan timeout is unusually large ({secs}s)")
            }
            ConfigWarning::MatchConfigOpen => {
                write!(f, "match-config overrides are enabled for clients")
            }
            ConfigWarning::NoKbName => write!(f, "no default knowledge-base name configured"),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Threshold above which a scan timeout generates a warning.
const LARGE_SCAN_TIMEOUT_SECS: u64 = 600;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "FPG_";

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Startup configuration for the gateway.
///
/// All fields are defaulted so a missing or partial config file still yields
/// a runnable service pointed at a local engine binary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub bind_addr: String,
    /// Concurrent engine workers per scan request; 1 selects the single-shot path.
    pub workers: usize,
    /// Fingerprint records per shard.
    pub grouping: usize,
    /// Hard deadline for one engine invocation, in seconds.
    pub scan_timeout_secs: u64,
    /// Engine executable path or name.
    pub binary_path: String,
    /// Writable directory for shard, SBOM, and session files.
    pub temp_dir: String,
    /// Preserve a copy of the input shard when the engine fails on it.
    pub keep_failed_wfps: bool,
    /// Delete shard and SBOM temp files after use.
    pub tmp_file_delete: bool,
    /// Accept payloads carrying HPSM fingerprints.
    pub hpsm_enabled: bool,
    /// Pass `-d` to the engine.
    pub scan_debug: bool,
    /// Server-forced engine flags; a non-zero value overrides request flags.
    pub scan_flags: i64,
    /// Default knowledge-base name (`-n`); empty uses the engine default.
    pub scan_kb_name: String,
    /// Allow clients to override ranking settings.
    pub ranking_allowed: bool,
    /// Allow clients to override match-config settings.
    pub match_config_allowed: bool,
    /// Default ranking toggle.
    pub ranking_enabled: bool,
    /// Default ranking threshold (percent).
    pub ranking_threshold: u32,
    /// Default minimum snippet hits; 0 leaves the engine default.
    pub min_snippet_hits: u32,
    /// Default minimum snippet lines; 0 leaves the engine default.
    pub min_snippet_lines: u32,
    /// Default snippet range tolerance; 0 leaves the engine default.
    pub snippet_range_tolerance: u32,
    /// Default for honouring file extensions during matching.
    pub honour_file_exts: bool,
    /// Minimum engine version the gateway is known to work with.
    pub engine_min_version: String,
    /// Upload body cap in mebibytes.
    pub max_upload_mb: usize,
    /// Exported as `SCANOSS_API_URL` for the engine; opaque to the gateway.
    pub api_url: String,
    /// Exported as `SCANOSS_FILE_CONTENTS_URL`; opaque to the gateway.
    pub file_contents_url: String,
    /// Exported as `SCANOSS_FILE_CONTENTS`; opaque to the gateway.
    pub file_contents: String,
    /// Exported as `SCANOSS_API_KEY`; opaque to the gateway.
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5443".into(),
            workers: 4,
            grouping: 8,
            scan_timeout_secs: 120,
            binary_path: "scanoss".into(),
            temp_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            keep_failed_wfps: false,
            tmp_file_delete: true,
            hpsm_enabled: true,
            scan_debug: false,
            scan_flags: 0,
            scan_kb_name: String::new(),
            ranking_allowed: true,
            match_config_allowed: false,
            ranking_enabled: false,
            ranking_threshold: 75,
            min_snippet_hits: 0,
            min_snippet_lines: 0,
            snippet_range_tolerance: 0,
            honour_file_exts: false,
            engine_min_version: "5.2.0".into(),
            max_upload_mb: 1024,
            api_url: String::new(),
            file_contents_url: String::new(),
            file_contents: String::new(),
            api_key: String::new(),
        }
    }
}

impl ServerConfig {
    /// The per-invocation engine deadline as a [`std::time::Duration`].
    pub fn scan_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scan_timeout_secs)
    }

    /// Upload cap in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Environment variables handed to the engine process. Opaque to the
    /// gateway; empty values are not exported.
    pub fn engine_env(&self) -> Vec<(&'static str, &str)> {
        let mut env = Vec::new();
        if !self.api_url.is_empty() {
            env.push(("SCANOSS_API_URL", self.api_url.as_str()));
        }
        if !self.file_contents_url.is_empty() {
            env.push(("SCANOSS_FILE_CONTENTS_URL", self.file_contents_url.as_str()));
        }
        if !self.file_contents.is_empty() {
            env.push(("SCANOSS_FILE_CONTENTS", self.file_contents.as_str()));
        }
        if !self.api_key.is_empty() {
            env.push(("SCANOSS_API_KEY", self.api_key.as_str()));
        }
        env
    }

    /// Semantic validation. Returns advisory warnings on success.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        if self.workers == 0 {
            reasons.push("workers must be at least 1".to_string());
        }
        if self.grouping == 0 {
            reasons.push("grouping must be at least 1".to_string());
        }
        if self.scan_timeout_secs == 0 {
            reasons.push("scan_timeout_secs must be at least 1".to_string());
        }
        if self.binary_path.trim().is_empty() {
            reasons.push("binary_path must not be empty".to_string());
        }
        if self.temp_dir.trim().is_empty() {
            reasons.push("temp_dir must not be empty".to_string());
        }
        if self.max_upload_mb == 0 {
            reasons.push("max_upload_mb must be at least 1".to_string());
        }
        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        let mut warnings = Vec::new();
        if self.scan_timeout_secs > LARGE_SCAN_TIMEOUT_SECS {
            warnings.push(ConfigWarning::LargeScanTimeout {
                secs: self.scan_timeout_secs,
            });
        }
        if self.match_config_allowed {
            warnings.push(ConfigWarning::MatchConfigOpen);
        }
        if self.scan_kb_name.is_empty() {
            warnings.push(ConfigWarning::NoKbName);
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`ServerConfig`] from an optional JSON file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`ServerConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_json(&content)?
        }
        None => ServerConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a JSON string into a [`ServerConfig`].
pub fn parse_json(content: &str) -> Result<ServerConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply `FPG_*` environment overrides to `config`.
///
/// Unparseable values are ignored; the existing field value wins.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_env_lookup(config, |key| std::env::var(key).ok());
}

/// Override application against an arbitrary variable source; the seam the
/// environment reader and the tests share.
pub fn apply_env_lookup(
    config: &mut ServerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty());
    fn parse_bool(v: &str) -> Option<bool> {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    if let Some(v) = var("BIND_ADDR") {
        config.bind_addr = v;
    }
    if let Some(v) = var("WORKERS").and_then(|v| v.parse().ok()) {
        config.workers = v;
    }
    if let Some(v) = var("GROUPING").and_then(|v| v.parse().ok()) {
        config.grouping = v;
    }
    if let Some(v) = var("SCAN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.scan_timeout_secs = v;
    }
    if let Some(v) = var("BINARY_PATH") {
        config.binary_path = v;
    }
    if let Some(v) = var("TEMP_DIR") {
        config.temp_dir = v;
    }
    if let Some(v) = var("KEEP_FAILED_WFPS").and_then(|v| parse_bool(&v)) {
        config.keep_failed_wfps = v;
    }
    if let Some(v) = var("TMP_FILE_DELETE").and_then(|v| parse_bool(&v)) {
        config.tmp_file_delete = v;
    }
    if let Some(v) = var("HPSM_ENABLED").and_then(|v| parse_bool(&v)) {
        config.hpsm_enabled = v;
    }
    if let Some(v) = var("SCAN_FLAGS").and_then(|v| v.parse().ok()) {
        config.scan_flags = v;
    }
    if let Some(v) = var("SCAN_KB_NAME") {
        config.scan_kb_name = v;
    }
    if let Some(v) = var("ENGINE_MIN_VERSION") {
        config.engine_min_version = v;
    }
    if let Some(v) = var("API_URL") {
        config.api_url = v;
    }
    if let Some(v) = var("API_KEY") {
        config.api_key = v;
    }
}

// ---------------------------------------------------------------------------
// EffectiveScanConfig
// ---------------------------------------------------------------------------

/// How a supplied SBOM constrains matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SbomType {
    /// Restrict matches to components in the SBOM (`-s`).
    Identify,
    /// Exclude components in the SBOM (`-b`).
    Blacklist,
}

impl SbomType {
    /// Engine flag for this SBOM mode.
    pub fn engine_flag(&self) -> &'static str {
        match self {
            Self::Identify => "-s",
            Self::Blacklist => "-b",
        }
    }
}

/// Immutable per-request scan tuning, derived from server defaults, form
/// fields, headers, and JSON overrides subject to policy gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveScanConfig {
    /// Engine flags as supplied by the request; empty or `"0"` means none.
    pub flags: String,
    /// Knowledge-base name; request value wins over the server default.
    pub db_name: String,
    /// SBOM handling mode; only meaningful when `sbom_file` is non-empty.
    pub sbom_type: SbomType,
    /// Path to the SBOM temp file, or empty when no SBOM was supplied.
    pub sbom_file: String,
    /// Ranking toggle.
    pub ranking_enabled: bool,
    /// Ranking threshold (percent).
    pub ranking_threshold: u32,
    /// Minimum snippet hits; 0 leaves the engine default.
    pub min_snippet_hits: u32,
    /// Minimum snippet lines; 0 leaves the engine default.
    pub min_snippet_lines: u32,
    /// Snippet range tolerance; 0 leaves the engine default.
    pub snippet_range_tolerance: u32,
    /// Honour file extensions during matching.
    pub honour_file_exts: bool,
}

impl EffectiveScanConfig {
    /// Seed an effective config from the server defaults; the resolver then
    /// layers request input on top.
    pub fn from_defaults(server: &ServerConfig) -> Self {
        Self {
            flags: String::new(),
            db_name: server.scan_kb_name.clone(),
            sbom_type: SbomType::Identify,
            sbom_file: String::new(),
            ranking_enabled: server.ranking_enabled,
            ranking_threshold: server.ranking_threshold,
            min_snippet_hits: server.min_snippet_hits,
            min_snippet_lines: server.min_snippet_lines,
            snippet_range_tolerance: server.snippet_range_tolerance,
            honour_file_exts: server.honour_file_exts,
        }
    }
}
