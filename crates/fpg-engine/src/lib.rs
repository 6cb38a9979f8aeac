// SPDX-License-Identifier: MIT OR Apache-2.0
//! Child-process invocation of the code-matching engine.
//!
//! Each scan invocation writes its shard to a scoped `finger*.wfp` temp file,
//! builds a fixed-order argument vector, and runs the engine binary under a
//! hard deadline. Auxiliary single-shot calls (file contents, license
//! obligations, SBOM attribution) share the same execution path with a short
//! fixed deadline.

#![deny(unsafe_code)]

pub mod version;

use fpg_config::{EffectiveScanConfig, ServerConfig};
use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

/// Prefix for shard temp files under the configured temp directory.
pub const WFP_PREFIX: &str = "finger";
/// Suffix for shard temp files.
pub const WFP_SUFFIX: &str = ".wfp";
/// Deadline for auxiliary single-shot engine calls.
pub const AUX_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from engine process management.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create engine input file: {0}")]
    TempCreate(#[source] std::io::Error),

    #[error("failed to write engine input file: {0}")]
    TempWrite(#[source] std::io::Error),

    #[error("failed to spawn engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for engine: {0}")]
    Wait(#[source] std::io::Error),

    #[error("engine exceeded deadline of {secs}s")]
    Timeout { secs: u64 },

    #[error("engine exited with code {code}")]
    Exec { code: i32, stdout: String },
}

/// Invokes the engine binary with per-call temp files and deadlines.
///
/// Cheap to clone; workers hold their own handle to the shared server
/// configuration.
#[derive(Debug, Clone)]
pub struct EngineInvoker {
    server: Arc<ServerConfig>,
}

impl EngineInvoker {
    pub fn new(server: Arc<ServerConfig>) -> Self {
        Self { server }
    }

    /// Build the scan argument vector in its fixed order.
    ///
    /// `-d` (debug) → `-n<db>` → `-F <flags>` → `-s|-b <sbom>` → `-w <wfp>`.
    /// Server-forced flags override the request's; a request flag value of
    /// `"0"` or empty means none.
    pub fn build_scan_args(&self, cfg: &EffectiveScanConfig, wfp_path: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.server.scan_debug {
            args.push("-d".to_string());
        }
        let db_name = if cfg.db_name.is_empty() {
            &self.server.scan_kb_name
        } else {
            &cfg.db_name
        };
        if !db_name.is_empty() {
            args.push(format!("-n{db_name}"));
        }
        if self.server.scan_flags != 0 {
            args.push("-F".to_string());
            args.push(self.server.scan_flags.to_string());
        } else if !cfg.flags.is_empty() && cfg.flags != "0" {
            args.push("-F".to_string());
            args.push(cfg.flags.clone());
        }
        if !cfg.sbom_file.is_empty() {
            args.push(cfg.sbom_type.engine_flag().to_string());
            args.push(cfg.sbom_file.clone());
        }
        args.push("-w".to_string());
        args.push(wfp_path.to_string_lossy().into_owned());
        args
    }

    /// Run the engine over one shard of fingerprint records.
    ///
    /// The shard is written to a scoped temp file which is cleaned up
    /// according to the `tmp_file_delete` policy on every outcome; failed
    /// inputs are preserved as `failed-finger*.wfp` siblings when
    /// `keep_failed_wfps` is set.
    pub async fn scan(&self, shard: &str, cfg: &EffectiveScanConfig) -> Result<String, EngineError> {
        let mut wfp = Builder::new()
            .prefix(WFP_PREFIX)
            .suffix(WFP_SUFFIX)
            .tempfile_in(&self.server.temp_dir)
            .map_err(EngineError::TempCreate)?;
        wfp.write_all(shard.as_bytes())
            .map_err(EngineError::TempWrite)?;
        wfp.write_all(b"\n").map_err(EngineError::TempWrite)?;

        let args = self.build_scan_args(cfg, wfp.path());
        let result = self.exec(&args, self.server.scan_timeout()).await;

        if result.is_err() && self.server.keep_failed_wfps {
            self.preserve_failed_input(&wfp);
        }
        if !self.server.tmp_file_delete {
            // Detach so the input survives for inspection.
            let _ = wfp.keep();
        }

        let stdout = result?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Retrieve file contents by MD5 (`-k`). Raw bytes; callers decide on
    /// charset handling.
    pub async fn file_contents(&self, md5: &str) -> Result<Vec<u8>, EngineError> {
        self.exec(&["-k".to_string(), md5.to_string()], AUX_TIMEOUT)
            .await
    }

    /// Retrieve license obligations (`-l`).
    pub async fn license_obligations(&self, license: &str) -> Result<String, EngineError> {
        let out = self
            .exec(&["-l".to_string(), license.to_string()], AUX_TIMEOUT)
            .await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Produce an attribution notice for an SBOM file on disk (`-a`).
    pub async fn sbom_attribution(&self, sbom_path: &Path) -> Result<String, EngineError> {
        let out = self
            .exec(
                &[
                    "-a".to_string(),
                    sbom_path.to_string_lossy().into_owned(),
                ],
                AUX_TIMEOUT,
            )
            .await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn exec(&self, args: &[String], deadline: Duration) -> Result<Vec<u8>, EngineError> {
        debug!(target: "fpg.engine", binary = %self.server.binary_path, ?args, "invoking engine");

        let mut cmd = Command::new(&self.server.binary_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in self.server.engine_env() {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(EngineError::Spawn)?;

        let output = match time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(EngineError::Wait(e)),
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                warn!(target: "fpg.engine", secs = deadline.as_secs(), "engine timed out");
                return Err(EngineError::Timeout {
                    secs: deadline.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                target: "fpg.engine",
                code = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim_end(),
                "engine exited with failure"
            );
            return Err(EngineError::Exec {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        Ok(output.stdout)
    }

    fn preserve_failed_input(&self, wfp: &NamedTempFile) {
        let Some(name) = wfp.path().file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let dest = Path::new(&self.server.temp_dir).join(format!("failed-{name}"));
        if let Err(e) = std::fs::copy(wfp.path(), &dest) {
            warn!(target: "fpg.engine", error = %e, dest = %dest.display(), "could not preserve failed input");
        } else {
            warn!(target: "fpg.engine", dest = %dest.display(), "preserved failed engine input");
        }
    }
}
