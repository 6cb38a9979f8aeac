// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker fan-out and result merging for scan requests.
//!
//! Shards are fed to a bounded set of worker tasks over a rendezvous-sized
//! request channel; results come back over a channel sized for every possible
//! shard. Workers never fail the request themselves: each failure becomes an
//! empty result and the collector's shard accounting decides the outcome.

use crate::wfp::{FILE_MARKER, WfpPayload};
use fpg_config::{EffectiveScanConfig, ServerConfig};
use fpg_engine::EngineInvoker;
use fpg_error::GatewayError;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, warn};

/// One unit of work for a scan worker.
#[derive(Debug)]
struct EngineJob {
    index: usize,
    shard: String,
}

/// Outcome of a merged scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutput {
    /// Response body: a single JSON object plus trailing newline.
    pub body: String,
    /// Shards submitted to the pool.
    pub submitted: usize,
    /// Shards that produced a usable fragment.
    pub received: usize,
}

impl ScanOutput {
    /// True when at least one submitted shard produced no fragment.
    pub fn is_partial(&self) -> bool {
        self.received < self.submitted
    }
}

/// Group records into shards of at most `grouping`, markers re-attached.
pub fn shard_records(records: &[String], grouping: usize) -> Vec<String> {
    let grouping = grouping.max(1);
    records
        .chunks(grouping)
        .map(|chunk| {
            chunk
                .iter()
                .map(|r| format!("{FILE_MARKER}{r}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

/// Worker count actually spawned: the configured count bounded by the number
/// of full groups in the payload, never less than one.
pub fn effective_workers(workers: usize, unit_count: usize, grouping: usize) -> usize {
    let target_groups = (unit_count / grouping.max(1)).max(1);
    workers.clamp(1, target_groups)
}

/// Strip the outer braces of a JSON object fragment.
fn strip_outer_braces(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('{') && s.ends_with('}') {
        Some(s[1..s.len() - 1].trim())
    } else {
        None
    }
}

/// Run a scan over an already-parsed payload.
///
/// With `workers ≤ 1` the whole payload goes through one engine invocation
/// and the response body is the engine's trimmed stdout plus a newline.
/// Otherwise the payload is sharded and fanned out; the merged body elides
/// failed shards silently as long as at least one shard succeeded.
pub async fn run_scan(
    invoker: &EngineInvoker,
    payload: &WfpPayload,
    cfg: &EffectiveScanConfig,
    server: &ServerConfig,
) -> Result<ScanOutput, GatewayError> {
    if server.workers <= 1 {
        let stdout = invoker
            .scan(&payload.to_wfp_text(), cfg)
            .await
            .map_err(|e| GatewayError::EngineFailed(format!("engine scan failed: {e}")))?;
        return Ok(ScanOutput {
            body: format!("{}\n", stdout.trim()),
            submitted: 1,
            received: 1,
        });
    }

    let shards = shard_records(&payload.records, server.grouping);
    let submitted = shards.len();
    let worker_count = effective_workers(server.workers, payload.unit_count, server.grouping);
    let target_groups = (payload.unit_count / server.grouping.max(1)).max(1);

    // Rendezvous-style request channel; result channel large enough that no
    // worker ever blocks posting a result.
    let (job_tx, job_rx) = mpsc::channel::<EngineJob>(1);
    let (result_tx, mut result_rx) = mpsc::channel::<String>(target_groups + 1);
    let job_rx = Arc::new(AsyncMutex::new(job_rx));

    let mut workers = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let invoker = invoker.clone();
        let cfg = cfg.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some(job) = job else { break };
                let result = match invoker.scan(&job.shard, &cfg).await {
                    Ok(stdout) => stdout,
                    Err(e) => {
                        warn!(
                            target: "fpg.scan",
                            worker = worker_id,
                            shard = job.index,
                            error = %e,
                            "shard scan failed"
                        );
                        String::new()
                    }
                };
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    debug!(
        target: "fpg.scan",
        shards = submitted,
        workers = worker_count,
        units = payload.unit_count,
        "dispatching scan"
    );

    for (index, shard) in shards.into_iter().enumerate() {
        if job_tx.send(EngineJob { index, shard }).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut fragments = Vec::new();
    let mut received = 0usize;
    for _ in 0..submitted {
        let Some(result) = result_rx.recv().await else {
            break;
        };
        let trimmed = result.trim();
        if trimmed.is_empty() {
            continue;
        }
        match strip_outer_braces(trimmed) {
            Some(inner) => {
                received += 1;
                // an empty object contributes no fragment but still counts
                if !inner.is_empty() {
                    fragments.push(inner.to_string());
                }
            }
            None => warn!(target: "fpg.scan", "discarding non-object shard result"),
        }
    }

    for worker in workers {
        let _ = worker.await;
    }

    if received == 0 {
        return Err(GatewayError::EngineFailed(
            "scan engine returned no results".into(),
        ));
    }
    if received < submitted {
        warn!(
            target: "fpg.scan",
            requested = submitted,
            received,
            "merged scan is missing shard results"
        );
    }

    Ok(ScanOutput {
        body: format!("{{{}}}\n", fragments.join(",")),
        submitted,
        received,
    })
}
