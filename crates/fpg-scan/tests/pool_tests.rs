// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker pool and merger tests against stub engine binaries.

use fpg_config::{EffectiveScanConfig, ServerConfig};
use fpg_engine::EngineInvoker;
use fpg_error::GatewayError;
use fpg_scan::pool::run_scan;
use fpg_scan::wfp::parse_wfp;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TWO_RECORDS: &str = "file=a,10,p1\nA\nfile=b,20,p2\nB\n";

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stub emitting a JSON object keyed by the first record's MD5 in its shard.
const KEYED_STUB: &str = r#"while [ "$1" != "-w" ]; do shift; done
key=$(head -n1 "$2" | cut -d, -f1 | sed 's/^file=//')
printf '{"%s":[{"id":"none"}]}' "$key""#;

fn setup(stub_body: &str, workers: usize, grouping: usize) -> (tempfile::TempDir, EngineInvoker, ServerConfig) {
    let tmp = tempfile::tempdir().unwrap();
    let stub = write_stub(tmp.path(), stub_body);
    let server = ServerConfig {
        binary_path: stub.to_string_lossy().into_owned(),
        temp_dir: tmp.path().to_string_lossy().into_owned(),
        workers,
        grouping,
        scan_timeout_secs: 10,
        ..Default::default()
    };
    let invoker = EngineInvoker::new(Arc::new(server.clone()));
    (tmp, invoker, server)
}

fn cfg(server: &ServerConfig) -> EffectiveScanConfig {
    EffectiveScanConfig::from_defaults(server)
}

#[tokio::test]
async fn single_shot_returns_engine_stdout_verbatim() {
    let (_tmp, invoker, server) = setup(r#"printf '{"a":[{"id":"none"}]}\n'"#, 1, 8);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let out = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap();
    assert_eq!(out.body, "{\"a\":[{\"id\":\"none\"}]}\n");
    assert_eq!(out.submitted, 1);
    assert!(!out.is_partial());
}

#[tokio::test]
async fn multi_worker_merges_all_shards() {
    let (_tmp, invoker, server) = setup(KEYED_STUB, 2, 1);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let out = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap();
    assert_eq!(out.submitted, 2);
    assert_eq!(out.received, 2);
    assert!(out.body.ends_with('\n'));

    // merged body is a single JSON object with both keys, order unspecified
    let json: serde_json::Value = serde_json::from_str(out.body.trim()).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 2);
    assert_eq!(obj["a"][0]["id"], "none");
    assert_eq!(obj["b"][0]["id"], "none");
}

#[tokio::test]
async fn tail_shard_is_submitted() {
    // 3 records with grouping 2: one full shard plus a tail shard
    let payload = parse_wfp(
        "file=a,10,p1\nA\nfile=b,20,p2\nB\nfile=c,30,p3\nC\n",
        true,
    )
    .unwrap();
    let (_tmp, invoker, server) = setup(KEYED_STUB, 4, 2);
    let out = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap();
    assert_eq!(out.submitted, 2);
    let json: serde_json::Value = serde_json::from_str(out.body.trim()).unwrap();
    let obj = json.as_object().unwrap();
    // first shard contributes "a" (first record key), tail shard "c"
    assert!(obj.contains_key("a"));
    assert!(obj.contains_key("c"));
}

#[tokio::test]
async fn all_failed_shards_fail_the_request() {
    let (_tmp, invoker, server) = setup("exit 1", 2, 1);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let err = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::EngineFailed(_)));
}

#[tokio::test]
async fn partial_failure_elides_missing_shards() {
    let stub = r#"while [ "$1" != "-w" ]; do shift; done
key=$(head -n1 "$2" | cut -d, -f1 | sed 's/^file=//')
if [ "$key" = "b" ]; then exit 1; fi
printf '{"%s":[{"id":"none"}]}' "$key""#;
    let (_tmp, invoker, server) = setup(stub, 2, 1);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let out = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap();
    assert_eq!(out.submitted, 2);
    assert_eq!(out.received, 1);
    assert!(out.is_partial());

    let json: serde_json::Value = serde_json::from_str(out.body.trim()).unwrap();
    let obj = json.as_object().unwrap();
    assert!(obj.contains_key("a"));
    assert!(!obj.contains_key("b"));
}

#[tokio::test]
async fn empty_object_shards_merge_to_empty_object() {
    let (_tmp, invoker, server) = setup("printf '{}'", 2, 1);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let out = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap();
    assert_eq!(out.body, "{}\n");
    assert_eq!(out.received, 2);
}

#[tokio::test]
async fn single_shot_engine_failure_maps_to_engine_failed() {
    let (_tmp, invoker, server) = setup("exit 3", 1, 8);
    let payload = parse_wfp(TWO_RECORDS, true).unwrap();
    let err = run_scan(&invoker, &payload, &cfg(&server), &server)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::EngineFailed(_)));
}
