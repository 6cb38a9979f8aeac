// SPDX-License-Identifier: MIT OR Apache-2.0
//! Handler tests for the gateway HTTP surface, driven through the router
//! with stub engine binaries.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fpg_config::ServerConfig;
use fpg_daemon::{AppState, build_app};
use http_body_util::BodyExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "fpg-test-boundary";

fn write_stub(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("engine.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Stub echoing the `-w` input file back as stdout.
const CAT_WFP: &str = r#"while [ "$1" != "-w" ]; do shift; done
cat "$2""#;

/// Stub emitting a JSON object keyed by the first record's MD5 in its shard.
const KEYED_STUB: &str = r#"while [ "$1" != "-w" ]; do shift; done
key=$(head -n1 "$2" | cut -d, -f1 | sed 's/^file=//')
printf '{"%s":[{"id":"none"}]}' "$key""#;

fn test_state(stub_body: &str, tweak: impl FnOnce(&mut ServerConfig)) -> (tempfile::TempDir, Arc<AppState>) {
    let tmp = tempfile::tempdir().unwrap();
    let stub = write_stub(tmp.path(), stub_body);
    let mut config = ServerConfig {
        binary_path: stub.to_string_lossy().into_owned(),
        temp_dir: tmp.path().to_string_lossy().into_owned(),
        workers: 1,
        scan_timeout_secs: 10,
        ..Default::default()
    };
    tweak(&mut config);
    (tmp, Arc::new(AppState::new(Arc::new(config))))
}

/// Assemble a multipart body from (name, value) parts; payload parts get a
/// filename attribute.
fn multipart_body(parts: &[(&str, &str)]) -> (String, Body) {
    let mut body = String::new();
    for (name, value) in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        if *name == "file" || *name == "filename" {
            body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"scan.wfp\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            ));
        } else {
            body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
            ));
        }
        body.push_str(value);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    (
        format!("multipart/form-data; boundary={BOUNDARY}"),
        Body::from(body),
    )
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

async fn get(state: &Arc<AppState>, uri: &str) -> axum::response::Response {
    build_app(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_scan(
    state: &Arc<AppState>,
    uri: &str,
    parts: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> axum::response::Response {
    let (content_type, body) = multipart_body(parts);
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", content_type);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    build_app(state.clone())
        .oneshot(req.body(body).unwrap())
        .await
        .unwrap()
}

const TWO_RECORDS: &str = "file=a,10,p1\nA\nfile=b,20,p2\nB\n";

// ---------------------------------------------------------------------------
// Operational endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn welcome_reports_service() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["service"], "fingerprint-gateway");
    assert_eq!(json["status"], "operational");
}

#[tokio::test]
async fn health_check_is_alive() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/health-check").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["alive"], true);
}

#[tokio::test]
async fn head_requests_are_served() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = build_app(state.clone())
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/health-check")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.is_empty());
}

#[tokio::test]
async fn metrics_unknown_type_is_rejected() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/metrics/bogus").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_requests_counts_endpoints() {
    let (_tmp, state) = test_state("true", |_| {});
    let _ = get(&state, "/health-check").await;
    let _ = get(&state, "/health-check").await;
    let resp = get(&state, "/metrics/requests").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["requests"]["health"], 2);
}

#[tokio::test]
async fn metrics_all_includes_sections() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/metrics/all").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert!(json.get("requests").is_some());
    assert!(json.get("heap").is_some());
    assert!(json.get("versions").is_some());
}

#[tokio::test]
async fn kb_details_placeholder_before_first_probe() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/kb/details").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["kb_version"]["monthly"], "unknown");
    assert_eq!(json["kb_version"]["daily"], "unknown");
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = build_app(state.clone())
        .oneshot(
            Request::builder()
                .uri("/health-check")
                .header("x-request-id", "corr-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-response-id"], "corr-123");
}

#[tokio::test]
async fn correlation_id_is_generated_when_absent() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = get(&state, "/health-check").await;
    let id = resp.headers()["x-response-id"].to_str().unwrap();
    assert!(!id.is_empty());
}

// ---------------------------------------------------------------------------
// Direct scans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_shot_direct_scan() {
    let (_tmp, state) = test_state(r#"printf '{"a":[{"id":"none"}]}'"#, |s| s.workers = 1);
    let resp = post_scan(&state, "/scan/direct", &[("file", TWO_RECORDS)], &[]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(body_string(resp).await, "{\"a\":[{\"id\":\"none\"}]}\n");
}

#[tokio::test]
async fn multi_worker_scan_merges_shards() {
    let (_tmp, state) = test_state(KEYED_STUB, |s| {
        s.workers = 2;
        s.grouping = 1;
    });
    let resp = post_scan(&state, "/scan/direct", &[("file", TWO_RECORDS)], &[]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(body_string(resp).await.trim()).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 2);
    assert!(obj.contains_key("a") && obj.contains_key("b"));
}

#[tokio::test]
async fn filename_part_is_accepted_as_fallback() {
    let (_tmp, state) = test_state(CAT_WFP, |s| s.workers = 1);
    let resp = post_scan(&state, "/scan/direct", &[("filename", TWO_RECORDS)], &[]).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_payload_part_is_rejected() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = post_scan(&state, "/scan/direct", &[("flags", "8")], &[]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_payload_is_rejected() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = post_scan(&state, "/scan/direct", &[("file", "   \n ")], &[]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn hpsm_payload_rejected_when_disabled() {
    let (_tmp, state) = test_state(CAT_WFP, |s| s.hpsm_enabled = false);
    let payload = "file=a,10,p1\nhpsm=1A2B\n";
    let resp = post_scan(&state, "/scan/direct", &[("file", payload)], &[]).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_string(resp).await.starts_with("ERROR HPSM"));
}

#[tokio::test]
async fn engine_failure_maps_to_server_error() {
    let (_tmp, state) = test_state("exit 1", |s| s.workers = 1);
    let resp = post_scan(&state, "/scan/direct", &[("file", TWO_RECORDS)], &[]).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn match_config_override_rejected_by_policy() {
    let (_tmp, state) = test_state(CAT_WFP, |s| s.match_config_allowed = false);
    let resp = post_scan(
        &state,
        "/scan/direct",
        &[
            ("file", TWO_RECORDS),
            ("scanoss_scan_settings", r#"{"min_snippet_hits":9}"#),
        ],
        &[],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Batch (chunked) scans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chunked_session_scans_on_final_chunk() {
    let (tmp, state) = test_state(CAT_WFP, |s| s.workers = 1);

    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "file=a,10,p1\nA")],
        &[("Session-Id", "S1")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let ack: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(ack["session_id"], "S1");
    assert!(tmp.path().join("S1.wfp").exists());

    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "\nfile=b,20,p2\nB")],
        &[("Session-Id", "S1"), ("X-Final-Chunk", "true")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    // equivalent to a direct scan of the concatenated payload
    assert_eq!(
        body_string(resp).await,
        "file=a,10,p1\nA\nfile=b,20,p2\nB\n"
    );
    assert!(!tmp.path().join("S1.wfp").exists());
}

#[tokio::test]
async fn failed_final_scan_still_deletes_session() {
    let (tmp, state) = test_state("exit 1", |s| s.workers = 1);
    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "file=a,10,p1\nA")],
        &[("Session-Id", "S2")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "file=b,20,p2\nB")],
        &[("Session-Id", "S2"), ("X-Final-Chunk", "true")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!tmp.path().join("S2.wfp").exists());
}

#[tokio::test]
async fn batch_requires_session_header() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = post_scan(&state, "/scan/batch", &[("file", "file=a,10,p1\nA")], &[]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn traversal_session_id_is_rejected() {
    let (tmp, state) = test_state("true", |_| {});
    let before: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "file=a,10,p1\nA")],
        &[("Session-Id", "../etc")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    // nothing new appeared under the temp dir
    let after: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(before.len(), after.len());
}

#[tokio::test]
async fn empty_chunk_is_rejected() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = post_scan(
        &state,
        "/scan/batch",
        &[("file", "  \n ")],
        &[("Session-Id", "S9")],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Auxiliary endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_contents_labels_charset() {
    let (_tmp, state) = test_state("printf 'plain text contents'", |_| {});
    let resp = get(&state, "/file_contents/d41d8cd98f00b204e9800998ecf8427e").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/plain; charset=UTF-8"
    );
    assert_eq!(resp.headers()["x-detected-charset"], "UTF-8");
    assert_eq!(resp.headers()["content-length"], "19");
    assert_eq!(body_string(resp).await, "plain text contents");
}

#[tokio::test]
async fn file_contents_engine_failure_is_server_error() {
    let (_tmp, state) = test_state("exit 2", |_| {});
    let resp = get(&state, "/file_contents/d41d8cd98f00b204e9800998ecf8427e").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn license_obligations_forwards_json() {
    let (_tmp, state) = test_state(r#"printf '{"license":"MIT","obligations":[]}'"#, |_| {});
    let resp = get(&state, "/license/obligations/MIT").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["license"], "MIT");
}

#[tokio::test]
async fn sbom_attribution_round_trips() {
    // attribution stub: cat the SBOM handed via -a
    let (_tmp, state) = test_state(r#"cat "$2""#, |_| {});
    let resp = post_scan(
        &state,
        "/sbom/attribution",
        &[("file", r#"{"components":[{"purl":"pkg:crate/demo"}]}"#)],
        &[],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/plain"
    );
    assert!(body_string(resp).await.contains("pkg:crate/demo"));
}

#[tokio::test]
async fn sbom_attribution_requires_upload() {
    let (_tmp, state) = test_state("true", |_| {});
    let resp = post_scan(&state, "/sbom/attribution", &[("other", "x")], &[]).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
