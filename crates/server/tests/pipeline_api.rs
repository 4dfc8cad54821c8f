//! End-to-end pipeline traversal through the HTTP API.
//!
//! Plays the roles of crawler, downloader/remuxer, uploader, and
//! verifier against a live server, with dispatch sweeps triggered
//! manually through the orchestrator API.

use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::{NamedTempFile, TempDir};
use tokio::time::sleep;

fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config with the orchestrator loops disabled so the test controls
/// every sweep.
fn manual_config(port: u16, db_path: &str) -> String {
    format!(
        r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[orchestrator]
enabled = false
"#,
        port, db_path
    )
}

async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_conveyor"))
        .env("CONVEYOR_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn start_test_server() -> (u16, tokio::process::Child, TempDir) {
    let port = get_available_port();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("conveyor.db");

    let config_content = manual_config(port, db_path.to_str().unwrap());
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let server = spawn_server(temp_file.path()).await;
    // The config is read during startup, so the temp file can be
    // dropped once the server answers health checks.
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    (port, server, temp_dir)
}

fn api(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}/api/v1{}", port, path)
}

async fn tick(client: &Client, port: u16) -> Value {
    client
        .post(api(port, "/orchestrator/tick"))
        .send()
        .await
        .expect("tick failed")
        .json()
        .await
        .expect("tick response not JSON")
}

#[tokio::test]
async fn test_full_pipeline_traversal() {
    let (port, mut server, _temp_dir) = start_test_server().await;
    let client = Client::new();

    // Provision an upload account.
    let response = client
        .post(api(port, "/accounts"))
        .json(&json!({"email": "uploader@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let account: Value = response.json().await.unwrap();
    let account_id = account["account"]["id"].as_str().unwrap().to_string();

    // Crawler registers a discovered video.
    let response = client
        .post(api(port, "/videos"))
        .json(&json!({
            "title": "Some Feature",
            "source_url": "magnet:?xt=urn:btih:deadbeef"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    let task_id = created["task"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["task"]["state"], "pending");

    // Sweep: pending -> downloading.
    let stats = tick(&client, port).await;
    assert_eq!(stats["dispatched_download"], 1);

    // Downloader/remuxer reports its output.
    let response = client
        .post(api(port, &format!("/tasks/{}/report", task_id)))
        .json(&json!({
            "event": "remux_complete",
            "local_path": "/data/out/feature.mp4",
            "size_bytes": 2_000_000
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["state"], "remuxing");

    // Sweep: remuxing (ready) -> uploading, with the account leased.
    let stats = tick(&client, port).await;
    assert_eq!(stats["dispatched_upload"], 1);

    let task: Value = client
        .get(api(port, &format!("/tasks/{}", task_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["state"], "uploading");
    assert_eq!(task["account_id"], account_id.as_str());

    // A long-running upload can extend its lease while it holds it.
    let response = client
        .post(api(port, &format!("/accounts/{}/extend", account_id)))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Uploader reports the share reference.
    let response = client
        .post(api(port, &format!("/tasks/{}/report", task_id)))
        .json(&json!({
            "event": "upload_complete",
            "share_url": "https://share.example.com/feature"
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Sweep: verify notification published.
    let stats = tick(&client, port).await;
    assert_eq!(stats["dispatched_verify"], 1);

    // Verifier confirms.
    let response = client
        .post(api(port, &format!("/tasks/{}/report", task_id)))
        .json(&json!({"event": "verified"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["state"], "complete");

    // The upload charged the account and released the lease.
    let accounts: Value = client
        .get(api(port, "/accounts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let account = &accounts[0];
    assert_eq!(account["daily_uploaded_bytes"], 2_000_000);
    assert!(account["lease_expires_at"].is_null());

    // With the lease gone, extending is a conflict.
    let response = client
        .post(api(port, &format!("/accounts/{}/extend", account_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Orchestrator status reflects the terminal state.
    let status: Value = client
        .get(api(port, "/orchestrator/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["complete_count"], 1);
    assert_eq!(status["pending_count"], 0);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_upload_dispatch_defers_without_accounts() {
    let (port, mut server, _temp_dir) = start_test_server().await;
    let client = Client::new();

    let created: Value = client
        .post(api(port, "/videos"))
        .json(&json!({"title": "Orphaned", "source_url": "magnet:?xt=urn:btih:0"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = created["task"]["id"].as_str().unwrap().to_string();

    tick(&client, port).await;
    client
        .post(api(port, &format!("/tasks/{}/report", task_id)))
        .json(&json!({
            "event": "remux_complete",
            "local_path": "/data/out/orphaned.mp4",
            "size_bytes": 1000
        }))
        .send()
        .await
        .unwrap();

    // No accounts: the task defers in place, retries untouched.
    let stats = tick(&client, port).await;
    assert_eq!(stats["dispatched_upload"], 0);
    assert_eq!(stats["deferred_no_account"], 1);

    let task: Value = client
        .get(api(port, &format!("/tasks/{}", task_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(task["state"], "remuxing");
    assert_eq!(task["retries"], 0);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_fail_task_externally() {
    let (port, mut server, _temp_dir) = start_test_server().await;
    let client = Client::new();

    let created: Value = client
        .post(api(port, "/videos"))
        .json(&json!({"title": "Doomed", "source_url": "magnet:?xt=urn:btih:1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = created["task"]["id"].as_str().unwrap().to_string();
    let video_id = created["video"]["id"].as_str().unwrap().to_string();

    let response = client
        .post(api(port, &format!("/tasks/{}/fail", task_id)))
        .json(&json!({"reason": "operator cancelled"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["state"], "failed");
    assert_eq!(task["error_message"], "operator cancelled");

    // Terminal states reject further failure writes.
    let response = client
        .post(api(port, &format!("/tasks/{}/fail", task_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // The video mirrors the failure.
    let video: Value = client
        .get(api(port, &format!("/videos/{}", video_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(video["status"], "failed");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_invalid_stage_report_is_conflict() {
    let (port, mut server, _temp_dir) = start_test_server().await;
    let client = Client::new();

    let created: Value = client
        .post(api(port, "/videos"))
        .json(&json!({"title": "Early", "source_url": "magnet:?xt=urn:btih:2"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = created["task"]["id"].as_str().unwrap().to_string();

    // Reporting an upload on a pending task skips the pipeline order.
    let response = client
        .post(api(port, &format!("/tasks/{}/report", task_id)))
        .json(&json!({"event": "upload_complete", "share_url": "https://x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    server.kill().await.ok();
}
