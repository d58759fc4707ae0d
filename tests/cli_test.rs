#![cfg(feature = "cli")]

//! End-to-end tests for the `quill` binary.
//!
//! Client tests start a `TestServer` and run the compiled binary against
//! its plaintext listener with `QUILL_*` variables. The serve test runs
//! the binary as the server itself.

mod test_server;

use std::process::Stdio;
use test_server::{TestServer, TestServerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};

async fn server() -> TestServer {
    TestServerBuilder::new("local.domain")
        .account("uid-alice", "alice", "tok-alice")
        .account("uid-bob", "bob", "tok-bob")
        .start()
        .await
}

/// Run the `quill` binary against `server` as the account behind
/// `token`. Returns `(stdout, stderr, success)`.
async fn run_cli(server: &TestServer, token: Option<&str>, args: &[&str]) -> (String, String, bool) {
    let bin = env!("CARGO_BIN_EXE_quill");
    let mut command = tokio::process::Command::new(bin);
    command
        .args(args)
        .env("QUILL_HOST", "127.0.0.1")
        .env("QUILL_PORT", server.plain_port().to_string())
        .env("QUILL_PLAINTEXT", "true")
        .env_remove("QUILL_TOKEN");
    if let Some(token) = token {
        command.env("QUILL_TOKEN", token);
    }
    let output = command.output().await.expect("failed to run quill");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ping() {
    let server = server().await;
    let (stdout, _, success) = run_cli(&server, None, &["ping"]).await;

    assert!(success, "quill ping failed");
    assert!(stdout.contains("OK"));
}

#[tokio::test]
async fn test_ping_json() {
    let server = server().await;
    let (stdout, _, success) = run_cli(&server, None, &["ping", "--json"]).await;

    assert!(success, "quill ping --json failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(parsed["status"], "OK");
    assert!(parsed["server_time"].is_string());
}

#[tokio::test]
async fn test_send_then_fetch() {
    let server = server().await;

    let (stdout, stderr, success) = run_cli(
        &server,
        Some("tok-alice"),
        &[
            "send",
            "--to",
            "bob~local.domain",
            "--subject",
            "Lunch plans",
            "--body",
            "Noon?",
            "--json",
        ],
    )
    .await;
    assert!(success, "quill send failed: {stderr}");
    let sent: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(sent["delivered_to"][0], "bob~local.domain");

    let (stdout, _, success) = run_cli(&server, Some("tok-bob"), &["fetch"]).await;
    assert!(success, "quill fetch failed");
    assert!(stdout.contains("Lunch plans"));
    assert!(stdout.contains("alice~local.domain"));
    assert!(stdout.contains("1 of 1 message(s)"));
}

#[tokio::test]
async fn test_fetch_empty_folder() {
    let server = server().await;
    let (stdout, _, success) =
        run_cli(&server, Some("tok-bob"), &["fetch", "--folder", "sent"]).await;

    assert!(success);
    assert!(stdout.contains("No messages found."));
}

#[tokio::test]
async fn test_fetch_without_token_fails() {
    let server = server().await;
    let (_, stderr, success) = run_cli(&server, None, &["fetch"]).await;

    assert!(!success, "anonymous fetch should fail");
    assert!(stderr.contains("AUTH_FAILED"), "stderr: {stderr}");
}

#[tokio::test]
async fn test_send_requires_recipient() {
    let server = server().await;
    let (_, _, success) = run_cli(&server, Some("tok-alice"), &["send", "--subject", "x"]).await;
    assert!(!success);
}

#[tokio::test]
async fn test_serve_without_domain_fails() {
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_quill"))
        .arg("serve")
        .env_remove("QUILL_DOMAIN")
        .env("QUILL_PLAINTEXT_ADDR", "127.0.0.1:0")
        .output()
        .await
        .expect("failed to run quill serve");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("QUILL_DOMAIN"), "stderr: {stderr}");
}

#[tokio::test]
async fn test_serve_answers_fetch() {
    let accounts = std::env::temp_dir().join(format!("quill-cli-{}.json", uuid::Uuid::new_v4()));
    tokio::fs::write(
        &accounts,
        r#"[{"uid":"uid-ann","quill_mail":"ann~cli.domain","token":"tok-ann"}]"#,
    )
    .await
    .unwrap();

    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_quill"))
        .arg("serve")
        .env("QUILL_DOMAIN", "cli.domain")
        .env("QUILL_PLAINTEXT_ADDR", "127.0.0.1:0")
        .env("QUILL_PEER_INSECURE", "true")
        .env("QUILL_ACCOUNTS_FILE", &accounts)
        .env_remove("QUILL_TLS_CERT")
        .env_remove("QUILL_TLS_KEY")
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start quill serve");

    let stdout = child.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let first = lines.next_line().await.unwrap().expect("listening line");
    let addr = first
        .strip_prefix("listening on ")
        .expect("listening line format");
    let port = addr.rsplit_once(':').unwrap().1;

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_quill"))
        .args(["fetch", "--json"])
        .env("QUILL_HOST", "127.0.0.1")
        .env("QUILL_PORT", port)
        .env("QUILL_PLAINTEXT", "true")
        .env("QUILL_TOKEN", "tok-ann")
        .output()
        .await
        .unwrap();
    assert!(output.status.success());
    let page: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(page["total"], 0);

    child.kill().await.unwrap();
}
