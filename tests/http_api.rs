//! HTTP facade tests: a real server on an ephemeral port, a mock relay
//! board behind it, and program files in a temporary directory.

mod support;

use std::net::SocketAddr;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use relaysrv::config::ServerConfig;
use relaysrv::server::{RunResponse, Server};

use support::{spawn_board, MockBoard};

async fn spawn_server(program_dir: &Path) -> SocketAddr {
    let config = ServerConfig {
        program_dir: program_dir.to_path_buf(),
        listen_addr: "127.0.0.1".to_string(),
        listen_port: 0,
        allow_origin: "*".to_string(),
    };
    let server = Server::new(config, CancellationToken::new());
    let state = server.state();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Server::router(state)).await.ok();
    });
    addr
}

fn write_program_file(dir: &Path, name: &str, board: &MockBoard, extra: &str) {
    let body = format!(
        r#"{{"address":"{}",{extra}"commands":[[{{"command":"on","relay":1}}]]}}"#,
        board.address()
    );
    std::fs::write(dir.join(name), body).unwrap();
}

#[tokio::test]
async fn programs_endpoint_lists_registry() {
    let board = spawn_board(2).await;
    let dir = tempfile::TempDir::new().unwrap();
    write_program_file(dir.path(), "door.json", &board, "");

    let addr = spawn_server(dir.path()).await;
    let response = reqwest::get(format!("http://{addr}/programs"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["door"]["address"], board.address());
    assert_eq!(body["door"]["slug"], "door");
}

#[tokio::test]
async fn run_by_slug_executes_and_snapshots_status() {
    let board = spawn_board(2).await;
    let dir = tempfile::TempDir::new().unwrap();
    write_program_file(dir.path(), "door.json", &board, "");

    let addr = spawn_server(dir.path()).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "door")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let run: RunResponse = response.json().await.unwrap();
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].slug, "door");
    assert!(run.results[0].error.is_none());

    // The program switched relay 1 on; the post-run snapshot agrees.
    let states = &run.status[&board.address()];
    assert_eq!(states.coils["1"], true);
    assert_eq!(states.coils["2"], false);
}

#[tokio::test]
async fn run_unknown_slug_is_404() {
    let dir = tempfile::TempDir::new().unwrap();
    let addr = spawn_server(dir.path()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "no-such-program")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], 404);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("no-such-program"));
}

#[tokio::test]
async fn run_with_no_programs_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let addr = spawn_server(dir.path()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn inline_body_runs_before_slugged_programs() {
    let board = spawn_board(2).await;
    let dir = tempfile::TempDir::new().unwrap();
    write_program_file(dir.path(), "door.json", &board, "");

    let addr = spawn_server(dir.path()).await;
    let inline = format!(
        r#"{{"address":"{}","commands":[[{{"command":"off","relay":2}}]]}}"#,
        board.address()
    );

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "door")])
        .header("content-type", "application/json")
        .body(inline)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let run: RunResponse = response.json().await.unwrap();
    assert_eq!(run.results.len(), 2);
    assert_eq!(run.results[0].slug, "[ad-hoc]");
    assert_eq!(run.results[1].slug, "door");
}

#[tokio::test]
async fn malformed_body_is_400() {
    let dir = tempfile::TempDir::new().unwrap();
    let addr = spawn_server(dir.path()).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn failed_program_does_not_stop_siblings() {
    let board = spawn_board(2).await;
    let dir = tempfile::TempDir::new().unwrap();
    write_program_file(dir.path(), "door.json", &board, "");

    let addr = spawn_server(dir.path()).await;
    // The inline program targets a dead port and fails on connect.
    let inline = r#"{"address":"127.0.0.1:1","commands":[[{"command":"on","relay":1}]]}"#;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "door")])
        .body(inline)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let run: RunResponse = response.json().await.unwrap();
    assert_eq!(run.results.len(), 2);
    assert!(run.results[0].error.is_some());
    assert!(run.results[1].error.is_none());

    // Status is collected only for the successful program's device.
    assert_eq!(run.status.len(), 1);
    assert!(run.status.contains_key(&board.address()));
}

#[tokio::test]
async fn reload_picks_up_newer_file() {
    let board = spawn_board(2).await;
    let dir = tempfile::TempDir::new().unwrap();
    write_program_file(dir.path(), "door.json", &board, "");

    let addr = spawn_server(dir.path()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "door")])
        .send()
        .await
        .unwrap();
    let run: RunResponse = response.json().await.unwrap();
    assert_eq!(run.results[0].program.loops, 0);

    // Rewrite the file with a newer mtime and changed contents.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    write_program_file(dir.path(), "door.json", &board, r#""loops":2,"#);

    let response = client
        .post(format!("http://{addr}/run"))
        .query(&[("program", "door")])
        .send()
        .await
        .unwrap();
    let run: RunResponse = response.json().await.unwrap();
    assert_eq!(run.results[0].program.loops, 2);
}

#[tokio::test]
async fn status_endpoint_reads_device() {
    let board = spawn_board(4).await;
    board.set_coils(&[true, false, false, true]);

    let dir = tempfile::TempDir::new().unwrap();
    let addr = spawn_server(dir.path()).await;

    let response = reqwest::get(format!(
        "http://{addr}/status?address={}",
        board.address()
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["coils"]["1"], true);
    assert_eq!(body["coils"]["2"], false);
    assert_eq!(body["coils"]["4"], true);
}

#[tokio::test]
async fn status_endpoint_without_address_is_500() {
    let dir = tempfile::TempDir::new().unwrap();
    let addr = spawn_server(dir.path()).await;

    let response = reqwest::get(format!("http://{addr}/status")).await.unwrap();
    assert_eq!(response.status(), 500);
}
