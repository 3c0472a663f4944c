//! Integration tests for the device command server over real TCP sockets.

mod common;

use common::{wait_until, LineClient};
use edge_sentry::capture::CaptureState;
use edge_sentry::config::{DeviceConfig, PreviewConfig, RecordingConfig};
use edge_sentry::detection::ActuatorSignal;
use edge_sentry::hardware::capabilities::{HostAction, RawPreviewEncoder};
use edge_sentry::hardware::mock::{MockActuator, MockHostControl};
use edge_sentry::hardware::Frame;
use edge_sentry::network::{CommandHandler, CommandServer};
use edge_sentry::recording::{RawVideoWriterFactory, RecordingManager, RecordingStore};
use serde_json::json;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    state: Arc<CaptureState>,
    actuator: Arc<MockActuator>,
    host: Arc<MockHostControl>,
    shutdown: CancellationToken,
    handle: JoinHandle<edge_sentry::error::AppResult<()>>,
}

/// Command server without a capture loop, so frames are published only by the test.
async fn start_server(dir: &Path, max_workers: usize) -> TestServer {
    let recording = RecordingConfig {
        save_dir: dir.to_path_buf(),
        ..RecordingConfig::default()
    };
    let actuator = Arc::new(MockActuator::new());
    let host = Arc::new(MockHostControl::new());
    let state = Arc::new(CaptureState::new(
        actuator.clone(),
        RecordingManager::new(&recording, Arc::new(RawVideoWriterFactory)),
    ));
    let handler = Arc::new(CommandHandler::new(
        state.clone(),
        RecordingStore::new(dir, "mp4"),
        Arc::new(RawPreviewEncoder),
        PreviewConfig::default(),
    ));
    let device = DeviceConfig {
        max_workers,
        ..DeviceConfig::default()
    };
    let server = CommandServer::bind("127.0.0.1:0", handler, host.clone(), &device)
        .await
        .expect("Failed to bind");
    let addr = server.local_addr().expect("no local address");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));

    TestServer {
        addr,
        state,
        actuator,
        host,
        shutdown,
        handle,
    }
}

#[tokio::test]
async fn test_get_frame_before_publish() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    let response = client.request(r#"{"type":"get_frame"}"#).await;
    assert_eq!(response, json!({"status": "error", "message": "No frame"}));
}

#[tokio::test]
async fn test_get_frame_after_publish() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    server
        .state
        .publish_frame(Arc::new(Frame::filled(640, 480, 3, 1)))
        .await;

    let mut client = LineClient::connect(server.addr).await;
    let response = client.request(r#"{"type":"get_frame"}"#).await;
    assert_eq!(response["status"], "success");
    assert_eq!(response["width"], 200);
    assert_eq!(response["height"], 150);
    assert!(response["frame"].as_str().is_some_and(|f| !f.is_empty()));
}

#[tokio::test]
async fn test_list_recordings_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["2024_01_01.mp4", "2024_01_02.mp4", "2024_01_03.mp4"] {
        std::fs::write(dir.path().join(name), b"clip").unwrap();
    }
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    let response = client.request(r#"{"type":"list_recordings"}"#).await;
    assert_eq!(
        response,
        json!({
            "status": "success",
            "files": ["2024_01_03.mp4", "2024_01_02.mp4", "2024_01_01.mp4"]
        })
    );
}

#[tokio::test]
async fn test_start_then_stop_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    client.send(r#"{"type":"start_tracking"}"#).await;
    client.send(r#"{"type":"stop_tracking"}"#).await;
    assert_eq!(client.recv().await.unwrap()["status"], "success");
    assert_eq!(client.recv().await.unwrap()["status"], "success");

    let status = client.request(r#"{"type":"status"}"#).await;
    assert_eq!(status["tracking_status"], false);
    assert_eq!(server.actuator.current(), ActuatorSignal::None);
}

#[tokio::test]
async fn test_unknown_command_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    let response = client.request(r#"{"type":"launch_rockets"}"#).await;
    assert_eq!(response, json!({"status": "error", "message": "Unknown command"}));

    let response = client.request(r#"{"type":"download_recording"}"#).await;
    assert_eq!(response["status"], "error");

    let status = client.request(r#"{"type":"status"}"#).await;
    assert_eq!(status["status"], "success");
}

#[tokio::test]
async fn test_malformed_json_drops_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    client.send("{this is not json").await;
    assert!(client.recv().await.is_none());

    // the server itself keeps serving
    let mut other = LineClient::connect(server.addr).await;
    assert_eq!(other.request(r#"{"type":"status"}"#).await["status"], "success");
}

#[tokio::test]
async fn test_coalesced_and_split_requests() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    client
        .send_raw(b"{\"type\":\"start_tracking\"}\n{\"type\":\"status\"}\n{\"type\":\"sta")
        .await;
    assert_eq!(client.recv().await.unwrap()["status"], "success");
    assert_eq!(client.recv().await.unwrap()["tracking_status"], true);

    client.send_raw(b"tus\"}\n").await;
    assert_eq!(client.recv().await.unwrap()["tracking_status"], true);
}

#[tokio::test]
async fn test_download_recording() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("2024_05_05_10_00_00.mp4"), b"video-bytes").unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    let response = client
        .request(r#"{"type":"download_recording","filename":"2024_05_05_10_00_00.mp4"}"#)
        .await;
    assert_eq!(response["status"], "success");
    assert_eq!(response["filename"], "2024_05_05_10_00_00.mp4");
    assert_eq!(response["content"], "dmlkZW8tYnl0ZXM=");

    let response = client
        .request(r#"{"type":"download_recording","filename":"../../etc/passwd"}"#)
        .await;
    assert_eq!(response["status"], "error");
}

#[tokio::test]
async fn test_reboot_runs_after_reply() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;

    let response = client.request(r#"{"type":"reboot"}"#).await;
    assert_eq!(response, json!({"status": "success"}));

    let host = server.host.clone();
    wait_until("reboot recorded", Duration::from_secs(2), || {
        let host = host.clone();
        async move { host.actions() == vec![HostAction::Reboot] }
    })
    .await;
}

#[tokio::test]
async fn test_worker_limit_defers_extra_clients() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 1).await;

    let mut first = LineClient::connect(server.addr).await;
    assert_eq!(first.request(r#"{"type":"status"}"#).await["status"], "success");

    // connects at the TCP level but is not served while the only worker is busy
    let mut second = LineClient::connect(server.addr).await;
    second.send(r#"{"type":"status"}"#).await;
    assert!(second.try_recv(Duration::from_millis(300)).await.is_none());

    drop(first);
    let response = second.recv().await.expect("second client never served");
    assert_eq!(response["status"], "success");
}

#[tokio::test]
async fn test_shutdown_joins_connections() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_server(dir.path(), 20).await;
    let mut client = LineClient::connect(server.addr).await;
    assert_eq!(client.request(r#"{"type":"status"}"#).await["status"], "success");

    server.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server did not stop")
        .expect("server task panicked");
    assert!(result.is_ok());
    assert!(client.recv().await.is_none());
}
