// tests/integration/worker_test.rs

//! The default worker: read deadline, peer disconnect and the on-connect hook.

use super::test_helpers::*;
use mediarelay::connection::{ConnSettings, DefaultWorker, OnConnectHook};
use mediarelay::server::ServerDeps;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

fn default_deps(path_manager: Arc<RecordingPathManager>) -> ServerDeps {
    let mut deps = ServerDeps::with_worker(Arc::new(DefaultWorker));
    deps.path_manager = path_manager;
    deps
}

#[tokio::test]
async fn test_read_timeout_closes_and_detaches() {
    let paths = Arc::new(RecordingPathManager::default());
    let settings = ConnSettings {
        read_timeout: Duration::from_millis(200),
        ..test_settings()
    };
    let server = open_server(default_deps(paths.clone()), settings).await;
    let api = server.api();

    let _client = connect(&server).await;
    let list = wait_for_list(&api, |l| l.items.len() == 1).await;
    let id = list.items.keys().next().unwrap().clone();

    wait_for_list(&api, |l| l.items.is_empty()).await;
    assert_eq!(*paths.detached.lock(), vec![id]);

    server.close().await;
}

#[tokio::test]
async fn test_incoming_bytes_keep_connection_alive() {
    let paths = Arc::new(RecordingPathManager::default());
    let settings = ConnSettings {
        read_timeout: Duration::from_millis(300),
        ..test_settings()
    };
    let server = open_server(default_deps(paths.clone()), settings).await;
    let api = server.api();

    let mut client = connect(&server).await;
    wait_for_list(&api, |l| l.items.len() == 1).await;

    for _ in 0..5 {
        client.write_all(b"\x03").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(api.list_connections().await.unwrap().items.len(), 1);
    assert!(paths.detached.lock().is_empty());

    server.close().await;
}

#[tokio::test]
async fn test_peer_disconnect_removes_connection() {
    let paths = Arc::new(RecordingPathManager::default());
    let server = open_server(default_deps(paths.clone()), test_settings()).await;
    let api = server.api();

    let client = connect(&server).await;
    wait_for_list(&api, |l| l.items.len() == 1).await;

    drop(client);
    wait_for_list(&api, |l| l.items.is_empty()).await;
    assert_eq!(paths.detached.lock().len(), 1);

    server.close().await;
}

#[tokio::test]
async fn test_close_interrupts_default_worker() {
    let paths = Arc::new(RecordingPathManager::default());
    let server = open_server(default_deps(paths.clone()), test_settings()).await;
    let api = server.api();

    let _client = connect(&server).await;
    wait_for_list(&api, |l| l.items.len() == 1).await;

    tokio::time::timeout(WAIT, server.close())
        .await
        .expect("close waited on the read deadline");
    assert_eq!(paths.detached.lock().len(), 1);
}

#[tokio::test]
async fn test_on_connect_hook_sees_relay_port() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("port.txt");
    let settings = ConnSettings {
        run_on_connect: format!("echo $RTSP_PORT > {}", out.display()),
        ..test_settings()
    };
    let server = open_server(
        default_deps(Arc::new(RecordingPathManager::default())),
        settings,
    )
    .await;

    let _client = connect(&server).await;

    let port = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(&out).await {
                if text.ends_with('\n') {
                    return text;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("hook never wrote its output");
    assert_eq!(port.trim(), "8554");

    server.close().await;
}

#[tokio::test]
async fn test_dropped_hook_kills_restarting_command() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("runs.txt");
    let settings = ConnSettings {
        run_on_connect: format!(
            "echo start >> {0}; sleep 0.3; echo end >> {0}",
            out.display()
        ),
        run_on_connect_restart: true,
        ..test_settings()
    };

    let hook = OnConnectHook::start(&settings);
    tokio::time::timeout(WAIT, async {
        while !tokio::fs::read_to_string(&out)
            .await
            .is_ok_and(|text| text.contains("start"))
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hook command never started");

    // Dropped without `stop`, as when a worker future is cancelled mid-run.
    drop(hook);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let text = tokio::fs::read_to_string(&out).await.unwrap();
    assert_eq!(text, "start\n");
}
