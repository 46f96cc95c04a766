// tests/integration/lifecycle_test.rs

//! Open, close and shutdown draining of a server instance.

use super::test_helpers::*;
use mediarelay::core::RelayError;
use mediarelay::server::{RtmpServer, ServerDeps};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::info_span;

#[tokio::test]
async fn test_open_on_busy_address_fails_with_bind() {
    let (first, _taps, _worker) = open_scripted().await;
    let (worker, _taps2) = ScriptedWorker::new();

    let addr = first.local_addr().to_string();
    let res = RtmpServer::open(
        &addr,
        test_settings(),
        ServerDeps::with_worker(worker),
        info_span!("rtmp"),
    )
    .await;

    match res {
        Err(RelayError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        Err(other) => panic!("expected a bind error, got {other}"),
        Ok(_) => panic!("expected a bind error"),
    }

    first.close().await;
}

#[tokio::test]
async fn test_concurrent_close_then_connect_refused() {
    let (server, mut taps, _worker) = open_scripted().await;
    let addr = server.local_addr();

    let _client = connect(&server).await;
    let tap = next_tap(&mut taps).await;

    tokio::time::timeout(WAIT, async { tokio::join!(server.close(), server.close()) })
        .await
        .expect("close did not finish");

    assert!(server.is_closing());
    assert!(tap.token.is_cancelled());
    assert!(TcpStream::connect(addr).await.is_err());

    // A third close is a no-op.
    server.close().await;
}

#[tokio::test]
async fn test_close_drains_workers_and_terminates_api() {
    let (server, mut taps, worker) = open_scripted().await;
    let api = server.api();

    let mut clients = Vec::new();
    let mut held = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&server).await);
        held.push(next_tap(&mut taps).await);
    }
    wait_for_list(&api, |l| l.items.len() == 3).await;

    server.close().await;

    // Every worker has returned by the time close does.
    assert_eq!(worker.finished.load(Ordering::SeqCst), 3);
    assert!(held.iter().all(|p| p.token.is_cancelled()));

    assert_eq!(api.list_connections().await.unwrap_err(), RelayError::Terminated);
    assert_eq!(
        api.kick_connection(&held[0].id).await.unwrap_err(),
        RelayError::Terminated
    );
}

#[tokio::test]
async fn test_metrics_sink_sees_instance_come_and_go() {
    let (worker, mut taps) = ScriptedWorker::new();
    let metrics = Arc::new(RecordingMetrics::default());
    let mut deps = ServerDeps::with_worker(worker);
    deps.metrics = Some(metrics.clone());

    let server = open_server(deps, test_settings()).await;
    assert_eq!(*metrics.calls.lock(), vec![true]);

    let _client = connect(&server).await;
    let _tap = next_tap(&mut taps).await;

    server.close().await;
    assert_eq!(*metrics.calls.lock(), vec![true, false]);
}

#[tokio::test]
async fn test_many_concurrent_connections_get_distinct_ids() {
    let (server, mut taps, _worker) = open_scripted().await;
    let api = server.api();
    let addr = server.local_addr();

    let connects = (0..50).map(|_| TcpStream::connect(addr));
    let clients: Vec<_> = futures::future::join_all(connects)
        .await
        .into_iter()
        .map(|c| c.expect("connect failed"))
        .collect();

    let mut held = Vec::new();
    for _ in 0..50 {
        held.push(next_tap(&mut taps).await);
    }
    let ids: HashSet<_> = held.iter().map(|p| p.id.clone()).collect();
    assert_eq!(ids.len(), 50);
    assert!(ids.iter().all(|id| id.as_str().len() == 9));

    let list = wait_for_list(&api, |l| l.items.len() == 50).await;
    let listed: HashSet<_> = list.items.keys().cloned().collect();
    assert_eq!(listed, ids);

    drop(clients);
    server.close().await;
}

#[tokio::test]
async fn test_self_closed_connection_leaves_registry() {
    let (server, mut taps, worker) = open_scripted().await;
    let api = server.api();

    let _c1 = connect(&server).await;
    let _c2 = connect(&server).await;
    let p1 = next_tap(&mut taps).await;
    let p2 = next_tap(&mut taps).await;
    wait_for_list(&api, |l| l.items.len() == 2).await;

    let gone = p1.id.clone();
    p1.finish.send(()).unwrap();

    let list = wait_for_list(&api, |l| l.items.len() == 1).await;
    assert!(!list.items.contains_key(&gone));
    assert!(list.items.contains_key(&p2.id));
    assert_eq!(worker.finished.load(Ordering::SeqCst), 1);

    server.close().await;
}

#[tokio::test]
async fn test_kick_racing_self_close_leaves_registry_consistent() {
    let (server, mut taps, _worker) = open_scripted().await;
    let api = server.api();

    let mut clients = Vec::new();
    let mut held = Vec::new();
    for _ in 0..10 {
        clients.push(connect(&server).await);
        held.push(next_tap(&mut taps).await);
    }
    let survivor = held.pop().unwrap();
    wait_for_list(&api, |l| l.items.len() == 10).await;

    let races = held.into_iter().map(|tap| {
        let api = api.clone();
        async move {
            let id = tap.id.clone();
            let _ = tap.finish.send(());
            api.kick_connection(&id).await
        }
    });
    for res in futures::future::join_all(races).await {
        match res {
            Ok(()) | Err(RelayError::NotFound) => {}
            Err(other) => panic!("unexpected kick result: {other}"),
        }
    }

    let list = wait_for_list(&api, |l| l.items.len() == 1).await;
    assert!(list.items.contains_key(&survivor.id));
    assert!(!survivor.token.is_cancelled());

    // Late close notices must not disturb the remaining entry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let list = api.list_connections().await.unwrap();
    assert_eq!(list.items.len(), 1);

    server.close().await;
}

#[tokio::test]
async fn test_calls_racing_close_all_resolve() {
    let (server, mut taps, _worker) = open_scripted().await;
    let api = server.api();

    let mut clients = Vec::new();
    let mut held = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&server).await);
        held.push(next_tap(&mut taps).await);
    }
    wait_for_list(&api, |l| l.items.len() == 3).await;

    let mut calls = Vec::new();
    for i in 0..200 {
        let api = api.clone();
        let id = held[i % held.len()].id.clone();
        calls.push(tokio::spawn(async move {
            if i % 2 == 0 {
                api.list_connections().await.map(|_| ())
            } else {
                api.kick_connection(&id).await
            }
        }));
    }

    let (_, results) = tokio::time::timeout(
        WAIT,
        async { tokio::join!(server.close(), futures::future::join_all(calls)) },
    )
    .await
    .expect("calls racing close did not all resolve");

    for res in results {
        match res.unwrap() {
            Ok(()) | Err(RelayError::NotFound) | Err(RelayError::Terminated) => {}
            Err(other) => panic!("unexpected result: {other}"),
        }
    }
    assert_eq!(api.list_connections().await.unwrap_err(), RelayError::Terminated);
}

#[tokio::test]
async fn test_accept_failure_shuts_instance_down() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fault = CancellationToken::new();
    let (worker, mut taps) = ScriptedWorker::new();

    let server = RtmpServer::with_acceptor(
        FaultyAcceptor {
            listener,
            fault: fault.clone(),
        },
        addr,
        test_settings(),
        ServerDeps::with_worker(worker.clone()),
        info_span!("rtmp"),
    );
    let api = server.api();
    assert_eq!(server.local_addr(), addr);

    let _client = connect(&server).await;
    let tap = next_tap(&mut taps).await;
    wait_for_list(&api, |l| l.items.len() == 1).await;
    assert!(!server.is_closing());

    fault.cancel();
    tokio::time::timeout(WAIT, server.closing())
        .await
        .expect("accept failure did not close the instance");

    assert_eq!(api.list_connections().await.unwrap_err(), RelayError::Terminated);
    server.close().await;
    assert!(tap.token.is_cancelled());
    assert_eq!(worker.finished.load(Ordering::SeqCst), 1);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_random_source_failure_rejects_only_that_connection() {
    let (worker, mut taps) = ScriptedWorker::new();
    let mut deps = ServerDeps::with_worker(worker);
    deps.random = Arc::new(FlakyRandom::failing(1));
    let server = open_server(deps, test_settings()).await;
    let api = server.api();

    // The first socket is dropped unregistered; the peer sees EOF or a reset.
    let mut rejected = connect(&server).await;
    let mut buf = [0u8; 1];
    let res = tokio::time::timeout(WAIT, rejected.read(&mut buf))
        .await
        .expect("rejected socket was never closed");
    assert!(!matches!(res, Ok(n) if n > 0));

    let _accepted = connect(&server).await;
    let tap = next_tap(&mut taps).await;
    let list = wait_for_list(&api, |l| l.items.len() == 1).await;
    assert!(list.items.contains_key(&tap.id));
    assert!(!server.is_closing());

    server.close().await;
}
