// src/server/mod.rs

//! The RTMP ingest listener and its control plane.
//!
//! `RtmpServer::open` binds the socket and starts two tasks: the accept loop and
//! the actor that owns the connection registry. Workers, close notices and
//! administrative requests all reach the registry through the actor's channels.
//! `RtmpServer::close` cancels the shared token and waits for every task of the
//! instance, workers included, to finish.

mod actor;
mod api;
mod http;
mod listener;
mod registry;

pub use api::{ConnsList, ConnsListItem, ServerApi};
pub use http::{api_router, metrics_router, run_http_server};
pub use listener::{Acceptor, NewConn};

use crate::connection::{ConnSettings, ConnectionWorker, NoopPathManager, PathManager};
use crate::core::RelayError;
use crate::core::conn_id::{RandomSource, SystemRandom};
use crate::core::metrics::MetricsSink;
use crate::forward::ForwardTable;
use actor::ServerActor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, info};

/// Collaborators plugged into a server instance.
pub struct ServerDeps {
    pub worker: Arc<dyn ConnectionWorker>,
    pub path_manager: Arc<dyn PathManager>,
    pub forwards: Arc<ForwardTable>,
    pub metrics: Option<Arc<dyn MetricsSink>>,
    /// Randomness for connection IDs.
    pub random: Arc<dyn RandomSource>,
}

impl ServerDeps {
    /// The given worker with no path tracking, no forwarding and no metrics.
    pub fn with_worker(worker: Arc<dyn ConnectionWorker>) -> Self {
        Self {
            worker,
            path_manager: Arc::new(NoopPathManager),
            forwards: Arc::new(ForwardTable::empty()),
            metrics: None,
            random: Arc::new(SystemRandom),
        }
    }
}

/// A running RTMP listener.
pub struct RtmpServer {
    local_addr: SocketAddr,
    api: ServerApi,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
    span: Span,
}

impl RtmpServer {
    /// Binds `address` and starts the instance. Fails only if binding fails.
    ///
    /// `span` plays the part of the parent logger: every line the instance logs
    /// is emitted inside it.
    pub async fn open(
        address: &str,
        settings: ConnSettings,
        deps: ServerDeps,
        span: Span,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| RelayError::bind(address, e))?;
        let local_addr = listener.local_addr()?;
        Ok(Self::start(listener, local_addr, address, settings, deps, span))
    }

    /// Starts an instance on an already bound source of connections.
    ///
    /// `local_addr` is reported by [`RtmpServer::local_addr`] and in the startup log line.
    pub fn with_acceptor<A: Acceptor>(
        acceptor: A,
        local_addr: SocketAddr,
        settings: ConnSettings,
        deps: ServerDeps,
        span: Span,
    ) -> Self {
        Self::start(
            acceptor,
            local_addr,
            &local_addr.to_string(),
            settings,
            deps,
            span,
        )
    }

    fn start<A: Acceptor>(
        acceptor: A,
        local_addr: SocketAddr,
        address: &str,
        settings: ConnSettings,
        deps: ServerDeps,
        span: Span,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        // Capacity 1 is the closest tokio offers to a rendezvous.
        let (conn_tx, conn_rx) = mpsc::channel(1);
        let (accept_err_tx, accept_err_rx) = oneshot::channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let (list_tx, list_rx) = mpsc::channel(1);
        let (kick_tx, kick_rx) = mpsc::channel(1);

        let api = ServerApi::new(list_tx, kick_tx, shutdown.clone());

        info!(parent: &span, "listener opened on {}", address);

        if let Some(metrics) = &deps.metrics {
            metrics.set_server_instance(Some(api.clone()));
        }

        let accept_task = tracker.spawn(
            listener::run_accept_loop(acceptor, conn_tx, accept_err_tx, shutdown.clone())
                .instrument(span.clone()),
        );

        let actor = ServerActor {
            settings: Arc::new(settings),
            worker: deps.worker,
            path_manager: deps.path_manager,
            forwards: deps.forwards,
            metrics: deps.metrics,
            random: deps.random,
            shutdown: shutdown.clone(),
            tracker: tracker.clone(),
            accept_task,
            conn_rx,
            accept_err_rx,
            close_tx,
            close_rx,
            list_rx,
            kick_rx,
        };
        tracker.spawn(actor.run().instrument(span.clone()));

        Self {
            local_addr,
            api,
            shutdown,
            tracker,
            closed: AtomicBool::new(false),
            span,
        }
    }

    /// The address actually bound, useful when opened on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle for administrative calls.
    pub fn api(&self) -> ServerApi {
        self.api.clone()
    }

    /// True once shutdown has been requested or the accept loop failed.
    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has been requested or the accept loop failed.
    pub async fn closing(&self) {
        self.shutdown.cancelled().await;
    }

    /// Stops the instance and waits until the accept loop, the actor and all
    /// workers have exited. Safe to call repeatedly and concurrently.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(parent: &self.span, "closed");
        }
    }
}

impl Drop for RtmpServer {
    fn drop(&mut self) {
        // Without an explicit close, at least stop the background tasks.
        self.shutdown.cancel();
    }
}
