// src/server/actor.rs

//! The control-plane actor: the only task that touches the connection registry.

use super::api::{ConnsKickRequest, ConnsListRequest};
use super::listener::NewConn;
use super::registry::{ConnHandle, Registry};
use crate::connection::{
    CloseNotice, CloseNotifier, ConnContext, ConnSettings, ConnectionWorker, PathManager,
    SharedConnState,
};
use crate::core::RelayError;
use crate::core::conn_id::{self, RandomSource};
use crate::core::metrics::{self, MetricsSink};
use crate::forward::ForwardTable;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

/// Collaborators and channels the actor is started with.
pub(crate) struct ServerActor {
    pub(crate) settings: Arc<ConnSettings>,
    pub(crate) worker: Arc<dyn ConnectionWorker>,
    pub(crate) path_manager: Arc<dyn PathManager>,
    pub(crate) forwards: Arc<ForwardTable>,
    pub(crate) metrics: Option<Arc<dyn MetricsSink>>,
    pub(crate) random: Arc<dyn RandomSource>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) accept_task: JoinHandle<()>,
    pub(crate) conn_rx: mpsc::Receiver<NewConn>,
    pub(crate) accept_err_rx: oneshot::Receiver<RelayError>,
    pub(crate) close_tx: mpsc::UnboundedSender<CloseNotice>,
    pub(crate) close_rx: mpsc::UnboundedReceiver<CloseNotice>,
    pub(crate) list_rx: mpsc::Receiver<ConnsListRequest>,
    pub(crate) kick_rx: mpsc::Receiver<ConnsKickRequest>,
}

impl ServerActor {
    /// Runs until shutdown or an accept failure, then tears the instance down.
    pub(crate) async fn run(mut self) {
        let mut registry = Registry::default();
        let mut next_serial: u64 = 0;

        loop {
            tokio::select! {
                res = &mut self.accept_err_rx => {
                    // A closed channel means the accept loop stopped for shutdown.
                    if let Ok(e) = res {
                        error!("{}", e);
                    }
                    break;
                }

                Some((socket, addr)) = self.conn_rx.recv() => {
                    let random = self.random.as_ref();
                    let allocated =
                        conn_id::allocate_with(|buf| random.fill(buf), |id| registry.contains(id));
                    let id = match allocated {
                        Ok(id) => id,
                        Err(e) => {
                            error!("Rejecting connection from {}: {}", addr, e);
                            continue;
                        }
                    };
                    next_serial += 1;
                    let handle = ConnHandle {
                        id: id.clone(),
                        serial: next_serial,
                        remote_addr: addr,
                        state: SharedConnState::new(),
                        token: self.shutdown.child_token(),
                    };
                    let ctx = ConnContext {
                        id: id.clone(),
                        remote_addr: addr,
                        socket,
                        settings: self.settings.clone(),
                        token: handle.token.clone(),
                        state: handle.state.clone(),
                        path_manager: self.path_manager.clone(),
                        forwards: self.forwards.clone(),
                        notifier: CloseNotifier::new(id.clone(), next_serial, self.close_tx.clone()),
                    };
                    self.tracker
                        .spawn(self.worker.run(ctx).instrument(tracing::info_span!("conn", id = %id)));
                    registry.insert(handle);
                    metrics::RTMP_CONNS_ACCEPTED_TOTAL.inc();
                    debug!("Registered conn {} from {} ({} live).", id, addr, registry.len());
                }

                Some(notice) = self.close_rx.recv() => {
                    if registry.remove_closed(&notice) {
                        debug!("Conn {} unregistered ({} live).", notice.id, registry.len());
                    }
                }

                Some(req) = self.list_rx.recv() => {
                    if req.res.send(registry.snapshot()).is_err() {
                        debug!("List requester went away before the response.");
                    }
                }

                Some(req) = self.kick_rx.recv() => {
                    let res = if registry.kick(&req.id) {
                        metrics::RTMP_CONNS_KICKED_TOTAL.inc();
                        info!("Conn {} kicked.", req.id);
                        Ok(())
                    } else {
                        Err(RelayError::NotFound)
                    };
                    if req.res.send(res).is_err() {
                        debug!("Kick requester went away before the response.");
                    }
                }

                _ = self.shutdown.cancelled() => break,
            }
        }

        self.shutdown.cancel();

        if let Err(e) = (&mut self.accept_task).await {
            warn!("Accept loop task failed: {e:?}");
        }

        // Sockets and requests still queued are dropped unanswered; callers see `Terminated`.
        self.conn_rx.close();
        let mut dropped = 0;
        while self.conn_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} unregistered connections on shutdown.", dropped);
        }
        self.list_rx.close();
        self.kick_rx.close();

        if let Some(metrics) = &self.metrics {
            metrics.set_server_instance(None);
        }
        debug!("Control plane stopped with {} registered conns.", registry.len());
    }
}
