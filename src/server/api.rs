// src/server/api.rs

//! The administrative facade: typed request/response pairs sent to the actor.
//!
//! The facade holds no lock. Concurrent callers are safe because every request
//! is answered by the single actor task, one at a time.

use crate::connection::ConnState;
use crate::core::RelayError;
use crate::core::conn_id::ConnId;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// One entry of a connection listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnsListItem {
    pub remote_addr: String,
    pub state: ConnState,
}

/// An immutable snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnsList {
    pub items: HashMap<ConnId, ConnsListItem>,
}

pub(crate) struct ConnsListRequest {
    pub(crate) res: oneshot::Sender<ConnsList>,
}

pub(crate) struct ConnsKickRequest {
    pub(crate) id: ConnId,
    pub(crate) res: oneshot::Sender<Result<(), RelayError>>,
}

/// A cheap, cloneable handle for querying and mutating a running server.
#[derive(Clone)]
pub struct ServerApi {
    list_tx: mpsc::Sender<ConnsListRequest>,
    kick_tx: mpsc::Sender<ConnsKickRequest>,
    shutdown: CancellationToken,
}

impl ServerApi {
    pub(crate) fn new(
        list_tx: mpsc::Sender<ConnsListRequest>,
        kick_tx: mpsc::Sender<ConnsKickRequest>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            list_tx,
            kick_tx,
            shutdown,
        }
    }

    /// Lists all live connections.
    pub async fn list_connections(&self) -> Result<ConnsList, RelayError> {
        let (res, rx) = oneshot::channel();
        self.submit(&self.list_tx, ConnsListRequest { res }).await?;
        self.await_response(rx).await
    }

    /// Removes and closes the connection with the given ID.
    pub async fn kick_connection(&self, id: &ConnId) -> Result<(), RelayError> {
        let (res, rx) = oneshot::channel();
        let req = ConnsKickRequest { id: id.clone(), res };
        self.submit(&self.kick_tx, req).await?;
        self.await_response(rx).await?
    }

    async fn submit<T>(&self, tx: &mpsc::Sender<T>, req: T) -> Result<(), RelayError> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(RelayError::Terminated),
            res = tx.send(req) => res.map_err(|_| RelayError::Terminated),
        }
    }

    /// A request accepted into the channel but dropped unanswered at shutdown
    /// resolves as `Terminated` through the closed oneshot.
    async fn await_response<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, RelayError> {
        rx.await.map_err(|_| RelayError::Terminated)
    }
}
