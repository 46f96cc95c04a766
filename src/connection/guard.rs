// src/connection/guard.rs

//! Defines `CloseNotifier`, an RAII guard that reports a connection's end to the
//! control-plane actor.

use crate::core::conn_id::ConnId;
use tokio::sync::mpsc;
use tracing::debug;

/// The message a worker sends back when it terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub id: ConnId,
    /// Per-instance registration number. Distinguishes two connections that were
    /// handed the same ID at different times.
    pub serial: u64,
}

/// Sends exactly one `CloseNotice` when dropped, including on panic unwind.
///
/// The channel is unbounded so that the notice can be sent from `Drop`; if the
/// actor has already exited the send fails and is ignored.
pub struct CloseNotifier {
    notice: Option<CloseNotice>,
    tx: mpsc::UnboundedSender<CloseNotice>,
}

impl CloseNotifier {
    pub(crate) fn new(id: ConnId, serial: u64, tx: mpsc::UnboundedSender<CloseNotice>) -> Self {
        Self {
            notice: Some(CloseNotice { id, serial }),
            tx,
        }
    }

    /// Sends the notice now instead of waiting for the guard to go out of scope.
    pub fn notify(mut self) {
        self.send();
    }

    fn send(&mut self) {
        if let Some(notice) = self.notice.take() {
            let id = notice.id.clone();
            if self.tx.send(notice).is_err() {
                debug!("Close notice for conn {} dropped, control plane already gone.", id);
            }
        }
    }
}

impl Drop for CloseNotifier {
    fn drop(&mut self) {
        self.send();
    }
}
