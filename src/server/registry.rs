// src/server/registry.rs

//! The live set of accepted connections. Owned and mutated by the actor only.

use super::api::{ConnsList, ConnsListItem};
use crate::connection::{CloseNotice, SharedConnState};
use crate::core::conn_id::ConnId;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one registered connection.
#[derive(Debug)]
pub(crate) struct ConnHandle {
    pub(crate) id: ConnId,
    pub(crate) serial: u64,
    pub(crate) remote_addr: SocketAddr,
    pub(crate) state: SharedConnState,
    pub(crate) token: CancellationToken,
}

impl ConnHandle {
    /// Asks the worker to terminate. The worker's own close notice arrives later
    /// and is ignored, since the handle has already been removed.
    pub(crate) fn close(&self) {
        self.token.cancel();
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    conns: HashMap<ConnId, ConnHandle>,
}

impl Registry {
    pub(crate) fn contains(&self, id: &ConnId) -> bool {
        self.conns.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.len()
    }

    pub(crate) fn insert(&mut self, handle: ConnHandle) {
        self.conns.insert(handle.id.clone(), handle);
    }

    /// Removes the entry a close notice refers to. Notices for connections that
    /// were already removed, or for an older holder of the same ID, are ignored.
    pub(crate) fn remove_closed(&mut self, notice: &CloseNotice) -> bool {
        match self.conns.get(&notice.id) {
            Some(handle) if handle.serial == notice.serial => {
                self.conns.remove(&notice.id);
                true
            }
            _ => false,
        }
    }

    /// Removes and closes the connection with the given ID.
    pub(crate) fn kick(&mut self, id: &ConnId) -> bool {
        match self.conns.remove(id) {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> ConnsList {
        let items = self
            .conns
            .values()
            .map(|c| {
                (
                    c.id.clone(),
                    ConnsListItem {
                        remote_addr: c.remote_addr.to_string(),
                        state: c.state.get(),
                    },
                )
            })
            .collect();
        ConnsList { items }
    }
}
