// src/forward/mod.rs

//! Cross-protocol packet forwarding.
//!
//! Packets received on an ingest stream are relayed to every destination
//! registered for that stream name. The route table is fixed when it is built
//! and handed to the delivery path as an `Arc`; the only mutable part is the
//! lazily opened connection of each destination, which sits behind its own lock.
//!
//! Failures never propagate past the hook: a packet that cannot be relayed is
//! logged and dropped. A failed open leaves the destination closed so a later
//! packet opens it again; a failed write discards the connection the same way.

mod client;
mod codec;

pub use client::{ForwardConnector, ForwardSink, TcpForwardConnector, destination_host_port};
pub use codec::{InterleavedCodec, InterleavedFrame};

use crate::core::RelayError;
use crate::core::metrics;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A `source -> destination` forwarding rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardRule {
    /// Name of the ingest stream, e.g. `live.stream`.
    pub source: String,
    /// Publish URL of the destination, e.g. `rtsp://localhost:8554/live2.stream`.
    pub destination: String,
}

/// One destination and its lazily opened outbound connection.
struct ForwardTarget {
    destination: String,
    sink: Mutex<Option<Box<dyn ForwardSink>>>,
}

impl ForwardTarget {
    /// Opens the connection if needed, then writes. Holding the lock across the
    /// open makes concurrent first packets share a single connection.
    async fn deliver(
        &self,
        connector: &dyn ForwardConnector,
        track: usize,
        payload: Bytes,
    ) -> Result<(), RelayError> {
        let mut slot = self.sink.lock().await;
        if slot.is_none() {
            *slot = Some(connector.connect(&self.destination).await?);
        }
        let Some(sink) = slot.as_mut() else {
            return Err(RelayError::Forward("forward connection missing".into()));
        };
        if let Err(e) = sink.write_packet(track, payload).await {
            *slot = None;
            return Err(e);
        }
        Ok(())
    }
}

/// Immutable mapping from stream name to forwarding destinations.
pub struct ForwardTable {
    routes: HashMap<String, Vec<Arc<ForwardTarget>>>,
    connector: Arc<dyn ForwardConnector>,
}

impl ForwardTable {
    /// Builds the table, rejecting empty names, malformed URLs and duplicate rules.
    pub fn new(
        rules: &[ForwardRule],
        connector: Arc<dyn ForwardConnector>,
    ) -> Result<Self, RelayError> {
        validate_rules(rules)?;
        let mut routes: HashMap<String, Vec<Arc<ForwardTarget>>> = HashMap::new();
        for rule in rules {
            routes
                .entry(rule.source.clone())
                .or_default()
                .push(Arc::new(ForwardTarget {
                    destination: rule.destination.clone(),
                    sink: Mutex::new(None),
                }));
        }
        Ok(Self { routes, connector })
    }

    /// A table with no routes; `on_packet` is then a no-op.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            connector: Arc::new(TcpForwardConnector::new(std::time::Duration::from_secs(10))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Destinations registered for `source`.
    pub fn destinations(&self, source: &str) -> Vec<&str> {
        self.routes
            .get(source)
            .map(|targets| targets.iter().map(|t| t.destination.as_str()).collect())
            .unwrap_or_default()
    }

    /// Relays one packet of `source` to all its destinations. Returns how many
    /// destinations accepted it.
    pub async fn on_packet(&self, source: &str, track: usize, payload: Bytes) -> usize {
        let Some(targets) = self.routes.get(source) else {
            return 0;
        };
        let mut delivered = 0;
        for target in targets {
            match target
                .deliver(self.connector.as_ref(), track, payload.clone())
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::FORWARD_PACKETS_DROPPED_TOTAL.inc();
                    warn!(
                        "Dropping packet of '{}' (track {}) for {}: {}",
                        source, track, target.destination, e
                    );
                }
            }
        }
        debug!(
            "Forwarded packet of '{}' to {}/{} destinations.",
            source,
            delivered,
            targets.len()
        );
        delivered
    }
}

/// Rejects empty source names, malformed destinations and duplicate rules.
pub(crate) fn validate_rules(rules: &[ForwardRule]) -> Result<(), RelayError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.source.trim().is_empty() {
            return Err(RelayError::InvalidForward("source cannot be empty".into()));
        }
        destination_host_port(&rule.destination)?;
        if !seen.insert(rule) {
            return Err(RelayError::InvalidForward(format!(
                "'{}' -> '{}' is already registered",
                rule.source, rule.destination
            )));
        }
    }
    Ok(())
}
