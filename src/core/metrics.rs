// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the relay control plane.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use crate::connection::ConnState;
use crate::server::ServerApi;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{Counter, GaugeVec, TextEncoder, register_counter, register_gauge_vec};
use tracing::{debug, error};

lazy_static! {
    /// Live RTMP connections, labeled by coarse state. Refreshed on every scrape.
    pub static ref RTMP_CONNS: GaugeVec =
        register_gauge_vec!("mediarelay_rtmp_conns", "Number of live RTMP connections, labeled by state.", &["state"]).unwrap();

    /// The total number of connections registered since startup.
    pub static ref RTMP_CONNS_ACCEPTED_TOTAL: Counter =
        register_counter!("mediarelay_rtmp_conns_accepted_total", "Total number of RTMP connections accepted.").unwrap();
    /// The total number of connections terminated through the admin API.
    pub static ref RTMP_CONNS_KICKED_TOTAL: Counter =
        register_counter!("mediarelay_rtmp_conns_kicked_total", "Total number of RTMP connections kicked.").unwrap();
    /// The total number of forwarded packets dropped on open or write failures.
    pub static ref FORWARD_PACKETS_DROPPED_TOTAL: Counter =
        register_counter!("mediarelay_forward_packets_dropped_total", "Total number of forwarded packets dropped.").unwrap();
}

/// Receives server instances as they come and go.
pub trait MetricsSink: Send + Sync {
    /// Called with `Some` once the server is running and with `None` once it has stopped.
    fn set_server_instance(&self, server: Option<ServerApi>);
}

/// The process-wide metrics collaborator.
#[derive(Default)]
pub struct Metrics {
    rtmp_server: Mutex<Option<ServerApi>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_server(&self) -> bool {
        self.rtmp_server.lock().is_some()
    }

    /// Refreshes the connection gauges and encodes every registered metric.
    pub async fn gather(&self) -> String {
        let server = self.rtmp_server.lock().clone();
        let mut counts = [
            (ConnState::Idle, 0u32),
            (ConnState::Read, 0),
            (ConnState::Publish, 0),
        ];
        if let Some(api) = server {
            match api.list_connections().await {
                Ok(list) => {
                    for item in list.items.values() {
                        if let Some((_, n)) = counts.iter_mut().find(|(s, _)| *s == item.state) {
                            *n += 1;
                        }
                    }
                }
                Err(e) => debug!("Skipping RTMP connection gauges: {}", e),
            }
        }
        for (state, n) in counts {
            RTMP_CONNS.with_label_values(&[state.as_str()]).set(n as f64);
        }
        gather_metrics()
    }
}

impl MetricsSink for Metrics {
    fn set_server_instance(&self, server: Option<ServerApi>) {
        *self.rtmp_server.lock() = server;
    }
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| {
            error!("Failed to encode metrics: {}", e);
            String::new()
        })
}
