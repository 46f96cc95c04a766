// src/connection/mod.rs

//! The per-connection side of the ingest server: the worker contract the
//! control plane drives, the default worker, and the state it reports back.

mod guard;
mod handler;
mod hook;
mod state;

pub use guard::{CloseNotice, CloseNotifier};
pub use handler::{ConnectionHandler, DefaultWorker};
pub use hook::OnConnectHook;
pub use state::{ConnState, SharedConnState};

use crate::config::Config;
use crate::core::conn_id::ConnId;
use crate::forward::ForwardTable;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Settings shared by every connection of one server instance.
#[derive(Debug, Clone)]
pub struct ConnSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub read_buffer_size: usize,
    /// Address of the RTSP side of the relay, exported to on-connect hooks.
    pub relay_address: String,
    /// Shell command run for the lifetime of each connection. Empty disables it.
    pub run_on_connect: String,
    pub run_on_connect_restart: bool,
}

impl From<&Config> for ConnSettings {
    fn from(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            read_buffer_size: config.read_buffer_size,
            relay_address: config.rtsp_address.clone(),
            run_on_connect: config.run_on_connect.clone(),
            run_on_connect_restart: config.run_on_connect_restart,
        }
    }
}

impl Default for ConnSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Stream-name registry of publishers and readers. Lives outside this crate;
/// workers only tell it when a connection goes away.
pub trait PathManager: Send + Sync {
    fn on_conn_detached(&self, id: &ConnId);
}

/// A path manager that tracks nothing.
#[derive(Debug, Default)]
pub struct NoopPathManager;

impl PathManager for NoopPathManager {
    fn on_conn_detached(&self, _id: &ConnId) {}
}

/// Everything a worker receives for one accepted socket.
pub struct ConnContext {
    pub id: ConnId,
    pub remote_addr: SocketAddr,
    pub socket: TcpStream,
    pub settings: Arc<ConnSettings>,
    /// Cancelled when the connection is kicked or the server shuts down.
    pub token: CancellationToken,
    pub state: SharedConnState,
    pub path_manager: Arc<dyn PathManager>,
    pub forwards: Arc<ForwardTable>,
    pub notifier: CloseNotifier,
}

/// Runs the protocol side of one connection.
///
/// The returned future must finish once `ctx.token` is cancelled, and must
/// drop `ctx.notifier` when it is done (dropping the context does both).
pub trait ConnectionWorker: Send + Sync + 'static {
    fn run(&self, ctx: ConnContext) -> BoxFuture<'static, ()>;
}
