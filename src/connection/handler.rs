// src/connection/handler.rs

//! Defines the `ConnectionHandler`, the default worker for an accepted socket.

use super::hook::OnConnectHook;
use super::{CloseNotifier, ConnContext, ConnSettings, ConnectionWorker, PathManager};
use crate::core::RelayError;
use crate::core::conn_id::ConnId;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The worker used when no protocol layer is plugged in.
#[derive(Debug, Default)]
pub struct DefaultWorker;

impl ConnectionWorker for DefaultWorker {
    fn run(&self, ctx: ConnContext) -> BoxFuture<'static, ()> {
        async move {
            let addr = ctx.remote_addr;
            let handler = ConnectionHandler::new(ctx);
            if let Err(e) = handler.run().await {
                warn!("Connection from {} terminated unexpectedly: {}", addr, e);
            }
        }
        .boxed()
    }
}

/// Keeps one connection alive until the peer leaves, the read deadline
/// passes, or the control plane cancels it.
///
/// Payload is read and discarded; framing and demux belong to the protocol layer.
pub struct ConnectionHandler {
    id: ConnId,
    addr: SocketAddr,
    socket: TcpStream,
    settings: Arc<ConnSettings>,
    token: CancellationToken,
    path_manager: Arc<dyn PathManager>,
    notifier: CloseNotifier,
    bytes_received: u64,
}

impl ConnectionHandler {
    pub fn new(ctx: ConnContext) -> Self {
        Self {
            id: ctx.id,
            addr: ctx.remote_addr,
            socket: ctx.socket,
            settings: ctx.settings,
            token: ctx.token,
            path_manager: ctx.path_manager,
            notifier: ctx.notifier,
            bytes_received: 0,
        }
    }

    /// The main loop for the connection. Always reports the close, whatever the outcome.
    pub async fn run(mut self) -> Result<(), RelayError> {
        info!("Conn {} opened from {}.", self.id, self.addr);
        let hook = (!self.settings.run_on_connect.is_empty())
            .then(|| OnConnectHook::start(&self.settings));

        let outcome = self.read_loop().await;

        if tokio::time::timeout(self.settings.write_timeout, self.socket.shutdown())
            .await
            .is_err()
        {
            debug!("Conn {}: socket shutdown timed out.", self.id);
        }
        if let Some(hook) = hook {
            hook.stop().await;
        }

        self.path_manager.on_conn_detached(&self.id);
        info!(
            "Conn {} closed ({} bytes received).",
            self.id, self.bytes_received
        );
        self.notifier.notify();
        outcome
    }

    async fn read_loop(&mut self) -> Result<(), RelayError> {
        let mut buf = vec![0u8; self.settings.read_buffer_size.max(1)];
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("Conn {} received close signal.", self.id);
                    return Ok(());
                }
                res = tokio::time::timeout(self.settings.read_timeout, self.socket.read(&mut buf)) => {
                    match res {
                        Err(_) => {
                            warn!("Conn {}: no data within {:?}, closing.", self.id, self.settings.read_timeout);
                            return Ok(());
                        }
                        Ok(Ok(0)) => {
                            debug!("Conn {} closed by peer.", self.id);
                            return Ok(());
                        }
                        Ok(Ok(n)) => {
                            self.bytes_received += n as u64;
                        }
                        Ok(Err(e)) => {
                            let e = RelayError::from(e);
                            if e.is_normal_disconnect() {
                                debug!("Conn {} closed by peer: {}", self.id, e);
                                return Ok(());
                            }
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
