// src/server/listener.rs

//! The accept loop: takes sockets off the listener and hands them to the actor.

use crate::core::RelayError;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An accepted socket and its peer address.
pub type NewConn = (TcpStream, SocketAddr);

/// A source of inbound connections. Owned by the accept loop and dropped,
/// closing the underlying socket, when the loop returns.
pub trait Acceptor: Send + 'static {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<NewConn>>;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> BoxFuture<'_, io::Result<NewConn>> {
        TcpListener::accept(self).boxed()
    }
}

/// Accepts until shutdown or the first accept error.
///
/// Each socket is offered to the actor racing the shutdown token; if shutdown
/// wins, the pending send is dropped and the socket with it. An accept error is
/// reported once through `err_tx`. The listener is owned by this task and is
/// closed when it returns.
pub(crate) async fn run_accept_loop<A: Acceptor>(
    mut listener: A,
    conn_tx: mpsc::Sender<NewConn>,
    err_tx: oneshot::Sender<RelayError>,
    shutdown: CancellationToken,
) {
    let err = loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break None,
            res = listener.accept() => res,
        };
        let (socket, addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => break Some(RelayError::Accept(Arc::new(e))),
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Shutting down, closing connection from {} unregistered.", addr);
                break None;
            }
            res = conn_tx.send((socket, addr)) => {
                if res.is_err() {
                    break None;
                }
            }
        }
    };
    drop(listener);
    debug!("Listener closed.");

    if let Some(err) = err {
        // The actor may already be gone; nothing else to report to.
        let _ = err_tx.send(err);
    }
}
