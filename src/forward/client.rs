// src/forward/client.rs

//! Outbound publish connections used by the forwarding hook.

use super::codec::{InterleavedCodec, InterleavedFrame};
use crate::core::RelayError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tracing::info;
use url::Url;

const DEFAULT_RTSP_PORT: u16 = 8554;

/// An open outbound connection to one forwarding destination.
#[async_trait]
pub trait ForwardSink: Send {
    async fn write_packet(&mut self, track: usize, payload: Bytes) -> Result<(), RelayError>;
}

/// Opens outbound connections to forwarding destinations.
#[async_trait]
pub trait ForwardConnector: Send + Sync {
    async fn connect(&self, destination: &str) -> Result<Box<dyn ForwardSink>, RelayError>;
}

/// Connects over plain TCP and writes interleaved RTP frames.
///
/// The session handshake is left to the protocol layer; this only carries packets.
#[derive(Debug, Clone)]
pub struct TcpForwardConnector {
    timeout: Duration,
}

impl TcpForwardConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ForwardConnector for TcpForwardConnector {
    async fn connect(&self, destination: &str) -> Result<Box<dyn ForwardSink>, RelayError> {
        let (host, port) = destination_host_port(destination)?;
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| RelayError::Forward(format!("connect to {destination} timed out")))??;
        stream.set_nodelay(true)?;
        info!("Forwarding connection opened to {}", destination);
        Ok(Box::new(TcpForwardSink {
            framed: FramedWrite::new(stream, InterleavedCodec),
            timeout: self.timeout,
        }))
    }
}

struct TcpForwardSink {
    framed: FramedWrite<TcpStream, InterleavedCodec>,
    timeout: Duration,
}

#[async_trait]
impl ForwardSink for TcpForwardSink {
    async fn write_packet(&mut self, track: usize, payload: Bytes) -> Result<(), RelayError> {
        let frame = InterleavedFrame::rtp(track, payload)?;
        tokio::time::timeout(self.timeout, self.framed.send(frame))
            .await
            .map_err(|_| RelayError::Forward("write timed out".into()))?
    }
}

/// Parses `rtsp://host[:port]/path` into a connectable host and port.
pub fn destination_host_port(destination: &str) -> Result<(String, u16), RelayError> {
    let url = Url::parse(destination)
        .map_err(|e| RelayError::InvalidForward(format!("'{destination}': {e}")))?;
    if url.scheme() != "rtsp" {
        return Err(RelayError::InvalidForward(format!(
            "'{destination}': unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| RelayError::InvalidForward(format!("'{destination}': missing host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    Ok((host, url.port().unwrap_or(DEFAULT_RTSP_PORT)))
}
