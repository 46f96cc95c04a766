// src/core/errors.rs

//! Defines the primary error type for the relay control plane.

use std::sync::Arc;
use thiserror::Error;

/// All failures surfaced by the listener, the control-plane actor, the
/// administrative facade and the forwarding hook.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listening socket could not be bound. Fatal at construction.
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The accept loop stopped on an error not caused by shutdown.
    #[error("accept error: {0}")]
    Accept(Arc<std::io::Error>),

    /// The system randomness source is unavailable.
    #[error("random source unavailable: {0}")]
    RandomSource(String),

    /// An administrative request targeted a connection that is not registered.
    #[error("not found")]
    NotFound,

    /// The server began shutting down before the request was answered.
    #[error("terminated")]
    Terminated,

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("invalid forward rule: {0}")]
    InvalidForward(String),

    #[error("forward error: {0}")]
    Forward(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Builds a `Bind` error for the given address.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        RelayError::Bind {
            addr: addr.into(),
            source: Arc::new(source),
        }
    }

    /// Returns true for errors that only mean the peer went away.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, RelayError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Io(Arc::new(e))
    }
}

impl From<getrandom::Error> for RelayError {
    fn from(e: getrandom::Error) -> Self {
        RelayError::RandomSource(e.to_string())
    }
}

// `std::io::Error` is not cloneable, so IO variants share it through an `Arc`.
impl Clone for RelayError {
    fn clone(&self) -> Self {
        match self {
            RelayError::Bind { addr, source } => RelayError::Bind {
                addr: addr.clone(),
                source: Arc::clone(source),
            },
            RelayError::Accept(e) => RelayError::Accept(Arc::clone(e)),
            RelayError::RandomSource(s) => RelayError::RandomSource(s.clone()),
            RelayError::NotFound => RelayError::NotFound,
            RelayError::Terminated => RelayError::Terminated,
            RelayError::Io(e) => RelayError::Io(Arc::clone(e)),
            RelayError::InvalidForward(s) => RelayError::InvalidForward(s.clone()),
            RelayError::Forward(s) => RelayError::Forward(s.clone()),
            RelayError::Config(s) => RelayError::Config(s.clone()),
        }
    }
}

impl PartialEq for RelayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                RelayError::Bind { addr: a1, source: e1 },
                RelayError::Bind { addr: a2, source: e2 },
            ) => a1 == a2 && e1.kind() == e2.kind(),
            (RelayError::Accept(e1), RelayError::Accept(e2)) => e1.kind() == e2.kind(),
            (RelayError::Io(e1), RelayError::Io(e2)) => e1.to_string() == e2.to_string(),
            (RelayError::RandomSource(s1), RelayError::RandomSource(s2)) => s1 == s2,
            (RelayError::InvalidForward(s1), RelayError::InvalidForward(s2)) => s1 == s2,
            (RelayError::Forward(s1), RelayError::Forward(s2)) => s1 == s2,
            (RelayError::Config(s1), RelayError::Config(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

