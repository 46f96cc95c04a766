// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod forward;
pub mod server;

// Re-export
pub use crate::core::{ConnId, RelayError};
pub use crate::server::{RtmpServer, ServerApi};
