// src/core/mod.rs

//! Building blocks shared by the control plane: identifiers, errors and metrics.

pub mod conn_id;
pub mod errors;
pub mod metrics;

pub use conn_id::ConnId;
pub use errors::RelayError;
