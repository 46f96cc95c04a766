// src/connection/state.rs

//! Coarse per-connection state, written by the worker and read by the control plane.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// What a connection is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    #[default]
    Idle,
    Read,
    Publish,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Idle => "idle",
            ConnState::Read => "read",
            ConnState::Publish => "publish",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnState::Read,
            2 => ConnState::Publish,
            _ => ConnState::Idle,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnState::Idle => 0,
            ConnState::Read => 1,
            ConnState::Publish => 2,
        }
    }
}

/// A lock-free state cell shared between a worker and the registry.
///
/// Only the worker calls `set`; the control plane only ever calls `get`.
#[derive(Debug, Clone, Default)]
pub struct SharedConnState(Arc<AtomicU8>);

impl SharedConnState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}
