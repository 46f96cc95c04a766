// src/core/conn_id.rs

//! Connection identifiers handed out by the control plane.
//!
//! IDs are exposed through the administrative API, so they are drawn from the
//! system randomness source rather than a counter: a caller must not be able to
//! guess the ID of someone else's connection. Nothing is persisted across restarts.

use super::errors::RelayError;
use serde::Serialize;
use std::fmt;

/// Smallest ID value, the first 9-digit decimal number.
pub const CONN_ID_MIN: u32 = 100_000_000;
/// Modulus applied to the random draw before offsetting by `CONN_ID_MIN`.
const CONN_ID_SPAN: u32 = 899_999_999;

/// An opaque 9-digit decimal connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    /// Folds a raw 32-bit draw into the `[100000000, 999999999]` range.
    pub fn from_random(raw: u32) -> Self {
        let value = raw % CONN_ID_SPAN + CONN_ID_MIN;
        ConnId(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnId {
    fn from(s: &str) -> Self {
        ConnId(s.to_string())
    }
}

impl From<String> for ConnId {
    fn from(s: String) -> Self {
        ConnId(s)
    }
}

/// Where allocation draws its random bytes from.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8; 4]) -> Result<(), RelayError>;
}

/// The operating system's randomness source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill(&self, buf: &mut [u8; 4]) -> Result<(), RelayError> {
        getrandom::fill(buf).map_err(RelayError::from)
    }
}

/// Allocates an ID not currently in use, according to `is_taken`.
///
/// Collisions are redrawn, never accepted. The loop is unbounded; with at most a
/// few thousand live connections the odds of more than one redraw are negligible.
pub fn allocate<F>(is_taken: F) -> Result<ConnId, RelayError>
where
    F: Fn(&ConnId) -> bool,
{
    allocate_with(|buf| SystemRandom.fill(buf), is_taken)
}

/// Same as [`allocate`], reading randomness from `fill`.
pub fn allocate_with<R, F>(mut fill: R, is_taken: F) -> Result<ConnId, RelayError>
where
    R: FnMut(&mut [u8; 4]) -> Result<(), RelayError>,
    F: Fn(&ConnId) -> bool,
{
    loop {
        let mut buf = [0u8; 4];
        fill(&mut buf)?;
        let id = ConnId::from_random(u32::from_le_bytes(buf));
        if !is_taken(&id) {
            return Ok(id);
        }
    }
}
