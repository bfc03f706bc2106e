//! System-wide monotonic clock.
//!
//! `CLOCK_MONOTONIC` is shared by every process on the host, so stamps written by a
//! producer process can be compared with reads taken in a consumer process.

use crate::errors::BridgeError;
use nix::time::{ClockId, clock_gettime};
use std::io;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicTime(u64);

impl MonotonicTime {
    pub fn now() -> Result<Self, BridgeError> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).map_err(io::Error::from)?;
        Ok(Self(
            (ts.tv_sec() as u64)
                .saturating_mul(NANOS_PER_SEC)
                .saturating_add(ts.tv_nsec() as u64),
        ))
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Elapsed time since `earlier`, clamped to zero.
    pub fn saturating_duration_since(&self, earlier: MonotonicTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}
