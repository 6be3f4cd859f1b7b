use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// A duplex byte stream a SCIP 2.0 device can be driven over.
///
/// Implemented for every `Read + Write + Send` type, so serial ports, sockets and
/// simulated devices can all be handed to [`Device`](crate::Device) directly.
pub trait Transport: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send + ?Sized> Transport for T {}

/// Source of host epoch time used to bracket device requests.
///
/// Only the instants directly around a write or a read are sampled, so a fake
/// implementation fully determines the calibration results in tests.
pub trait EpochClock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl EpochClock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
