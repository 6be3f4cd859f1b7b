use crate::base::{Error, Result};
use crate::cmds::SCIP_MD_MAX_SCANS;
use crate::internals::*;
use std::time::Duration;

/// One complete scan as delivered to a [`ScanListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    /// Host epoch time in milliseconds at which the device captured the scan.
    pub timestamp_millis: i64,
    /// Raw range readings in millimeters, one per step, in device step order.
    ///
    /// Values below the configured minimum distance are error codes rather
    /// than distances.
    pub ranges: Vec<u32>,
}

impl Scan {
    /// Creates a scan from a timestamp and its readings.
    pub fn new(timestamp_millis: i64, ranges: Vec<u32>) -> Scan {
        Scan {
            timestamp_millis,
            ranges,
        }
    }

    /// Number of readings in the scan.
    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns `true` if the scan holds no readings.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Outcome of a distance acquisition request, as reported by its status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    /// The request was accepted and data follows.
    Ready,
    /// The device is not ready yet (e.g. the motor is still spinning up). Contains the status code.
    Busy(String),
    /// The request itself was rejected. Contains the status code.
    Error(String),
}

/// Lifecycle of a [`Device`](crate::Device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Nothing has been sent yet.
    Uninitialized,
    /// Leaving time-adjust mode and resetting.
    Resetting,
    /// Checking the sensor self-diagnostic.
    DiagnosticCheck,
    /// Waiting for the motor and measuring the clock offset.
    Calibrating,
    /// Ready to accept commands.
    Idle,
    /// The scanning thread owns the channel.
    Streaming,
    /// The channel has been released.
    Shutdown,
}

/// How the scanning loop requests scans from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Request an unbounded stream once. The clock estimate is refined from
    /// the timestamp of every scan.
    Continuous,
    /// Request `scans_per_request` scans at a time (1 to 99) and re-measure the
    /// clock offset between requests. Scans inside a batch get an interpolated
    /// offset.
    Batched { scans_per_request: u8 },
}

impl Default for StreamMode {
    fn default() -> StreamMode {
        StreamMode::Continuous
    }
}

/// Options for opening a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// Maximum time to wait for one line from the device.
    pub read_timeout: Duration,

    /// Acquisition strategy of the scanning loop.
    pub stream_mode: StreamMode,

    /// Number of single scans sampled to estimate the scan latency. The median is used.
    pub calibration_samples: usize,

    /// Number of single-scan polls before giving up on a device that stays busy.
    pub ready_poll_attempts: u32,

    /// Pause between two busy polls.
    pub ready_poll_interval: Duration,

    /// Self-diagnostic the sensor must report in the `STAT` field of `II`.
    pub expected_diagnostic: String,

    /// Last step requested by every `MD` command. The first step is always 0.
    pub scan_end_step: u16,
}

impl DeviceOptions {
    /// Creates `DeviceOptions` with a different acquisition strategy.
    ///
    /// # Arguments
    ///
    /// * `stream_mode` - How the scanning loop requests scans.
    pub fn with_stream_mode(stream_mode: StreamMode) -> DeviceOptions {
        DeviceOptions {
            stream_mode,
            ..DeviceOptions::default()
        }
    }

    /// Creates `DeviceOptions` for batched acquisition.
    ///
    /// # Arguments
    ///
    /// * `scans_per_request` - Number of scans requested per `MD` command (1 to 99).
    pub fn batched(scans_per_request: u8) -> DeviceOptions {
        DeviceOptions::with_stream_mode(StreamMode::Batched { scans_per_request })
    }

    /// Checks the options before anything is sent to the device.
    pub fn validate(&self) -> Result<()> {
        if let StreamMode::Batched { scans_per_request } = self.stream_mode {
            if scans_per_request == 0 || scans_per_request > SCIP_MD_MAX_SCANS {
                return Err(Error::InvalidConfiguration {
                    description: format!(
                        "scans per request must be within 1..={}, got {}",
                        SCIP_MD_MAX_SCANS, scans_per_request
                    ),
                });
            }
        }
        if self.calibration_samples == 0 {
            return Err(Error::InvalidConfiguration {
                description: "at least one calibration sample is required".to_owned(),
            });
        }
        if self.read_timeout.is_zero() {
            return Err(Error::InvalidConfiguration {
                description: "read timeout must not be zero".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for DeviceOptions {
    fn default() -> DeviceOptions {
        DeviceOptions {
            read_timeout: SCIP_DEFAULT_TIMEOUT,
            stream_mode: StreamMode::default(),
            calibration_samples: SCIP_DEFAULT_CALIBRATION_SAMPLES,
            ready_poll_attempts: SCIP_DEFAULT_READY_POLL_ATTEMPTS,
            ready_poll_interval: SCIP_DEFAULT_READY_POLL_INTERVAL,
            expected_diagnostic: SCIP_EXPECTED_DIAGNOSTIC.to_owned(),
            scan_end_step: SCIP_DEFAULT_SCAN_END_STEP,
        }
    }
}

/// Receives scans from the scanning thread.
///
/// All callbacks run on the scanning thread. A callback that blocks delays
/// every following scan.
///
/// Closures taking a [`Scan`] implement this trait directly:
///
/// ```rust
/// # use hokuyo::{Scan, ScanListener};
/// fn accepts(_listener: impl ScanListener) {}
/// accepts(|scan: Scan| println!("{} readings", scan.len()));
/// ```
pub trait ScanListener: Send + 'static {
    /// Called with every scan that decoded cleanly.
    fn on_new_scan(&mut self, scan: Scan);

    /// Called when a scan was discarded (checksum failure or undecodable
    /// payload). Streaming continues.
    fn on_scan_dropped(&mut self, _error: &Error) {}

    /// Called once when the scanning loop stops on a fatal error.
    fn on_stream_error(&mut self, _error: &Error) {}
}

impl<F> ScanListener for F
where
    F: FnMut(Scan) + Send + 'static,
{
    fn on_new_scan(&mut self, scan: Scan) {
        self(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = DeviceOptions::default();
        assert_eq!(options.stream_mode, StreamMode::Continuous);
        assert_eq!(options.calibration_samples, 11);
        assert_eq!(options.expected_diagnostic, "Sensor works well.");
        assert_eq!(options.read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn option_validation() {
        assert!(DeviceOptions::default().validate().is_ok());
        assert!(DeviceOptions::batched(99).validate().is_ok());
        assert!(matches!(
            DeviceOptions::batched(0).validate(),
            Err(Error::InvalidConfiguration { .. })
        ));
        assert!(DeviceOptions::batched(100).validate().is_err());
        let options = DeviceOptions {
            calibration_samples: 0,
            ..DeviceOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn batched_options() {
        let options = DeviceOptions::batched(10);
        assert_eq!(
            options.stream_mode,
            StreamMode::Batched {
                scans_per_request: 10
            }
        );
        assert_eq!(options.scan_end_step, 768);
    }

    #[test]
    fn closures_are_listeners() {
        let mut received = Vec::new();
        {
            let (tx, rx) = std::sync::mpsc::channel();
            let mut listener = move |scan: Scan| tx.send(scan).unwrap();
            listener.on_new_scan(Scan::new(7, vec![1, 2, 3]));
            listener.on_scan_dropped(&Error::DeviceTimeout);
            received.extend(rx.try_iter());
        }
        assert_eq!(received, vec![Scan::new(7, vec![1, 2, 3])]);
    }
}
