use std::time::Duration;

/// Default timeout for a single line to arrive from the device.
pub const SCIP_DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default capacity of the line buffer. Comfortably holds one scan frame.
pub const SCIP_DEFAULT_BUFFER_SIZE: usize = 8192;

/// Self-diagnostic the `II` command reports for a healthy sensor.
pub const SCIP_EXPECTED_DIAGNOSTIC: &str = "Sensor works well.";

/// Number of single scans whose latency is sampled during calibration.
pub const SCIP_DEFAULT_CALIBRATION_SAMPLES: usize = 11;

/// After this many drift samples the drift average stops growing its memory.
pub const SCIP_DELTA_OFFSET_MAX_WEIGHT_COUNT: u32 = 10;

/// Default number of single-scan polls while waiting for the motor to spin up.
pub const SCIP_DEFAULT_READY_POLL_ATTEMPTS: u32 = 50;

/// Default pause between two readiness polls.
pub const SCIP_DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default last step requested by `MD`. Covers the whole URG-04LX range.
pub const SCIP_DEFAULT_SCAN_END_STEP: u16 = 768;

/// Characters per range reading in `MD` frames.
pub const SCIP_RANGE_ENCODING_CHARS: usize = 3;

/// Period of the 24-bit device millisecond clock.
pub const SCIP_DEVICE_CLOCK_MODULUS: i64 = 1 << 24;

/// Characters of the device timestamp line of a scan frame.
pub const SCIP_TIMESTAMP_ENCODING_CHARS: usize = 4;

/// Lines that may be skipped while waiting for the `QT` echo after a stream.
pub const SCIP_MAX_RESYNC_LINES: usize = 4096;

/// Read timeout of serial ports opened by the driver. Kept short so a
/// cancelled scanning thread notices quickly; line deadlines are handled above it.
#[cfg(feature = "serial")]
pub const SCIP_SERIAL_POLL_INTERVAL: Duration = Duration::from_millis(10);
