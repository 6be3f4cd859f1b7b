//! Offset estimation between the device uptime clock and host epoch time.

use crate::base::{EpochClock, Error, Result};
use crate::internals::{SCIP_DELTA_OFFSET_MAX_WEIGHT_COUNT, SCIP_DEVICE_CLOCK_MODULUS};
use crate::utils::median;
use log::{debug, trace};

/// Snapshot of the clock estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockState {
    /// Current estimate of `device time - host epoch time`, in milliseconds.
    pub offset_millis: i64,
    /// Expected drift of the offset until the next update, in milliseconds.
    pub delta_offset: f64,
    /// Raw offset passed to the last update.
    pub previous_offset: i64,
    /// Number of drift samples averaged so far, capped at ten.
    pub delta_offset_count: u32,
}

impl ClockState {
    /// State right after the initial calibration.
    pub fn new(offset_millis: i64) -> ClockState {
        ClockState {
            offset_millis,
            delta_offset: 0.0,
            previous_offset: offset_millis,
            delta_offset_count: 0,
        }
    }
}

/// Places a 24-bit device timestamp on a continuous millisecond line.
///
/// The device clock wraps about every 4.66 hours. Of all readings congruent to
/// `device_timestamp`, the one closest to `expected_device_millis` is returned,
/// so any error in the expectation below half a period is tolerated.
pub fn unwrap_device_time(device_timestamp: u32, expected_device_millis: i64) -> i64 {
    let timestamp = device_timestamp as i64 % SCIP_DEVICE_CLOCK_MODULUS;
    let periods = (expected_device_millis - timestamp + SCIP_DEVICE_CLOCK_MODULUS / 2)
        .div_euclid(SCIP_DEVICE_CLOCK_MODULUS);
    timestamp + periods * SCIP_DEVICE_CLOCK_MODULUS
}

/// Maps device timestamps to host epoch time and keeps the mapping current.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockSynchronizer {
    state: ClockState,
    scan_time_offset: i64,
}

impl ClockSynchronizer {
    /// Creates a synchronizer from an initial offset measurement.
    pub fn new(offset_millis: i64) -> ClockSynchronizer {
        trace!("Initial clock offset: {} ms", offset_millis);
        ClockSynchronizer {
            state: ClockState::new(offset_millis),
            scan_time_offset: 0,
        }
    }

    /// Measures `device time - host time` around one device time query.
    ///
    /// The host clock is sampled right before and right after `read_device_time`,
    /// and the device is assumed to have sampled its clock halfway through.
    ///
    /// # Arguments
    ///
    /// * `clock` - Host epoch clock.
    /// * `previous_offset` - Offset estimate used to unwrap the device time, if one exists.
    /// * `read_device_time` - Performs the round trip and returns the device time in milliseconds.
    pub fn measure_offset<F>(
        clock: &dyn EpochClock,
        previous_offset: Option<i64>,
        read_device_time: F,
    ) -> Result<i64>
    where
        F: FnOnce() -> Result<u32>,
    {
        let start = clock.now_millis();
        let raw = read_device_time()?;
        let end = clock.now_millis();
        let device_time = match previous_offset {
            Some(offset) => unwrap_device_time(raw, (start + end) / 2 + offset),
            None => raw as i64,
        };
        let offset = device_time - (start + end) / 2;
        trace!(
            "Device time {} between host {} and {}: offset {} ms",
            device_time,
            start,
            end,
            offset
        );
        Ok(offset)
    }

    /// Fixes the scan latency from a set of samples, using their median.
    ///
    /// Each sample is `scan capture time - host arrival time` for one single scan.
    pub fn calibrate_scan_time_offset(&mut self, samples: &[i64]) -> Result<i64> {
        let offset = median(samples).ok_or_else(|| {
            Error::protocol("no samples to calibrate the scan time offset from")
        })?;
        debug!(
            "Scan time offset: {} ms (median of {} samples)",
            offset,
            samples.len()
        );
        self.scan_time_offset = offset;
        Ok(offset)
    }

    /// Folds a freshly measured raw offset into the estimate.
    ///
    /// The offset first advances by the predicted drift. The drift itself is a
    /// running average over the first ten samples and an exponential average
    /// with weight 1/10 afterwards.
    pub fn update(&mut self, new_offset: i64) {
        let s = &mut self.state;
        s.offset_millis += s.delta_offset.round() as i64;
        s.delta_offset_count = (s.delta_offset_count + 1).min(SCIP_DELTA_OFFSET_MAX_WEIGHT_COUNT);
        let theta = 1.0 / s.delta_offset_count as f64;
        let error = (new_offset - s.offset_millis) as f64;
        let drift = (new_offset - s.previous_offset) as f64;
        s.delta_offset = (1.0 - theta) * s.delta_offset + theta * (error + drift);
        s.previous_offset = new_offset;
        trace!(
            "Offset: {}, delta offset: {:.3}, error: {}",
            s.offset_millis,
            s.delta_offset,
            error
        );
    }

    /// Offset for a scan inside a batch of `total_scans`, of which
    /// `scans_remaining` come after it.
    ///
    /// Later scans of a batch get a proportionally larger share of the predicted drift.
    pub fn calculate_offset(&self, scans_remaining: u32, total_scans: u32) -> i64 {
        if total_scans == 0 {
            return self.state.offset_millis;
        }
        let position = total_scans as f64 - scans_remaining as f64 - 1.0;
        let multiplier = position / total_scans as f64;
        self.state.offset_millis + (self.state.delta_offset * multiplier).round() as i64
    }

    /// Current offset estimate in milliseconds.
    #[inline]
    pub fn current_offset(&self) -> i64 {
        self.state.offset_millis
    }

    /// Latency between scan capture and scan arrival, in milliseconds (usually negative).
    #[inline]
    pub fn scan_time_offset(&self) -> i64 {
        self.scan_time_offset
    }

    /// Unwraps a device timestamp observed around host time `host_millis`
    /// using the current offset estimate.
    #[inline]
    pub fn unwrap_timestamp(&self, device_timestamp: u32, host_millis: i64) -> i64 {
        unwrap_device_time(device_timestamp, host_millis + self.state.offset_millis)
    }

    /// Converts an unwrapped device time to host epoch time with a given offset.
    #[inline]
    pub fn to_epoch_millis(device_millis: i64, offset_millis: i64) -> i64 {
        device_millis - offset_millis
    }

    /// Epoch capture time of a single scan that arrived at `arrival_millis`.
    #[inline]
    pub fn single_scan_epoch(&self, arrival_millis: i64) -> i64 {
        arrival_millis + self.scan_time_offset
    }

    /// Raw offset implied by a streamed scan: its device timestamp against the
    /// host arrival time corrected by the scan latency.
    #[inline]
    pub fn streamed_scan_offset(&self, device_millis: i64, arrival_millis: i64) -> i64 {
        device_millis - self.single_scan_epoch(arrival_millis)
    }

    /// Snapshot of the estimate.
    pub fn state(&self) -> ClockState {
        self.state
    }
}
