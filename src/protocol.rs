use crate::answers::*;
use crate::base::{EpochClock, Error, LineChannel, Result};
use crate::clock::ClockSynchronizer;
use crate::cmds::*;
use crate::codec;
use crate::configuration::{Configuration, ConfigurationBuilder, State, StateBuilder};
use crate::internals::*;
use crate::types::ReadyState;
use log::{debug, error, trace, warn};
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One scan frame read from the stream.
///
/// Frames that fail a checksum are still read to their terminator so that the
/// channel stays aligned. Their `ranges` holds the first error instead of data.
#[derive(Debug)]
pub struct ScanFrame {
    /// Scans that follow this one in the current request.
    pub scans_remaining: u8,
    /// Host epoch time at which the frame echo arrived.
    pub arrival_millis: i64,
    /// Device timestamp, if its line verified.
    pub device_timestamp: Option<u32>,
    /// Decoded readings, or the reason the frame must be dropped.
    pub ranges: Result<Vec<u32>>,
}

/// Host side of the SCIP 2.0 protocol on top of a [`LineChannel`].
///
/// Every method performs one complete exchange and leaves the channel at the
/// start of the next response.
#[derive(Debug)]
pub struct Scip20Host<T: ?Sized> {
    channel: LineChannel<T>,
}

fn unexpected_status(command: &str, status: &str) -> Error {
    Error::UnexpectedStatus {
        command: command.to_owned(),
        status: status.to_owned(),
        message: status_message(status),
    }
}

impl<T: ?Sized> Scip20Host<T>
where
    T: io::Read + io::Write,
{
    /// Creates a new `Scip20Host` over an existing channel.
    pub fn new(channel: LineChannel<T>) -> Scip20Host<T> {
        trace!("Creating new Scip20Host");
        Scip20Host { channel }
    }

    /// Creates a new `Scip20Host` directly from a stream.
    pub fn with_stream(stream: Box<T>, read_timeout: Duration) -> Scip20Host<T> {
        Scip20Host::new(LineChannel::with_options(
            stream,
            SCIP_DEFAULT_BUFFER_SIZE,
            read_timeout,
        ))
    }

    /// Installs the flag that makes blocking reads return [`Error::Cancelled`].
    pub fn set_cancel_token(&mut self, cancel: Arc<AtomicBool>) {
        self.channel.set_cancel_token(cancel);
    }

    fn read_status(&mut self) -> Result<String> {
        let line = self.channel.read_line()?;
        Ok(LineChannel::<T>::verify_checksum(&line)?.to_owned())
    }

    /// Reads a status line and requires `00`.
    pub fn check_status(&mut self, command: &str) -> Result<()> {
        let status = self.read_status()?;
        if status != SCIP_STATUS_OK {
            error!("Status {:?} for {}: {}", status, command, status_message(&status));
            return Err(unexpected_status(command, &status));
        }
        trace!("Status OK for {}", command);
        Ok(())
    }

    /// Reads the status line of a `TM` command, which only fails on `01` or `04`.
    pub fn check_tm_status(&mut self, command: &str) -> Result<()> {
        let status = self.read_status()?;
        if SCIP_TM_FAILURE_STATUSES.contains(&status.as_str()) {
            return Err(unexpected_status(command, &status));
        }
        trace!("Status {:?} accepted for {}", status, command);
        Ok(())
    }

    /// Reads the status line of an `MD` request and classifies it.
    pub fn check_scan_status(&mut self) -> Result<ReadyState> {
        let status = self.read_status()?;
        Ok(classify_scan_status(&status))
    }

    /// Reads the empty line that ends every response.
    pub fn check_terminator(&mut self) -> Result<()> {
        let line = self.channel.read_line()?;
        if !line.is_empty() {
            error!("Expected terminator, got {:?}", line);
            return Err(Error::protocol(format!(
                "expected an empty terminator line, got {:?}",
                line
            )));
        }
        Ok(())
    }

    fn decode_timestamp(line: &str) -> Result<u32> {
        let payload = LineChannel::<T>::verify_checksum(line)?;
        if payload.len() != SCIP_TIMESTAMP_ENCODING_CHARS {
            return Err(Error::MalformedScanData {
                description: format!(
                    "timestamp line {:?} does not hold {} characters",
                    line, SCIP_TIMESTAMP_ENCODING_CHARS
                ),
            });
        }
        codec::decode_value(payload.as_bytes(), SCIP_TIMESTAMP_ENCODING_CHARS)
    }

    /// Reads a checksummed 4-character timestamp line.
    pub fn read_timestamp(&mut self) -> Result<u32> {
        let line = self.channel.read_line()?;
        Self::decode_timestamp(&line)
    }

    /// Reads a `TAG:value;C` field line and returns `TAG:value`.
    ///
    /// The `;` is removed before the checksum is verified.
    pub fn read_field(&mut self) -> Result<String> {
        let line = self.channel.read_line()?;
        let bytes = line.as_bytes();
        if bytes.len() < 2 || bytes[bytes.len() - 2] != SCIP_FIELD_TERMINATOR as u8 {
            error!("Field line {:?} lacks its terminator", line);
            return Err(Error::protocol(format!(
                "field line {:?} does not end with ';' and a checksum",
                line
            )));
        }
        let mut stripped = line[..line.len() - 2].to_owned();
        stripped.push_str(&line[line.len() - 1..]);
        Ok(LineChannel::<T>::verify_checksum(&stripped)?.to_owned())
    }

    fn simple_command(&mut self, command: &str) -> Result<()> {
        self.channel.write_command(command)?;
        self.check_status(command)?;
        self.check_terminator()
    }

    fn time_adjust_command(&mut self, command: &str) -> Result<()> {
        self.channel.write_command(command)?;
        self.check_tm_status(command)?;
        self.check_terminator()
    }

    /// Brings the device into a known state: stops a measurement left over from
    /// an earlier session, leaves time-adjust mode, resets, switches to SCIP 2.0
    /// if the firmware supports it and resets again.
    pub fn reset(&mut self) -> Result<()> {
        trace!("Resetting device");
        match self.stop_streaming() {
            Err(e @ Error::Io(_)) | Err(e @ Error::ChannelClosed) | Err(e @ Error::Cancelled) => {
                return Err(e)
            }
            Err(e) => debug!("Ignoring failure to stop a previous measurement: {}", e),
            Ok(()) => {}
        }

        self.channel.write_command(SCIP_CMD_TIME_ADJUST_LEAVE)?;
        match self.check_tm_status(SCIP_CMD_TIME_ADJUST_LEAVE) {
            Err(e @ Error::UnexpectedStatus { .. }) => {
                debug!("Ignoring failure to leave time-adjust mode: {}", e)
            }
            other => other?,
        }
        self.check_terminator()?;

        self.simple_command(SCIP_CMD_RESET)?;

        self.channel.write_command(SCIP_CMD_SWITCH_TO_SCIP2)?;
        match self.check_status(SCIP_CMD_SWITCH_TO_SCIP2) {
            Err(e @ Error::UnexpectedStatus { .. }) | Err(e @ Error::ChecksumMismatch { .. }) => {
                debug!("Switch to SCIP 2.0 failed: {}", e)
            }
            other => other?,
        }
        self.check_terminator()?;

        self.simple_command(SCIP_CMD_RESET)
    }

    /// Queries the device state with `II`.
    pub fn query_state(&mut self) -> Result<State> {
        trace!("Querying state");
        self.channel.write_command(SCIP_CMD_STATE)?;
        self.check_status(SCIP_CMD_STATE)?;
        let mut builder = StateBuilder::new();
        builder.parse_model(&self.read_field()?)?;
        builder.parse_laser_state(&self.read_field()?)?;
        builder.parse_motor_speed(&self.read_field()?)?;
        builder.parse_measurement_mode(&self.read_field()?)?;
        builder.parse_bit_rate(&self.read_field()?)?;
        builder.parse_time_stamp(&self.read_field()?)?;
        builder.parse_sensor_diagnostic(&self.read_field()?)?;
        self.check_terminator()?;
        builder.build()
    }

    /// Queries the device parameters with `PP`.
    pub fn query_configuration(&mut self) -> Result<Configuration> {
        trace!("Querying configuration");
        self.channel.write_command(SCIP_CMD_PARAMETERS)?;
        self.check_status(SCIP_CMD_PARAMETERS)?;
        let mut builder = ConfigurationBuilder::new();
        builder.parse_model(&self.read_field()?)?;
        builder.parse_min_distance(&self.read_field()?)?;
        builder.parse_max_distance(&self.read_field()?)?;
        builder.parse_total_steps(&self.read_field()?)?;
        builder.parse_first_step(&self.read_field()?)?;
        builder.parse_last_step(&self.read_field()?)?;
        builder.parse_front_step(&self.read_field()?)?;
        builder.parse_standard_motor_speed(&self.read_field()?)?;
        self.check_terminator()?;
        builder.build()
    }

    /// Enters time-adjust mode (`TM0`).
    pub fn enter_time_adjust(&mut self) -> Result<()> {
        self.time_adjust_command(SCIP_CMD_TIME_ADJUST_ENTER)
    }

    /// Reads the device clock (`TM1`). Only valid in time-adjust mode.
    pub fn read_device_time(&mut self) -> Result<u32> {
        self.channel.write_command(SCIP_CMD_TIME_ADJUST_READ)?;
        self.check_tm_status(SCIP_CMD_TIME_ADJUST_READ)?;
        let timestamp = self.read_timestamp()?;
        self.check_terminator()?;
        trace!("Device time: {}", timestamp);
        Ok(timestamp)
    }

    /// Leaves time-adjust mode (`TM2`).
    pub fn leave_time_adjust(&mut self) -> Result<()> {
        self.time_adjust_command(SCIP_CMD_TIME_ADJUST_LEAVE)
    }

    /// Measures `device time - host time` with one `TM0`/`TM1`/`TM2` sequence.
    ///
    /// With a `previous_offset` the device time is unwrapped against it, so
    /// the result stays continuous when the device clock wraps.
    pub fn measure_clock_offset(
        &mut self,
        clock: &dyn EpochClock,
        previous_offset: Option<i64>,
    ) -> Result<i64> {
        self.enter_time_adjust()?;
        let offset = ClockSynchronizer::measure_offset(clock, previous_offset, || {
            self.read_device_time()
        })?;
        self.leave_time_adjust()?;
        Ok(offset)
    }

    /// Sends an `MD` request and reads its acknowledgement.
    ///
    /// Scan frames follow only if the result is [`ReadyState::Ready`].
    pub fn request_scans(&mut self, command: &ScanCommand) -> Result<ReadyState> {
        let line = command.encode()?;
        self.channel.write_command(&line)?;
        let state = self.check_scan_status()?;
        self.check_terminator()?;
        trace!("{} -> {:?}", line, state);
        Ok(state)
    }

    /// Like [`request_scans`](Self::request_scans), but anything other than
    /// [`ReadyState::Ready`] is an error.
    pub fn start_scans(&mut self, command: &ScanCommand) -> Result<()> {
        match self.request_scans(command)? {
            ReadyState::Ready => Ok(()),
            ReadyState::Busy(status) | ReadyState::Error(status) => {
                Err(unexpected_status(&command.to_string(), &status))
            }
        }
    }

    /// Reads one scan frame of an accepted `MD` request.
    ///
    /// A wrong echo or an unexpected status is returned as an error because the
    /// channel can no longer be trusted. Checksum and decoding failures are
    /// reported inside the frame.
    pub fn read_scan_frame(
        &mut self,
        command: &ScanCommand,
        clock: &dyn EpochClock,
    ) -> Result<ScanFrame> {
        let echo = self.channel.read_line()?;
        let arrival_millis = clock.now_millis();
        let scans_remaining = command.remaining_scans(&echo)?;
        trace!(
            "Frame echo {:?} at {} ({} scans remaining)",
            echo,
            arrival_millis,
            scans_remaining
        );

        let mut first_error: Option<Error> = None;

        match self.read_status() {
            Ok(status) if status == SCIP_STATUS_DATA || status == SCIP_STATUS_OK => {}
            Ok(status) => {
                error!("Unexpected frame status {:?}", status);
                return Err(unexpected_status(&echo, &status));
            }
            Err(e @ Error::ChecksumMismatch { .. }) => {
                warn!("Invalid checksum on frame status: {}", e);
                first_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        let timestamp_line = self.channel.read_line()?;
        let device_timestamp = match Self::decode_timestamp(&timestamp_line) {
            Ok(timestamp) => Some(timestamp),
            Err(e) => {
                warn!("Invalid frame timestamp: {}", e);
                first_error.get_or_insert(e);
                None
            }
        };

        let mut data = Vec::new();
        loop {
            let line = self.channel.read_line()?;
            if line.is_empty() {
                break;
            }
            match LineChannel::<T>::verify_checksum(&line) {
                Ok(payload) => data.extend_from_slice(payload.as_bytes()),
                Err(e) => {
                    // Keep reading to the terminator so the next frame starts aligned.
                    warn!("Invalid checksum on data line: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let ranges = match first_error {
            Some(e) => Err(e),
            None => codec::decode_values(&data, SCIP_RANGE_ENCODING_CHARS),
        };
        Ok(ScanFrame {
            scans_remaining,
            arrival_millis,
            device_timestamp,
            ranges,
        })
    }

    /// Polls with single-scan requests until the device accepts one.
    ///
    /// Busy statuses are retried up to `attempts` times, `interval` apart.
    /// The frame of the accepted request is read and discarded.
    pub fn wait_until_ready(
        &mut self,
        command: &ScanCommand,
        attempts: u32,
        interval: Duration,
        clock: &dyn EpochClock,
    ) -> Result<()> {
        let command = command.with_scan_count(1);
        for attempt in 1..=attempts.max(1) {
            match self.request_scans(&command)? {
                ReadyState::Ready => {
                    let frame = self.read_scan_frame(&command, clock)?;
                    if let Err(e) = frame.ranges {
                        debug!("Discarded readiness frame was corrupt: {}", e);
                    }
                    trace!("Device ready after {} attempt(s)", attempt);
                    return Ok(());
                }
                ReadyState::Busy(status) => {
                    debug!(
                        "Sensor not ready (attempt {}/{}): {} {}",
                        attempt,
                        attempts,
                        status,
                        status_message(&status)
                    );
                    thread::sleep(interval);
                }
                ReadyState::Error(status) => {
                    return Err(unexpected_status(&command.to_string(), &status));
                }
            }
        }
        Err(Error::DeviceNotReady {
            description: format!("sensor still busy after {} polls", attempts),
        })
    }

    /// Stops a running measurement with `QT` and realigns the channel.
    ///
    /// Lines still in flight from the stream are discarded until the `QT` echo.
    pub fn stop_streaming(&mut self) -> Result<()> {
        trace!("Stopping measurement");
        self.channel.write_line(SCIP_CMD_QUIT)?;
        let mut skipped = 0usize;
        loop {
            let line = self.channel.read_line()?;
            if line == SCIP_CMD_QUIT {
                break;
            }
            skipped += 1;
            if skipped > SCIP_MAX_RESYNC_LINES {
                return Err(Error::protocol(format!(
                    "no {} echo within {} lines",
                    SCIP_CMD_QUIT, SCIP_MAX_RESYNC_LINES
                )));
            }
        }
        trace!("Skipped {} stale lines before the {} echo", skipped, SCIP_CMD_QUIT);
        self.check_status(SCIP_CMD_QUIT)?;
        self.check_terminator()
    }

    /// Releases the stream. Errors are logged and ignored.
    pub fn close(&mut self) {
        self.channel.close();
    }

    /// Returns `true` once the stream has been released.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}
