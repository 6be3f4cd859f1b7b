//! # Hokuyo Driver
//!
//! `hokuyo` is a driver for Hokuyo URG series laser rangefinders speaking the SCIP 2.0 protocol.
//! It resets and checks the sensor, calibrates the offset between the sensor clock and host epoch
//! time, and streams timestamped scans to a listener from a dedicated thread.
//!
//! The transport is any `Read + Write + Send` byte stream: a serial port (see the `serial`
//! feature), a socket, or the [`sim::SimulatedDevice`] shipped with the crate.

extern crate log;

pub mod answers;
pub mod base;
pub mod checksum;
pub mod clock;
pub mod cmds;
pub mod codec;
mod configuration;
mod internals;
pub mod protocol;
mod scanner;
pub mod sim;
pub mod types;
pub mod utils;

pub use crate::base::{EpochClock, Error, InitPhase, LineChannel, Result, SystemClock, Transport};
pub use crate::clock::{ClockState, ClockSynchronizer};
pub use crate::configuration::{Configuration, ConfigurationBuilder, State, StateBuilder};
pub use crate::protocol::Scip20Host;
pub use crate::scanner::ScanStatistics;
pub use crate::types::{DeviceOptions, DeviceState, ReadyState, Scan, ScanListener, StreamMode};

use crate::cmds::ScanCommand;
use crate::scanner::Session;
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type WorkerHandle<T> = JoinHandle<(Session<T>, Result<()>)>;

/// Represents a connection to and control interface for a SCIP 2.0 laser rangefinder.
///
/// Opening a device runs the whole initialization sequence. Afterwards the
/// device is idle and accepts queries until [`start_scanning`](Self::start_scanning)
/// hands the channel to the scanning thread. [`stop_scanning`](Self::stop_scanning)
/// takes it back; [`shutdown`](Self::shutdown) (or dropping the device) releases it.
pub struct Device<T: ?Sized + Transport + 'static> {
    session: Option<Session<T>>,
    worker: Option<WorkerHandle<T>>,
    configuration: Configuration,
    options: DeviceOptions,
    command: ScanCommand,
    clock: Arc<dyn EpochClock>,
    cancel: Arc<AtomicBool>,
    statistics: Arc<ScanStatistics>,
    state: DeviceState,
}

impl<T: ?Sized + Transport + 'static> Device<T> {
    /// Opens a device over `stream` with default options and the system clock.
    ///
    /// # Arguments
    ///
    /// * `stream` - A boxed, already opened byte stream connected to the sensor.
    ///
    /// # Example
    /// ```ignore
    /// # use hokuyo::Device;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let port = serialport::new("/dev/ttyACM0", 115200)
    ///     .timeout(std::time::Duration::from_millis(10))
    ///     .open()?;
    /// let mut device = Device::open(port)?;
    /// device.start_scanning(|scan: hokuyo::Scan| println!("{} readings", scan.len()))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(stream: Box<T>) -> Result<Device<T>> {
        Device::open_with(stream, DeviceOptions::default(), Arc::new(SystemClock::new()))
    }

    /// Opens a device with explicit options and host clock.
    ///
    /// Runs reset, diagnostic check, readiness polling, clock calibration and
    /// the configuration query, in that order. A failure is reported as
    /// [`Error::Initialization`] naming the phase.
    ///
    /// # Arguments
    ///
    /// * `stream` - A boxed, already opened byte stream connected to the sensor.
    /// * `options` - Timeouts, acquisition mode and calibration settings.
    /// * `clock` - Source of host epoch time.
    pub fn open_with(
        stream: Box<T>,
        options: DeviceOptions,
        clock: Arc<dyn EpochClock>,
    ) -> Result<Device<T>> {
        trace!("Opening device with {:?}", options);
        options.validate()?;

        let cancel = Arc::new(AtomicBool::new(false));
        let mut host = Scip20Host::with_stream(stream, options.read_timeout);
        host.set_cancel_token(cancel.clone());
        let command = ScanCommand::new(0, options.scan_end_step, 1);

        trace!("Device state -> {:?}", DeviceState::Resetting);
        host.reset().map_err(|e| e.in_phase(InitPhase::Reset))?;

        trace!("Device state -> {:?}", DeviceState::DiagnosticCheck);
        let state = host
            .query_state()
            .map_err(|e| e.in_phase(InitPhase::DiagnosticCheck))?;
        if state.sensor_diagnostic() != options.expected_diagnostic {
            error!("Sensor diagnostic check failed: {:?}", state.sensor_diagnostic());
            return Err(Error::DeviceNotReady {
                description: format!(
                    "sensor diagnostic check failed: \"{}\"",
                    state.sensor_diagnostic()
                ),
            }
            .in_phase(InitPhase::DiagnosticCheck));
        }

        trace!("Device state -> {:?}", DeviceState::Calibrating);
        host.wait_until_ready(
            &command,
            options.ready_poll_attempts,
            options.ready_poll_interval,
            clock.as_ref(),
        )
        .map_err(|e| e.in_phase(InitPhase::WaitUntilReady))?;
        let sync = calibrate(&mut host, &command, clock.as_ref(), options.calibration_samples)
            .map_err(|e| e.in_phase(InitPhase::Calibration))?;

        let configuration = host
            .query_configuration()
            .map_err(|e| e.in_phase(InitPhase::QueryConfiguration))?;
        debug!(
            "Opened {} ({} steps, front step {})",
            configuration.model(),
            configuration.total_steps(),
            configuration.front_step()
        );

        trace!("Device state -> {:?}", DeviceState::Idle);
        Ok(Device {
            session: Some(Session { host, sync }),
            worker: None,
            configuration,
            options,
            command,
            clock,
            cancel,
            statistics: Arc::new(ScanStatistics::default()),
            state: DeviceState::Idle,
        })
    }

    /// The sensor configuration read during initialization.
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The options the device was opened with.
    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Returns `true` while the scanning thread owns the channel.
    pub fn is_scanning(&self) -> bool {
        self.state == DeviceState::Streaming
    }

    /// Snapshot of the clock estimate. `None` while scanning, since the
    /// scanning thread owns it then.
    pub fn clock_state(&self) -> Option<ClockState> {
        self.session.as_ref().map(|s| s.sync.state())
    }

    /// Calibrated scan latency in milliseconds. `None` while scanning.
    pub fn scan_time_offset(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.sync.scan_time_offset())
    }

    /// Scans delivered to listeners since the device was opened.
    pub fn delivered_scans(&self) -> u64 {
        self.statistics.delivered()
    }

    /// Scans dropped because of checksum or decoding failures since the device was opened.
    pub fn dropped_scans(&self) -> u64 {
        self.statistics.dropped()
    }

    fn idle_session(&mut self) -> Result<&mut Session<T>> {
        match self.state {
            DeviceState::Streaming => Err(Error::StreamingInProgress),
            DeviceState::Shutdown => Err(Error::ChannelClosed),
            _ => self.session.as_mut().ok_or(Error::ChannelClosed),
        }
    }

    /// Queries the dynamic device state (`II`). Not available while scanning.
    pub fn query_state(&mut self) -> Result<State> {
        trace!("query_state called");
        self.idle_session()?.host.query_state()
    }

    /// Requests and returns one scan. Not available while scanning.
    ///
    /// The timestamp is the host arrival time corrected by the calibrated scan
    /// latency. A scan that fails its checksum is returned as an error.
    pub fn grab_single_scan(&mut self) -> Result<Scan> {
        trace!("grab_single_scan called");
        let command = self.command;
        let clock = self.clock.clone();
        let session = self.idle_session()?;
        session.host.start_scans(&command)?;
        let frame = session.host.read_scan_frame(&command, clock.as_ref())?;
        let ranges = frame.ranges?;
        let timestamp = session.sync.single_scan_epoch(frame.arrival_millis);
        trace!("Single scan of {} readings at {}", ranges.len(), timestamp);
        Ok(Scan::new(timestamp, ranges))
    }

    /// Starts the scanning thread, which delivers scans to `listener` until
    /// [`stop_scanning`](Self::stop_scanning) or [`shutdown`](Self::shutdown).
    ///
    /// # Arguments
    ///
    /// * `listener` - Receives scans, dropped-scan notices and a fatal stream error.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStreaming`] if the thread is already running.
    pub fn start_scanning<L: ScanListener>(&mut self, listener: L) -> Result<()> {
        match self.state {
            DeviceState::Streaming => return Err(Error::AlreadyStreaming),
            DeviceState::Shutdown => return Err(Error::ChannelClosed),
            _ => {}
        }
        let session = self.session.take().ok_or(Error::ChannelClosed)?;
        self.cancel.store(false, Ordering::SeqCst);

        let command = self.command;
        let mode = self.options.stream_mode;
        let clock = self.clock.clone();
        let cancel = self.cancel.clone();
        let statistics = self.statistics.clone();
        let spawned = thread::Builder::new()
            .name("hokuyo-scan".to_owned())
            .spawn(move || {
                scanner::scanning_thread(session, listener, command, mode, clock, cancel, statistics)
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                trace!("Device state -> {:?}", DeviceState::Streaming);
                self.state = DeviceState::Streaming;
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn scanning thread: {}", e);
                self.state = DeviceState::Shutdown;
                Err(e.into())
            }
        }
    }

    /// Stops the scanning thread, stops the measurement with `QT` and returns
    /// the device to idle.
    ///
    /// # Errors
    ///
    /// [`Error::NotStreaming`] if the thread is not running.
    pub fn stop_scanning(&mut self) -> Result<()> {
        if self.state != DeviceState::Streaming {
            return Err(Error::NotStreaming);
        }
        let handle = self.worker.take().ok_or(Error::NotStreaming)?;

        trace!("Signalling scanning thread to stop");
        self.cancel.store(true, Ordering::SeqCst);
        let joined = handle.join();
        self.cancel.store(false, Ordering::SeqCst);

        match joined {
            Ok((session, result)) => {
                if let Err(e) = result {
                    debug!("Scanning loop had already stopped: {}", e);
                }
                self.session = Some(session);
            }
            Err(_) => {
                error!("Scanning thread panicked, channel is lost");
                self.state = DeviceState::Shutdown;
                return Err(Error::ChannelClosed);
            }
        }

        trace!("Device state -> {:?}", DeviceState::Idle);
        self.state = DeviceState::Idle;
        self.idle_session()?.host.stop_streaming()
    }

    /// Stops scanning if needed and releases the channel.
    ///
    /// Errors during teardown are logged and ignored. Calling `shutdown` more
    /// than once is harmless.
    pub fn shutdown(&mut self) {
        if self.state == DeviceState::Shutdown {
            return;
        }
        trace!("Shutting down device");
        if self.state == DeviceState::Streaming {
            if let Err(e) = self.stop_scanning() {
                warn!("Ignoring error while stopping scan: {}", e);
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.host.close();
        }
        trace!("Device state -> {:?}", DeviceState::Shutdown);
        self.state = DeviceState::Shutdown;
    }
}

#[cfg(feature = "serial")]
impl Device<dyn serialport::SerialPort> {
    /// Opens the serial port at `path` and initializes the device on it.
    ///
    /// # Arguments
    ///
    /// * `path` - Serial device, e.g. `/dev/ttyACM0` or `COM3`.
    /// * `baud_rate` - Ignored by USB (ACM) models, required by RS-232 ones.
    /// * `options` - Timeouts, acquisition mode and calibration settings.
    pub fn open_serial(
        path: &str,
        baud_rate: u32,
        options: DeviceOptions,
    ) -> Result<Device<dyn serialport::SerialPort>> {
        trace!("Opening serial port {} at {} baud", path, baud_rate);
        let port = serialport::new(path, baud_rate)
            .timeout(internals::SCIP_SERIAL_POLL_INTERVAL)
            .open()?;
        Device::open_with(port, options, Arc::new(SystemClock::new()))
    }
}

impl<T: ?Sized + Transport + 'static> Drop for Device<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: ?Sized + Transport + 'static> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("state", &self.state)
            .field("configuration", &self.configuration)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Measures the clock offset and the scan latency.
///
/// Each latency sample is the capture time of a single scan (its device
/// timestamp mapped through the fresh offset) minus its host arrival time.
fn calibrate<T: ?Sized + Transport>(
    host: &mut Scip20Host<T>,
    command: &ScanCommand,
    clock: &dyn EpochClock,
    samples: usize,
) -> Result<ClockSynchronizer> {
    let offset = host.measure_clock_offset(clock, None)?;
    let mut sync = ClockSynchronizer::new(offset);

    let command = command.with_scan_count(1);
    let mut latencies = Vec::with_capacity(samples);
    for _ in 0..samples {
        host.start_scans(&command)?;
        let frame = host.read_scan_frame(&command, clock)?;
        match (frame.ranges, frame.device_timestamp) {
            (Ok(_), Some(device_timestamp)) => {
                let device_millis = sync.unwrap_timestamp(device_timestamp, frame.arrival_millis);
                let captured = ClockSynchronizer::to_epoch_millis(device_millis, offset);
                latencies.push(captured - frame.arrival_millis);
            }
            (Err(e), _) => debug!("Skipping corrupt calibration scan: {}", e),
            (Ok(_), None) => debug!("Skipping calibration scan without timestamp"),
        }
    }
    sync.calibrate_scan_time_offset(&latencies)?;
    Ok(sync)
}
