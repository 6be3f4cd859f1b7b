//! A simulated SCIP 2.0 sensor for tests and for running without hardware.
//!
//! [`SimulatedDevice`] answers the commands the driver uses the way URG
//! firmware does. Scan frames are produced lazily, one per read that finds the
//! output empty, so a stream never runs ahead of its reader.

use crate::base::{EpochClock, SystemClock};
use crate::checksum::checksum;
use crate::codec::encode_value;
use crate::internals::{SCIP_EXPECTED_DIAGNOSTIC, SCIP_RANGE_ENCODING_CHARS};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const DEVICE_CLOCK_MODULUS: i64 = 1 << 24;
const DATA_LINE_CHARS: usize = 64;
const BASE_RANGE: u32 = 1000;

/// Behaviour of a [`SimulatedDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    pub model: String,
    pub min_distance: u32,
    pub max_distance: u32,
    pub total_steps: u32,
    pub first_step: u32,
    pub last_step: u32,
    pub front_step: u32,
    pub motor_speed: u32,
    /// Reported in the `STAT` field of `II`.
    pub diagnostic: String,
    /// `device time - host time` in milliseconds.
    pub clock_offset_millis: i64,
    /// How long before a frame is produced its scan was captured.
    pub scan_latency_millis: i64,
    /// Number of `MD` requests answered with `busy_status` before one is accepted.
    pub busy_polls: u32,
    pub busy_status: String,
    /// Whether `SCIP2.0` is acknowledged with `00`.
    pub supports_scip_switch: bool,
    /// 1-based frame numbers of a continuous stream whose first data line gets a bad checksum.
    pub corrupt_frames: Vec<usize>,
    /// Frames after which a continuous stream falls silent.
    pub scan_limit: Option<usize>,
    /// Time a read waits before reporting that nothing arrived.
    pub idle_poll: Duration,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            model: "URG-04LX".to_owned(),
            min_distance: 20,
            max_distance: 4095,
            total_steps: 1024,
            first_step: 44,
            last_step: 725,
            front_step: 384,
            motor_speed: 600,
            diagnostic: SCIP_EXPECTED_DIAGNOSTIC.to_owned(),
            clock_offset_millis: 0,
            scan_latency_millis: 0,
            busy_polls: 0,
            busy_status: "98".to_owned(),
            supports_scip_switch: true,
            corrupt_frames: Vec::new(),
            scan_limit: None,
            idle_poll: Duration::from_millis(1),
        }
    }
}

#[derive(Debug)]
struct Measurement {
    echo_prefix: String,
    steps: usize,
    requested: usize,
    produced: usize,
}

struct Inner {
    config: SimConfig,
    clock: Arc<dyn EpochClock>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    commands: Vec<String>,
    busy_remaining: u32,
    time_adjust: bool,
    measurement: Option<Measurement>,
}

impl Inner {
    fn device_time(&self) -> u32 {
        (self.clock.now_millis() + self.config.clock_offset_millis).rem_euclid(DEVICE_CLOCK_MODULUS)
            as u32
    }

    fn push_line(&mut self, line: &str) {
        self.output.extend(line.bytes());
        self.output.push_back(b'\n');
    }

    fn push_checksummed(&mut self, payload: &str) {
        let mut line = payload.to_owned();
        line.push(checksum(payload.as_bytes()) as char);
        self.push_line(&line);
    }

    fn push_field(&mut self, tag: &str, value: &str) {
        let payload = format!("{}:{}", tag, value);
        let line = format!("{};{}", payload, checksum(payload.as_bytes()) as char);
        self.push_line(&line);
    }

    fn respond(&mut self, echo: &str, status: &str) {
        self.push_line(echo);
        self.push_checksummed(status);
    }

    fn encode_time(time: u32) -> String {
        encode_value(time, 4)
            .map(|bytes| bytes.into_iter().map(char::from).collect())
            .unwrap_or_default()
    }

    fn handle(&mut self, line: &str) {
        self.commands.push(line.to_owned());
        match line {
            "RS" => {
                self.measurement = None;
                self.time_adjust = false;
                self.respond(line, "00");
            }
            "QT" => {
                self.measurement = None;
                self.respond(line, "00");
            }
            "TM0" => {
                self.time_adjust = true;
                self.respond(line, "00");
            }
            "TM1" if self.time_adjust => {
                self.respond(line, "00");
                let time = Self::encode_time(self.device_time());
                self.push_checksummed(&time);
            }
            "TM1" => self.respond(line, "01"),
            "TM2" => {
                self.time_adjust = false;
                self.respond(line, "00");
            }
            "SCIP2.0" => {
                let status = if self.config.supports_scip_switch { "00" } else { "0E" };
                self.respond(line, status);
            }
            "PP" => {
                self.respond(line, "00");
                let c = self.config.clone();
                self.push_field("MODL", &c.model);
                self.push_field("DMIN", &c.min_distance.to_string());
                self.push_field("DMAX", &c.max_distance.to_string());
                self.push_field("ARES", &c.total_steps.to_string());
                self.push_field("AMIN", &c.first_step.to_string());
                self.push_field("AMAX", &c.last_step.to_string());
                self.push_field("AFRT", &c.front_step.to_string());
                self.push_field("SCAN", &c.motor_speed.to_string());
            }
            "II" => {
                self.respond(line, "00");
                let c = self.config.clone();
                let laser = if self.measurement.is_some() { "ON" } else { "OFF" };
                let time = Self::encode_time(self.device_time());
                self.push_field("MODL", &c.model);
                self.push_field("LASR", laser);
                self.push_field("SCSP", &format!("Initial({}[rpm])", c.motor_speed));
                self.push_field("MESM", "Measuring by Normal Mode");
                self.push_field("SBPS", "USB only");
                self.push_field("TIME", &time);
                self.push_field("STAT", &c.diagnostic);
            }
            _ if line.starts_with("MD") => self.handle_measure(line),
            _ => self.respond(line, "0E"),
        }
        self.push_line("");
    }

    fn handle_measure(&mut self, line: &str) {
        let field = |range: std::ops::Range<usize>| {
            line.get(range).and_then(|f| f.parse::<usize>().ok())
        };
        let (start, end, count) = match (field(2..6), field(6..10), field(13..15)) {
            (Some(start), Some(end), Some(count)) if line.len() == 15 && start <= end => {
                (start, end, count)
            }
            _ => return self.respond(line, "0C"),
        };
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            let status = self.config.busy_status.clone();
            return self.respond(line, &status);
        }
        self.respond(line, "00");
        self.measurement = Some(Measurement {
            echo_prefix: line[..13].to_owned(),
            steps: end - start + 1,
            requested: count,
            produced: 0,
        });
    }

    fn next_frame(&mut self) {
        let (number, remaining, continuous, steps, prefix) = match self.measurement.as_mut() {
            Some(m) => {
                let continuous = m.requested == 0;
                if continuous && self.config.scan_limit.map_or(false, |l| m.produced >= l) {
                    return;
                }
                m.produced += 1;
                let remaining = if continuous { 0 } else { m.requested - m.produced };
                (m.produced, remaining, continuous, m.steps, m.echo_prefix.clone())
            }
            None => return,
        };
        if !continuous && remaining == 0 {
            self.measurement = None;
        }

        self.push_line(&format!("{}{:02}", prefix, remaining));
        self.push_checksummed("99");
        let captured = (self.device_time() as i64 - self.config.scan_latency_millis)
            .rem_euclid(DEVICE_CLOCK_MODULUS) as u32;
        let time = Self::encode_time(captured);
        self.push_checksummed(&time);

        let value = BASE_RANGE + number as u32;
        let encoded: String = encode_value(value, SCIP_RANGE_ENCODING_CHARS)
            .map(|bytes| bytes.into_iter().map(char::from).collect())
            .unwrap_or_default();
        let data = encoded.repeat(steps);
        let corrupt = continuous && self.config.corrupt_frames.contains(&number);
        for (i, chunk) in data.as_bytes().chunks(DATA_LINE_CHARS).enumerate() {
            let mut line = chunk.to_vec();
            let mut sum = checksum(chunk);
            if corrupt && i == 0 {
                sum = if sum == b'o' { b'0' } else { sum + 1 };
            }
            line.push(sum);
            self.output.extend(line);
            self.output.push_back(b'\n');
        }
        self.push_line("");
    }
}

/// A simulated SCIP 2.0 sensor speaking over an in-memory byte stream.
///
/// Clones share the same device, so a test can keep one handle for inspection
/// while the driver owns another.
///
/// # Example
/// ```rust
/// # use hokuyo::sim::{SimConfig, SimulatedDevice};
/// # use hokuyo::Device;
/// let sensor = SimulatedDevice::new(SimConfig::default());
/// let device = Device::open(Box::new(sensor)).unwrap();
/// assert_eq!(device.configuration().model(), "URG-04LX");
/// ```
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedDevice {
    /// Creates a device whose clock follows the system clock.
    pub fn new(config: SimConfig) -> SimulatedDevice {
        SimulatedDevice::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Creates a device whose clock follows `clock` plus the configured offset.
    pub fn with_clock(config: SimConfig, clock: Arc<dyn EpochClock>) -> SimulatedDevice {
        let busy_remaining = config.busy_polls;
        SimulatedDevice {
            inner: Arc::new(Mutex::new(Inner {
                config,
                clock,
                input: Vec::new(),
                output: VecDeque::new(),
                commands: Vec::new(),
                busy_remaining,
                time_adjust: false,
                measurement: None,
            })),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "simulated device poisoned"))
    }

    /// Every command line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().map(|inner| inner.commands.clone()).unwrap_or_default()
    }

    /// Returns `true` while a measurement is running.
    pub fn is_measuring(&self) -> bool {
        self.lock()
            .map(|inner| inner.measurement.is_some())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice").finish_non_exhaustive()
    }
}

impl io::Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let idle_poll = {
            let mut inner = self.lock()?;
            if inner.output.is_empty() {
                inner.next_frame();
            }
            if !inner.output.is_empty() {
                let n = buf.len().min(inner.output.len());
                for (slot, byte) in buf.iter_mut().zip(inner.output.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            inner.config.idle_poll
        };
        thread::sleep(idle_poll);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data from simulated device"))
    }
}

impl io::Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock()?;
        inner.input.extend_from_slice(buf);
        while let Some(pos) = inner.input.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = inner.input.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&line[..pos]).trim_end_matches('\r').to_owned();
            inner.handle(&command);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A hand-driven epoch clock.
///
/// Every reading advances the clock by a fixed step, which makes round trips
/// take a known, symmetric amount of time.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
    step: i64,
}

impl ManualClock {
    /// A clock that stands still at `start_millis` until advanced.
    pub fn new(start_millis: i64) -> ManualClock {
        ManualClock::with_step(start_millis, 0)
    }

    /// A clock that moves `step_millis` forward after every reading.
    pub fn with_step(start_millis: i64, step_millis: i64) -> ManualClock {
        ManualClock {
            now: AtomicI64::new(start_millis),
            step: step_millis,
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl EpochClock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}
