//! The scanning loop run by [`Device::start_scanning`](crate::Device::start_scanning).

use crate::base::{EpochClock, Error, Result, Transport};
use crate::clock::ClockSynchronizer;
use crate::cmds::{ScanCommand, SCIP_MD_CONTINUOUS, SCIP_MD_MAX_SCANS};
use crate::protocol::Scip20Host;
use crate::types::{Scan, ScanListener, StreamMode};
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Everything the scanning thread needs exclusive access to.
///
/// Moved into the thread on start and handed back on join.
pub(crate) struct Session<T: ?Sized> {
    pub host: Scip20Host<T>,
    pub sync: ClockSynchronizer,
}

/// Scan counters shared between the device and its scanning thread.
#[derive(Debug, Default)]
pub struct ScanStatistics {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl ScanStatistics {
    /// Scans handed to the listener.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Scans discarded because of checksum or decoding failures.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Settings of one scanning run.
pub(crate) struct ScanContext<'a> {
    pub command: ScanCommand,
    pub mode: StreamMode,
    pub clock: &'a dyn EpochClock,
    pub cancel: &'a AtomicBool,
    pub statistics: &'a ScanStatistics,
}

impl ScanContext<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn deliver<L: ScanListener + ?Sized>(
        &self,
        listener: &mut L,
        ranges: Result<Vec<u32>>,
        timestamp: Option<i64>,
    ) {
        match (ranges, timestamp) {
            (Ok(ranges), Some(timestamp)) => {
                trace!("Delivering scan of {} readings at {}", ranges.len(), timestamp);
                self.statistics.delivered.fetch_add(1, Ordering::Relaxed);
                listener.on_new_scan(Scan::new(timestamp, ranges));
            }
            (Err(e), _) => self.drop_scan(listener, &e),
            (Ok(_), None) => self.drop_scan(
                listener,
                &Error::MalformedScanData {
                    description: "scan frame without timestamp".to_owned(),
                },
            ),
        }
    }

    fn drop_scan<L: ScanListener + ?Sized>(&self, listener: &mut L, error: &Error) {
        let dropped = self.statistics.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("Dropping scan ({} dropped so far): {}", dropped, error);
        listener.on_scan_dropped(error);
    }
}

/// Runs the scanning loop until cancellation or a fatal error.
///
/// Returns `Ok(())` when stopped through the cancel flag. Dropped scans never
/// end the loop.
pub(crate) fn run<T, L>(
    session: &mut Session<T>,
    context: &ScanContext<'_>,
    listener: &mut L,
) -> Result<()>
where
    T: Transport + ?Sized,
    L: ScanListener + ?Sized,
{
    let result = match context.mode {
        StreamMode::Continuous => run_continuous(session, context, listener),
        StreamMode::Batched { scans_per_request } => {
            run_batched(session, context, listener, scans_per_request)
        }
    };
    match result {
        Err(Error::Cancelled) => {
            debug!("Scanning loop cancelled");
            Ok(())
        }
        other => other,
    }
}

fn run_continuous<T, L>(
    session: &mut Session<T>,
    context: &ScanContext<'_>,
    listener: &mut L,
) -> Result<()>
where
    T: Transport + ?Sized,
    L: ScanListener + ?Sized,
{
    let command = context.command.with_scan_count(SCIP_MD_CONTINUOUS);
    session.host.start_scans(&command)?;
    trace!("Continuous stream started");

    while !context.cancelled() {
        let frame = session.host.read_scan_frame(&command, context.clock)?;
        let offset = session.sync.current_offset();
        let device_millis = frame
            .device_timestamp
            .map(|timestamp| session.sync.unwrap_timestamp(timestamp, frame.arrival_millis));
        if let (Ok(_), Some(device_millis)) = (&frame.ranges, device_millis) {
            let raw = session
                .sync
                .streamed_scan_offset(device_millis, frame.arrival_millis);
            session.sync.update(raw);
        }
        let timestamp = device_millis.map(|d| ClockSynchronizer::to_epoch_millis(d, offset));
        context.deliver(listener, frame.ranges, timestamp);
    }
    Ok(())
}

fn run_batched<T, L>(
    session: &mut Session<T>,
    context: &ScanContext<'_>,
    listener: &mut L,
    scans_per_request: u8,
) -> Result<()>
where
    T: Transport + ?Sized,
    L: ScanListener + ?Sized,
{
    if scans_per_request == SCIP_MD_CONTINUOUS || scans_per_request > SCIP_MD_MAX_SCANS {
        return Err(Error::protocol(format!(
            "scans per request must be within 1..={}, got {}",
            SCIP_MD_MAX_SCANS, scans_per_request
        )));
    }
    let command = context.command.with_scan_count(scans_per_request);
    let total = scans_per_request as u32;

    while !context.cancelled() {
        session.host.start_scans(&command)?;
        trace!("Batch of {} scans started", total);
        loop {
            let frame = session.host.read_scan_frame(&command, context.clock)?;
            let remaining = frame.scans_remaining;
            let offset = session.sync.calculate_offset(remaining as u32, total);
            let timestamp = frame.device_timestamp.map(|timestamp| {
                let device_millis = session.sync.unwrap_timestamp(timestamp, frame.arrival_millis);
                ClockSynchronizer::to_epoch_millis(device_millis, offset)
            });
            context.deliver(listener, frame.ranges, timestamp);
            if remaining == 0 {
                break;
            }
        }
        if context.cancelled() {
            break;
        }
        let previous = session.sync.current_offset();
        let offset = session
            .host
            .measure_clock_offset(context.clock, Some(previous))?;
        session.sync.update(offset);
    }
    Ok(())
}

/// Thread body: runs the loop, reports a fatal error to the listener and hands
/// the session back.
pub(crate) fn scanning_thread<T, L>(
    mut session: Session<T>,
    mut listener: L,
    command: ScanCommand,
    mode: StreamMode,
    clock: Arc<dyn EpochClock>,
    cancel: Arc<AtomicBool>,
    statistics: Arc<ScanStatistics>,
) -> (Session<T>, Result<()>)
where
    T: Transport + ?Sized,
    L: ScanListener,
{
    let context = ScanContext {
        command,
        mode,
        clock: clock.as_ref(),
        cancel: cancel.as_ref(),
        statistics: statistics.as_ref(),
    };
    let result = run(&mut session, &context, &mut listener);
    if let Err(e) = &result {
        error!("Scanning loop stopped: {}", e);
        listener.on_stream_error(e);
    }
    trace!("Scanning thread exiting");
    (session, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ManualClock, SimConfig, SimulatedDevice};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        scans: Vec<Scan>,
        dropped: usize,
        errors: usize,
    }

    impl ScanListener for Recorder {
        fn on_new_scan(&mut self, scan: Scan) {
            self.scans.push(scan);
        }

        fn on_scan_dropped(&mut self, _error: &Error) {
            self.dropped += 1;
        }

        fn on_stream_error(&mut self, _error: &Error) {
            self.errors += 1;
        }
    }

    fn session(config: SimConfig, clock: Arc<ManualClock>) -> Session<SimulatedDevice> {
        let device = SimulatedDevice::with_clock(config, clock);
        Session {
            host: Scip20Host::with_stream(Box::new(device), Duration::from_millis(100)),
            sync: ClockSynchronizer::new(500),
        }
    }

    #[test]
    fn continuous_stream_stops_at_silence() {
        let clock = Arc::new(ManualClock::with_step(10_000, 1));
        let mut session = session(
            SimConfig {
                clock_offset_millis: 500,
                scan_limit: Some(5),
                corrupt_frames: vec![2],
                ..SimConfig::default()
            },
            clock.clone(),
        );
        let cancel = AtomicBool::new(false);
        let statistics = ScanStatistics::default();
        let context = ScanContext {
            command: ScanCommand::new(0, 768, 0),
            mode: StreamMode::Continuous,
            clock: clock.as_ref(),
            cancel: &cancel,
            statistics: &statistics,
        };
        let mut recorder = Recorder::default();

        let result = run(&mut session, &context, &mut recorder);
        assert!(matches!(result, Err(Error::DeviceTimeout)));
        assert_eq!(recorder.scans.len(), 4);
        assert_eq!(recorder.dropped, 1);
        assert_eq!(recorder.errors, 0);
        assert_eq!(statistics.delivered(), 4);
        assert_eq!(statistics.dropped(), 1);
        let firsts: Vec<u32> = recorder.scans.iter().map(|s| s.ranges[0]).collect();
        assert_eq!(firsts, vec![1001, 1003, 1004, 1005]);
        for scan in &recorder.scans {
            assert!((scan.timestamp_millis - clock.now_millis()).abs() < 100);
        }
    }

    #[test]
    fn continuous_stream_crosses_device_clock_wrap() {
        let period: i64 = 1 << 24;
        // Device time starts 60 ms before its 24-bit clock wraps.
        let clock = Arc::new(ManualClock::with_step(period - 560, 1));
        let mut session = session(
            SimConfig {
                clock_offset_millis: 500,
                scan_limit: Some(80),
                ..SimConfig::default()
            },
            clock.clone(),
        );
        let cancel = AtomicBool::new(false);
        let statistics = ScanStatistics::default();
        let context = ScanContext {
            command: ScanCommand::new(0, 768, 0),
            mode: StreamMode::Continuous,
            clock: clock.as_ref(),
            cancel: &cancel,
            statistics: &statistics,
        };
        let mut recorder = Recorder::default();

        let result = run(&mut session, &context, &mut recorder);
        assert!(matches!(result, Err(Error::DeviceTimeout)));
        assert_eq!(recorder.scans.len(), 80);
        for pair in recorder.scans.windows(2) {
            let step = pair[1].timestamp_millis - pair[0].timestamp_millis;
            assert!((-5..=10).contains(&step), "timestamp step {}", step);
        }
        let last = recorder.scans[79].timestamp_millis;
        assert!((clock.now_millis() - last).abs() < 50, "last timestamp {}", last);
        assert!((session.sync.current_offset() - 500).abs() < 10);
    }

    #[test]
    fn cancelled_before_start_sends_nothing_else() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = session(SimConfig::default(), clock.clone());
        let cancel = AtomicBool::new(true);
        let statistics = ScanStatistics::default();
        let context = ScanContext {
            command: ScanCommand::new(0, 768, 0),
            mode: StreamMode::Batched {
                scans_per_request: 5,
            },
            clock: clock.as_ref(),
            cancel: &cancel,
            statistics: &statistics,
        };
        let mut recorder = Recorder::default();
        run(&mut session, &context, &mut recorder).unwrap();
        assert!(recorder.scans.is_empty());
    }

    #[test]
    fn batch_size_is_checked() {
        let clock = Arc::new(ManualClock::new(0));
        let mut session = session(SimConfig::default(), clock.clone());
        let cancel = AtomicBool::new(false);
        let statistics = ScanStatistics::default();
        let context = ScanContext {
            command: ScanCommand::new(0, 768, 0),
            mode: StreamMode::Batched {
                scans_per_request: 100,
            },
            clock: clock.as_ref(),
            cancel: &cancel,
            statistics: &statistics,
        };
        let mut recorder = Recorder::default();
        assert!(run(&mut session, &context, &mut recorder).is_err());
    }
}
