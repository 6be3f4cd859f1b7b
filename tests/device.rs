use hokuyo::sim::{ManualClock, SimConfig, SimulatedDevice};
use hokuyo::{
    Device, DeviceOptions, DeviceState, EpochClock, Error, InitPhase, Scan, ScanListener,
    StreamMode,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options() -> DeviceOptions {
    DeviceOptions {
        read_timeout: Duration::from_secs(5),
        ready_poll_interval: Duration::from_millis(1),
        ..DeviceOptions::default()
    }
}

fn open(
    config: SimConfig,
    options: DeviceOptions,
) -> (Device<SimulatedDevice>, SimulatedDevice, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::with_step(10_000, 1));
    let sensor = SimulatedDevice::with_clock(config, clock.clone());
    let device = Device::open_with(Box::new(sensor.clone()), options, clock.clone())
        .expect("device should open");
    (device, sensor, clock)
}

#[derive(Clone, Default)]
struct Shared {
    scans: Arc<Mutex<Vec<Scan>>>,
    dropped: Arc<Mutex<usize>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl ScanListener for Shared {
    fn on_new_scan(&mut self, scan: Scan) {
        self.scans.lock().unwrap().push(scan);
    }

    fn on_scan_dropped(&mut self, _error: &Error) {
        *self.dropped.lock().unwrap() += 1;
    }

    fn on_stream_error(&mut self, error: &Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn open_reads_configuration() {
    init_logging();
    let (device, sensor, _clock) = open(SimConfig::default(), options());

    assert_eq!(device.state(), DeviceState::Idle);
    let configuration = device.configuration();
    assert_eq!(configuration.model(), "URG-04LX");
    assert_eq!(configuration.front_step(), 384);
    assert_eq!(configuration.total_steps(), 1024);

    let commands = sensor.commands();
    assert_eq!(&commands[..4], &["QT", "TM2", "RS", "SCIP2.0"]);
    assert_eq!(commands.last().map(String::as_str), Some("PP"));
}

#[test]
fn open_fails_on_bad_diagnostic() {
    init_logging();
    let clock = Arc::new(ManualClock::with_step(0, 1));
    let sensor = SimulatedDevice::with_clock(
        SimConfig {
            diagnostic: "Motor speed abnormal.".to_owned(),
            ..SimConfig::default()
        },
        clock.clone(),
    );

    let err = Device::open_with(Box::new(sensor.clone()), options(), clock).unwrap_err();
    assert_eq!(err.init_phase(), Some(InitPhase::DiagnosticCheck));
    assert!(!sensor.commands().iter().any(|c| c.starts_with("MD")));
}

#[test]
fn open_fails_when_sensor_stays_busy() {
    init_logging();
    let clock = Arc::new(ManualClock::with_step(0, 1));
    let sensor = SimulatedDevice::with_clock(
        SimConfig {
            busy_polls: 10,
            ..SimConfig::default()
        },
        clock.clone(),
    );
    let options = DeviceOptions {
        ready_poll_attempts: 3,
        ..options()
    };

    let err = Device::open_with(Box::new(sensor), options, clock).unwrap_err();
    assert_eq!(err.init_phase(), Some(InitPhase::WaitUntilReady));
}

#[test]
fn open_waits_for_busy_sensor() {
    init_logging();
    let (device, sensor, _clock) = open(
        SimConfig {
            busy_polls: 3,
            ..SimConfig::default()
        },
        options(),
    );
    assert_eq!(device.state(), DeviceState::Idle);

    let requests = sensor.commands().iter().filter(|c| c.starts_with("MD")).count();
    // Three refused polls, the accepted one, then the calibration scans.
    assert_eq!(requests, 3 + 1 + 11);
}

#[test]
fn invalid_options_are_rejected_before_talking() {
    init_logging();
    let sensor = SimulatedDevice::new(SimConfig::default());
    let err = Device::open_with(
        Box::new(sensor.clone()),
        DeviceOptions::batched(0),
        Arc::new(ManualClock::new(0)),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration { .. }));
    assert!(sensor.commands().is_empty());
}

#[test]
fn calibration_measures_clock_offset_and_latency() {
    init_logging();
    let (device, _sensor, _clock) = open(
        SimConfig {
            clock_offset_millis: 500,
            scan_latency_millis: 30,
            ..SimConfig::default()
        },
        options(),
    );

    let clock_state = device.clock_state().unwrap();
    assert!((clock_state.offset_millis - 500).abs() <= 5);
    let latency = device.scan_time_offset().unwrap();
    assert!((-35..=-30).contains(&latency), "latency {}", latency);
}

#[test]
fn single_scan_is_timestamped_at_capture() {
    init_logging();
    let (mut device, _sensor, clock) = open(
        SimConfig {
            clock_offset_millis: 500,
            scan_latency_millis: 30,
            ..SimConfig::default()
        },
        options(),
    );

    let before = clock.now_millis();
    let scan = device.grab_single_scan().unwrap();
    let after = clock.now_millis();

    assert_eq!(scan.len(), 769);
    assert!(scan.timestamp_millis >= before - 35);
    assert!(scan.timestamp_millis <= after - 30);
}

#[test]
fn continuous_stream_drops_corrupt_scans() {
    init_logging();
    let (mut device, sensor, _clock) = open(
        SimConfig {
            clock_offset_millis: 500,
            corrupt_frames: vec![3],
            scan_limit: Some(10),
            ..SimConfig::default()
        },
        options(),
    );
    let listener = Shared::default();

    device.start_scanning(listener.clone()).unwrap();
    assert!(device.is_scanning());
    wait_for(|| device.delivered_scans() + device.dropped_scans() == 10);
    device.stop_scanning().unwrap();

    let scans = listener.scans.lock().unwrap();
    let firsts: Vec<u32> = scans.iter().map(|s| s.ranges[0]).collect();
    assert_eq!(firsts, vec![1001, 1002, 1004, 1005, 1006, 1007, 1008, 1009, 1010]);
    assert_eq!(*listener.dropped.lock().unwrap(), 1);
    assert!(listener.errors.lock().unwrap().is_empty());
    assert_eq!(device.delivered_scans(), 9);
    assert_eq!(device.dropped_scans(), 1);
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(!sensor.is_measuring());
    assert_eq!(sensor.commands().last().map(String::as_str), Some("QT"));
}

#[test]
fn batched_stream_timestamps_follow_host_clock() {
    init_logging();
    let (mut device, _sensor, clock) = open(
        SimConfig {
            clock_offset_millis: 500,
            ..SimConfig::default()
        },
        DeviceOptions {
            stream_mode: StreamMode::Batched {
                scans_per_request: 5,
            },
            ..options()
        },
    );
    let listener = Shared::default();
    let started = clock.now_millis();

    device.start_scanning(listener.clone()).unwrap();
    wait_for(|| device.delivered_scans() >= 12);
    device.stop_scanning().unwrap();
    let stopped = clock.now_millis();

    let scans = listener.scans.lock().unwrap();
    assert!(scans.len() >= 12);
    assert_eq!(scans[0].ranges[0], 1001);
    assert_eq!(scans[4].ranges[0], 1005);
    assert_eq!(scans[5].ranges[0], 1001);
    for pair in scans.windows(2) {
        assert!(pair[0].timestamp_millis < pair[1].timestamp_millis);
    }
    for scan in scans.iter() {
        assert!(scan.timestamp_millis > started && scan.timestamp_millis < stopped);
    }
    assert!(listener.errors.lock().unwrap().is_empty());
}

#[test]
fn closures_are_listeners() {
    init_logging();
    let (mut device, _sensor, _clock) = open(SimConfig::default(), options());
    let seen = Arc::new(Mutex::new(0usize));
    let counter = seen.clone();

    device
        .start_scanning(move |_scan: Scan| *counter.lock().unwrap() += 1)
        .unwrap();
    wait_for(|| *seen.lock().unwrap() >= 3);
    device.stop_scanning().unwrap();
}

#[test]
fn commands_are_rejected_while_streaming() {
    init_logging();
    let (mut device, _sensor, _clock) = open(SimConfig::default(), options());

    assert!(matches!(device.stop_scanning(), Err(Error::NotStreaming)));
    device.start_scanning(Shared::default()).unwrap();
    assert!(matches!(
        device.start_scanning(Shared::default()),
        Err(Error::AlreadyStreaming)
    ));
    assert!(matches!(device.query_state(), Err(Error::StreamingInProgress)));
    assert!(matches!(device.grab_single_scan(), Err(Error::StreamingInProgress)));
    assert!(device.clock_state().is_none());

    device.stop_scanning().unwrap();
    let state = device.query_state().unwrap();
    assert_eq!(state.sensor_diagnostic(), "Sensor works well.");
    assert!(device.clock_state().is_some());
}

#[test]
fn stream_error_reaches_listener() {
    init_logging();
    let (mut device, _sensor, _clock) = open(
        SimConfig {
            scan_limit: Some(2),
            ..SimConfig::default()
        },
        DeviceOptions {
            read_timeout: Duration::from_millis(50),
            ..options()
        },
    );
    let listener = Shared::default();

    device.start_scanning(listener.clone()).unwrap();
    wait_for(|| !listener.errors.lock().unwrap().is_empty());
    assert_eq!(device.delivered_scans(), 2);

    // The loop has ended on its own; stopping still recovers the channel.
    device.stop_scanning().unwrap();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(device.grab_single_scan().is_ok());
}

#[test]
fn shutdown_is_idempotent() {
    init_logging();
    let (mut device, sensor, _clock) = open(SimConfig::default(), options());

    device.start_scanning(Shared::default()).unwrap();
    device.shutdown();
    assert_eq!(device.state(), DeviceState::Shutdown);
    assert!(!sensor.is_measuring());

    device.shutdown();
    assert_eq!(device.state(), DeviceState::Shutdown);
    assert!(matches!(device.query_state(), Err(Error::ChannelClosed)));
    assert!(matches!(
        device.start_scanning(Shared::default()),
        Err(Error::ChannelClosed)
    ));
}

#[test]
fn open_recovers_sensor_left_streaming() {
    init_logging();
    let clock = Arc::new(ManualClock::with_step(10_000, 1));
    let sensor = SimulatedDevice::with_clock(SimConfig::default(), clock.clone());
    let mut stale = sensor.clone();
    std::io::Write::write_all(&mut stale, b"MD0000076800000\n").unwrap();
    let mut buffer = [0u8; 48];
    std::io::Read::read(&mut stale, &mut buffer).unwrap();
    std::io::Read::read(&mut stale, &mut buffer).unwrap();
    assert!(sensor.is_measuring());

    let device = Device::open_with(Box::new(sensor.clone()), options(), clock).unwrap();
    assert_eq!(device.state(), DeviceState::Idle);
    assert_eq!(device.configuration().front_step(), 384);
}

#[test]
fn batched_stream_crosses_device_clock_wrap() {
    init_logging();
    let period: i64 = 1 << 24;
    // The device clock wraps a couple of hundred host readings after opening.
    let clock = Arc::new(ManualClock::with_step(period - 500 - 250, 1));
    let sensor = SimulatedDevice::with_clock(
        SimConfig {
            clock_offset_millis: 500,
            ..SimConfig::default()
        },
        clock.clone(),
    );
    let mut device = Device::open_with(
        Box::new(sensor),
        DeviceOptions {
            stream_mode: StreamMode::Batched {
                scans_per_request: 5,
            },
            ..options()
        },
        clock.clone(),
    )
    .unwrap();
    let listener = Shared::default();

    device.start_scanning(listener.clone()).unwrap();
    wait_for(|| device.delivered_scans() >= 150);
    device.stop_scanning().unwrap();

    let scans = listener.scans.lock().unwrap();
    for pair in scans.windows(2) {
        let step = pair[1].timestamp_millis - pair[0].timestamp_millis;
        assert!((1..=20).contains(&step), "timestamp step {}", step);
    }
    let last = scans.last().unwrap().timestamp_millis;
    assert!(last > period - 500 && last < clock.now_millis());
    assert_eq!(device.clock_state().unwrap().offset_millis, 500);
    assert!(listener.errors.lock().unwrap().is_empty());
}
