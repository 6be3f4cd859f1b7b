use std::fmt;
use std::io;
use thiserror::Error;

/// The initialization step of [`Device::open`](crate::Device::open) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    /// Leaving time-adjust mode, resetting and switching to SCIP 2.0.
    Reset,
    /// Reading the `II` state and comparing the sensor diagnostic.
    DiagnosticCheck,
    /// Polling with single-scan requests until the motor is up to speed.
    WaitUntilReady,
    /// Measuring the clock offset and the scan latency.
    Calibration,
    /// Reading the `PP` parameter block.
    QueryConfiguration,
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitPhase::Reset => "reset",
            InitPhase::DiagnosticCheck => "diagnostic check",
            InitPhase::WaitUntilReady => "wait until ready",
            InitPhase::Calibration => "clock calibration",
            InitPhase::QueryConfiguration => "configuration query",
        };
        f.write_str(name)
    }
}

/// Represents errors that can occur while talking to a SCIP 2.0 device.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred on the underlying stream (e.g., serial port).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// No complete line arrived within the configured read timeout.
    #[error("device timeout")]
    DeviceTimeout,

    /// A blocking read was abandoned because cancellation was requested.
    #[error("operation cancelled")]
    Cancelled,

    /// The channel has already been closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The device did not echo the command that was written.
    #[error("echo does not match command: \"{actual}\" != \"{expected}\"")]
    EchoMismatch { expected: String, actual: String },

    /// The device answered a command with a status code other than the accepted ones.
    #[error("unexpected status \"{status}\" for {command}: {message}")]
    UnexpectedStatus {
        command: String,
        status: String,
        message: &'static str,
    },

    /// The trailing checksum character of a line does not match its payload.
    #[error("checksum mismatch: expected {expected:?}, got {actual:?}")]
    ChecksumMismatch { expected: char, actual: char },

    /// Scan data could not be decoded into range readings.
    #[error("malformed scan data: {description}")]
    MalformedScanData { description: String },

    /// The byte stream does not follow the SCIP 2.0 framing.
    #[error("protocol error: {description}")]
    ProtocolError { description: String },

    /// A parameter block or the device options hold inconsistent values.
    #[error("invalid configuration: {description}")]
    InvalidConfiguration { description: String },

    /// The sensor reports it is not fit to measure.
    #[error("device not ready: {description}")]
    DeviceNotReady { description: String },

    /// `start_scanning` was called while the scanning loop is already running.
    #[error("scanning already started")]
    AlreadyStreaming,

    /// A command was issued while the scanning loop owns the channel.
    #[error("command rejected while streaming")]
    StreamingInProgress,

    /// `stop_scanning` was called while no scanning loop is running.
    #[error("scanning not started")]
    NotStreaming,

    /// Opening the device failed during the given phase.
    #[error("device initialization failed during {phase}: {source}")]
    Initialization {
        phase: InitPhase,
        #[source]
        source: Box<Error>,
    },

    /// The serial port could not be opened.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    pub(crate) fn protocol(description: impl Into<String>) -> Error {
        Error::ProtocolError {
            description: description.into(),
        }
    }

    pub(crate) fn in_phase(self, phase: InitPhase) -> Error {
        Error::Initialization {
            phase,
            source: Box::new(self),
        }
    }

    /// Returns the phase that failed if this is an initialization error.
    pub fn init_phase(&self) -> Option<InitPhase> {
        match self {
            Error::Initialization { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// A specialized `Result` type for SCIP 2.0 operations.
pub type Result<T> = std::result::Result<T, Error>;
