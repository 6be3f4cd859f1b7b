use crate::base::{Error, Result};
use std::fmt;

// Commands answered with a status line and terminator

/// Reset command. Stops any measurement and returns the sensor to its power-on state.
pub const SCIP_CMD_RESET: &str = "RS";

/// Enter time-adjust mode.
pub const SCIP_CMD_TIME_ADJUST_ENTER: &str = "TM0";

/// Read the device timestamp. Only valid in time-adjust mode.
pub const SCIP_CMD_TIME_ADJUST_READ: &str = "TM1";

/// Leave time-adjust mode.
pub const SCIP_CMD_TIME_ADJUST_LEAVE: &str = "TM2";

/// Switch a SCIP 1.1 firmware to SCIP 2.0. Older firmware does not know it.
pub const SCIP_CMD_SWITCH_TO_SCIP2: &str = "SCIP2.0";

/// Stop the measurement and switch the laser off.
pub const SCIP_CMD_QUIT: &str = "QT";

// Commands answered with `TAG:value;checksum` field lines

/// Query version-independent device parameters (`MODL`, `DMIN`, `DMAX`, ...).
pub const SCIP_CMD_PARAMETERS: &str = "PP";

/// Query the device state (`MODL`, `LASR`, `SCSP`, ..., `STAT`).
pub const SCIP_CMD_STATE: &str = "II";

// Distance acquisition

/// Prefix of the distance acquisition command with 3-character range encoding.
pub const SCIP_CMD_MEASURE: &str = "MD";

/// Field widths of the `MD` command, in order: start step, end step, cluster
/// count, scan interval and number of scans.
pub const SCIP_MD_FIELD_WIDTHS: [usize; 5] = [4, 4, 2, 1, 2];

/// Total length of an `MD` command line: the prefix plus [`SCIP_MD_FIELD_WIDTHS`].
pub const SCIP_MD_COMMAND_LEN: usize = 15;

/// Number of scans value that requests an unbounded stream.
pub const SCIP_MD_CONTINUOUS: u8 = 0;

/// Largest finite number of scans a single `MD` command can request.
pub const SCIP_MD_MAX_SCANS: u8 = 99;

/// Parameters of an `MD` distance acquisition request.
///
/// # Example
/// ```rust
/// # use hokuyo::cmds::ScanCommand;
/// let cmd = ScanCommand::new(0, 768, 1);
/// assert_eq!(cmd.to_string(), "MD0000076800001");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCommand {
    /// First step to measure.
    pub start_step: u16,
    /// Last step to measure, inclusive.
    pub end_step: u16,
    /// Number of adjacent steps merged into one reading. `0` and `1` both mean no merging.
    pub cluster_count: u8,
    /// Number of scans skipped between two transmitted scans.
    pub scan_interval: u8,
    /// Number of scans to transmit. [`SCIP_MD_CONTINUOUS`] streams until `QT`.
    pub scan_count: u8,
}

impl ScanCommand {
    /// Request `scan_count` unclustered scans over `start_step..=end_step`.
    pub fn new(start_step: u16, end_step: u16, scan_count: u8) -> ScanCommand {
        ScanCommand {
            start_step,
            end_step,
            cluster_count: 0,
            scan_interval: 0,
            scan_count,
        }
    }

    /// Same request with a different number of scans.
    pub fn with_scan_count(self, scan_count: u8) -> ScanCommand {
        ScanCommand { scan_count, ..self }
    }

    /// Checks that every field fits the fixed width of its slot.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("start step", self.start_step as u32),
            ("end step", self.end_step as u32),
            ("cluster count", self.cluster_count as u32),
            ("scan interval", self.scan_interval as u32),
            ("scan count", self.scan_count as u32),
        ];
        for ((name, value), width) in fields.iter().zip(SCIP_MD_FIELD_WIDTHS.iter()) {
            if *value >= 10u32.pow(*width as u32) {
                return Err(Error::protocol(format!(
                    "{} {} does not fit in {} digits",
                    name, value, width
                )));
            }
        }
        if self.start_step > self.end_step {
            return Err(Error::protocol(format!(
                "start step {} is past end step {}",
                self.start_step, self.end_step
            )));
        }
        Ok(())
    }

    /// Returns the command line to write, after validating it.
    pub fn encode(&self) -> Result<String> {
        self.validate()?;
        Ok(self.to_string())
    }

    /// Returns `true` if `echo` is a frame echo of this command.
    ///
    /// While streaming, the device repeats the command with the number of
    /// scans still to come in place of the requested number, so only the
    /// prefix is compared.
    pub fn matches_echo(&self, echo: &str) -> bool {
        let command = self.to_string();
        echo.len() == SCIP_MD_COMMAND_LEN
            && echo.is_char_boundary(SCIP_MD_COMMAND_LEN - 2)
            && echo[..SCIP_MD_COMMAND_LEN - 2] == command[..SCIP_MD_COMMAND_LEN - 2]
    }

    /// Extracts the remaining scan count from a frame echo.
    pub fn remaining_scans(&self, echo: &str) -> Result<u8> {
        if !self.matches_echo(echo) {
            return Err(Error::EchoMismatch {
                expected: self.to_string(),
                actual: echo.to_owned(),
            });
        }
        let count = &echo[SCIP_MD_COMMAND_LEN - 2..];
        if !count.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::protocol(format!(
                "invalid remaining scan count in {:?}",
                echo
            )));
        }
        Ok(count.bytes().fold(0, |n, b| n * 10 + (b - b'0')))
    }
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}{:04}{:02}{:01}{:02}",
            SCIP_CMD_MEASURE,
            self.start_step,
            self.end_step,
            self.cluster_count,
            self.scan_interval,
            self.scan_count
        )
    }
}
