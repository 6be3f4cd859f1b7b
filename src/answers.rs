use crate::types::ReadyState;

// Status codes

/// Status code of a command that was accepted.
pub const SCIP_STATUS_OK: &str = "00";

/// Status code that precedes a scan frame while measuring.
pub const SCIP_STATUS_DATA: &str = "99";

/// `TM` status: the command was rejected.
pub const SCIP_STATUS_TM_INVALID: &str = "01";

/// `TM` status: time-adjust mode is not available in the current state.
pub const SCIP_STATUS_TM_UNAVAILABLE: &str = "04";

/// Statuses that make a `TM` command fail. Everything else is accepted,
/// including "already in that mode".
pub const SCIP_TM_FAILURE_STATUSES: [&str; 2] = [SCIP_STATUS_TM_INVALID, SCIP_STATUS_TM_UNAVAILABLE];

// Parameter (`PP`) tags

/// Sensor model.
pub const SCIP_TAG_MODEL: &str = "MODL";
/// Minimum measurable distance in millimeters.
pub const SCIP_TAG_MIN_DISTANCE: &str = "DMIN";
/// Maximum measurable distance in millimeters.
pub const SCIP_TAG_MAX_DISTANCE: &str = "DMAX";
/// Number of steps in a full revolution.
pub const SCIP_TAG_TOTAL_STEPS: &str = "ARES";
/// First usable step.
pub const SCIP_TAG_FIRST_STEP: &str = "AMIN";
/// Last usable step.
pub const SCIP_TAG_LAST_STEP: &str = "AMAX";
/// Step pointing straight ahead.
pub const SCIP_TAG_FRONT_STEP: &str = "AFRT";
/// Standard motor speed in RPM.
pub const SCIP_TAG_MOTOR_SPEED: &str = "SCAN";

// State (`II`) tags

/// Laser illumination state.
pub const SCIP_TAG_LASER: &str = "LASR";
/// Current motor speed.
pub const SCIP_TAG_SCAN_SPEED: &str = "SCSP";
/// Measurement mode.
pub const SCIP_TAG_MEASUREMENT_MODE: &str = "MESM";
/// Serial bit rate.
pub const SCIP_TAG_BIT_RATE: &str = "SBPS";
/// Device time stamp.
pub const SCIP_TAG_TIME: &str = "TIME";
/// Self-diagnostic result.
pub const SCIP_TAG_STATUS: &str = "STAT";

/// Separator between a field tag and its value.
pub const SCIP_FIELD_SEPARATOR: char = ':';

/// Marker that ends a field value, placed right before the checksum character.
pub const SCIP_FIELD_TERMINATOR: char = ';';

/// Returns `true` for the statuses that report a malformed request rather than
/// a device condition. Retrying such a request cannot succeed.
pub fn is_parameter_error(status: &str) -> bool {
    matches!(
        status,
        "0A" | "0B" | "0C" | "0D" | "0E" | "0F" | "0G" | "0H" | "0I"
            | "01" | "02" | "03" | "04" | "05" | "06" | "07"
    )
}

/// Human readable description of a status code.
pub fn status_message(status: &str) -> &'static str {
    match status {
        "00" => "Command received without any error.",
        "99" => "Command received, data follows.",
        "0A" => "Unable to create transmission data or reply command internally.",
        "0B" => "Buffer shortage or command repeated that is already processed.",
        "0C" => "Command with insufficient parameters 1.",
        "0D" => "Undefined command 1.",
        "0E" => "Undefined command 2.",
        "0F" => "Command with insufficient parameters 2.",
        "0G" => "String Character in command exceeds 16 letters.",
        "0H" => "String Character has invalid letters.",
        "0I" => "Sensor is now in firmware update mode.",
        "01" => "Starting step has non-numeric value.",
        "02" => "End step has non-numeric value.",
        "03" => "Cluster count has non-numeric value.",
        "04" => "End step is out of range.",
        "05" => "End step is smaller than starting step.",
        "06" => "Scan interval has non-numeric value.",
        "07" => "Number of scan has non-numeric value.",
        "98" => "Resumption of process after confirming normal laser operation.",
        _ => match status.parse::<u8>() {
            Ok(21..=49) => "Processing stopped to verify the error.",
            Ok(50..=97) => "Hardware trouble (such as laser, motor malfunctions etc.).",
            _ => "Unknown status code.",
        },
    }
}

/// Classifies the status of a distance acquisition request.
pub fn classify_scan_status(status: &str) -> ReadyState {
    if status == SCIP_STATUS_OK || status == SCIP_STATUS_DATA {
        ReadyState::Ready
    } else if is_parameter_error(status) {
        ReadyState::Error(status.to_owned())
    } else {
        ReadyState::Busy(status.to_owned())
    }
}
