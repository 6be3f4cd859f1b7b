//! Device parameter (`PP`) and state (`II`) records.

use crate::answers::*;
use crate::base::{Error, Result};
use crate::codec::decode_value;
use crate::internals::SCIP_TIMESTAMP_ENCODING_CHARS;
use log::trace;
use std::f64::consts::TAU;

/// Static geometry and capabilities of a sensor, as reported by `PP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    model: String,
    min_distance: u32,
    max_distance: u32,
    total_steps: u32,
    first_step: u32,
    last_step: u32,
    front_step: u32,
    standard_motor_speed: u32,
}

impl Configuration {
    /// Sensor model, e.g. `URG-04LX`.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Minimum measurable distance in millimeters.
    pub fn min_distance(&self) -> u32 {
        self.min_distance
    }

    /// Maximum measurable distance in millimeters.
    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    /// Number of steps in a full revolution.
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// First step outside the blind zone.
    pub fn first_step(&self) -> u32 {
        self.first_step
    }

    /// Last step outside the blind zone.
    pub fn last_step(&self) -> u32 {
        self.last_step
    }

    /// Step pointing straight ahead.
    pub fn front_step(&self) -> u32 {
        self.front_step
    }

    /// Standard motor speed in revolutions per minute.
    pub fn standard_motor_speed(&self) -> u32 {
        self.standard_motor_speed
    }

    /// Angle between two adjacent steps, in radians.
    pub fn angle_increment(&self) -> f64 {
        TAU / self.total_steps as f64
    }

    /// Angle of `step` relative to the front step, in radians.
    pub fn step_angle(&self, step: u32) -> f64 {
        (step as f64 - self.front_step as f64) * self.angle_increment()
    }

    /// Angle of the first usable step, in radians.
    pub fn min_angle(&self) -> f64 {
        self.step_angle(self.first_step)
    }

    /// Angle of the last usable step, in radians.
    pub fn max_angle(&self) -> f64 {
        self.step_angle(self.last_step)
    }

    /// Time between two adjacent steps, in seconds.
    pub fn time_increment(&self) -> f64 {
        60.0 / (self.standard_motor_speed as f64 * self.total_steps as f64)
    }

    /// Duration of one revolution, in seconds.
    pub fn scan_time(&self) -> f64 {
        60.0 / self.standard_motor_speed as f64
    }
}

fn field_value<'a>(tag: &str, field: &'a str) -> Result<&'a str> {
    match field.split_once(SCIP_FIELD_SEPARATOR) {
        Some((actual, value)) if actual == tag => Ok(value),
        _ => Err(Error::protocol(format!(
            "expected field {}, got {:?}",
            tag, field
        ))),
    }
}

fn integer_field(tag: &str, field: &str) -> Result<u32> {
    let value = field_value(tag, field)?;
    value.trim().parse::<u32>().map_err(|_| {
        Error::protocol(format!("field {} has non-numeric value {:?}", tag, value))
    })
}

fn missing(tag: &str) -> Error {
    Error::InvalidConfiguration {
        description: format!("field {} was never set", tag),
    }
}

/// Collects the `PP` fields one by one and builds a validated [`Configuration`].
///
/// Every `parse_*` method checks the tag of the field it is given, so a
/// reply that is out of step with the expected sequence is detected at once.
///
/// # Example
/// ```rust
/// # use hokuyo::ConfigurationBuilder;
/// let mut builder = ConfigurationBuilder::new();
/// builder.parse_model("MODL:URG-04LX").unwrap();
/// builder.parse_min_distance("DMIN:20").unwrap();
/// builder.parse_max_distance("DMAX:4095").unwrap();
/// builder.parse_total_steps("ARES:1024").unwrap();
/// builder.parse_first_step("AMIN:44").unwrap();
/// builder.parse_last_step("AMAX:725").unwrap();
/// builder.parse_front_step("AFRT:384").unwrap();
/// builder.parse_standard_motor_speed("SCAN:600").unwrap();
/// let configuration = builder.build().unwrap();
/// assert_eq!(configuration.front_step(), 384);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    model: Option<String>,
    min_distance: Option<u32>,
    max_distance: Option<u32>,
    total_steps: Option<u32>,
    first_step: Option<u32>,
    last_step: Option<u32>,
    front_step: Option<u32>,
    standard_motor_speed: Option<u32>,
}

impl ConfigurationBuilder {
    /// Creates an empty builder.
    pub fn new() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Parses `MODL`, keeping everything after the tag.
    pub fn parse_model(&mut self, field: &str) -> Result<&mut Self> {
        self.model = Some(field_value(SCIP_TAG_MODEL, field)?.to_owned());
        Ok(self)
    }

    /// Parses `DMIN`, the minimum measurable distance in millimeters.
    pub fn parse_min_distance(&mut self, field: &str) -> Result<&mut Self> {
        self.min_distance = Some(integer_field(SCIP_TAG_MIN_DISTANCE, field)?);
        Ok(self)
    }

    /// Parses `DMAX`, the maximum measurable distance in millimeters.
    pub fn parse_max_distance(&mut self, field: &str) -> Result<&mut Self> {
        self.max_distance = Some(integer_field(SCIP_TAG_MAX_DISTANCE, field)?);
        Ok(self)
    }

    /// Parses `ARES`, the number of steps in a full revolution.
    pub fn parse_total_steps(&mut self, field: &str) -> Result<&mut Self> {
        self.total_steps = Some(integer_field(SCIP_TAG_TOTAL_STEPS, field)?);
        Ok(self)
    }

    /// Parses `AMIN`, the first measurable step.
    pub fn parse_first_step(&mut self, field: &str) -> Result<&mut Self> {
        self.first_step = Some(integer_field(SCIP_TAG_FIRST_STEP, field)?);
        Ok(self)
    }

    /// Parses `AMAX`, the last measurable step.
    pub fn parse_last_step(&mut self, field: &str) -> Result<&mut Self> {
        self.last_step = Some(integer_field(SCIP_TAG_LAST_STEP, field)?);
        Ok(self)
    }

    /// Parses `AFRT`, the step facing forward.
    pub fn parse_front_step(&mut self, field: &str) -> Result<&mut Self> {
        self.front_step = Some(integer_field(SCIP_TAG_FRONT_STEP, field)?);
        Ok(self)
    }

    /// Parses `SCAN`, the standard motor speed in rpm.
    pub fn parse_standard_motor_speed(&mut self, field: &str) -> Result<&mut Self> {
        self.standard_motor_speed = Some(integer_field(SCIP_TAG_MOTOR_SPEED, field)?);
        Ok(self)
    }

    /// Builds the configuration.
    ///
    /// Fails with [`Error::InvalidConfiguration`] if a field is missing or if
    /// the steps violate `first <= front <= last <= total`.
    pub fn build(&self) -> Result<Configuration> {
        let configuration = Configuration {
            model: self.model.clone().ok_or_else(|| missing(SCIP_TAG_MODEL))?,
            min_distance: self.min_distance.ok_or_else(|| missing(SCIP_TAG_MIN_DISTANCE))?,
            max_distance: self.max_distance.ok_or_else(|| missing(SCIP_TAG_MAX_DISTANCE))?,
            total_steps: self.total_steps.ok_or_else(|| missing(SCIP_TAG_TOTAL_STEPS))?,
            first_step: self.first_step.ok_or_else(|| missing(SCIP_TAG_FIRST_STEP))?,
            last_step: self.last_step.ok_or_else(|| missing(SCIP_TAG_LAST_STEP))?,
            front_step: self.front_step.ok_or_else(|| missing(SCIP_TAG_FRONT_STEP))?,
            standard_motor_speed: self
                .standard_motor_speed
                .ok_or_else(|| missing(SCIP_TAG_MOTOR_SPEED))?,
        };

        let c = &configuration;
        if c.total_steps == 0 || c.standard_motor_speed == 0 {
            return Err(Error::InvalidConfiguration {
                description: format!(
                    "total steps ({}) and motor speed ({}) must be positive",
                    c.total_steps, c.standard_motor_speed
                ),
            });
        }
        if !(c.first_step <= c.front_step
            && c.front_step <= c.last_step
            && c.last_step <= c.total_steps)
        {
            return Err(Error::InvalidConfiguration {
                description: format!(
                    "steps out of order: first {} front {} last {} total {}",
                    c.first_step, c.front_step, c.last_step, c.total_steps
                ),
            });
        }
        if c.min_distance > c.max_distance {
            return Err(Error::InvalidConfiguration {
                description: format!(
                    "minimum distance {} exceeds maximum distance {}",
                    c.min_distance, c.max_distance
                ),
            });
        }

        trace!("Built configuration: {:?}", configuration);
        Ok(configuration)
    }
}

/// Dynamic device state, as reported by `II`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    model: String,
    laser_illuminated: bool,
    motor_speed: String,
    measurement_mode: String,
    bit_rate: String,
    time_stamp: String,
    sensor_diagnostic: String,
}

impl State {
    /// Sensor model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the laser is switched on.
    pub fn laser_illuminated(&self) -> bool {
        self.laser_illuminated
    }

    /// Motor speed description, e.g. `600[rpm]`.
    pub fn motor_speed(&self) -> &str {
        &self.motor_speed
    }

    /// Measurement mode description.
    pub fn measurement_mode(&self) -> &str {
        &self.measurement_mode
    }

    /// Serial bit rate description.
    pub fn bit_rate(&self) -> &str {
        &self.bit_rate
    }

    /// Device time stamp as reported.
    pub fn time_stamp(&self) -> &str {
        &self.time_stamp
    }

    /// Device time stamp in milliseconds, if it can be read.
    ///
    /// Firmware reports it either as packed characters or in hex; the packed
    /// form is tried first.
    pub fn time_stamp_millis(&self) -> Option<u32> {
        let value = self.time_stamp.as_str();
        if value.len() == SCIP_TIMESTAMP_ENCODING_CHARS {
            if let Ok(millis) = decode_value(value.as_bytes(), SCIP_TIMESTAMP_ENCODING_CHARS) {
                return Some(millis);
            }
        }
        u32::from_str_radix(value, 16).ok()
    }

    /// Self-diagnostic message, `Sensor works well.` on a healthy sensor.
    pub fn sensor_diagnostic(&self) -> &str {
        &self.sensor_diagnostic
    }
}

/// Collects the `II` fields one by one and builds a [`State`].
#[derive(Debug, Clone, Default)]
pub struct StateBuilder {
    model: Option<String>,
    laser_illuminated: Option<bool>,
    motor_speed: Option<String>,
    measurement_mode: Option<String>,
    bit_rate: Option<String>,
    time_stamp: Option<String>,
    sensor_diagnostic: Option<String>,
}

impl StateBuilder {
    /// Creates an empty builder.
    pub fn new() -> StateBuilder {
        StateBuilder::default()
    }

    /// Parses `MODL`.
    pub fn parse_model(&mut self, field: &str) -> Result<&mut Self> {
        self.model = Some(field_value(SCIP_TAG_MODEL, field)?.to_owned());
        Ok(self)
    }

    /// Parses `LASR`. The value starts with `ON` or `OFF`.
    pub fn parse_laser_state(&mut self, field: &str) -> Result<&mut Self> {
        let value = field_value(SCIP_TAG_LASER, field)?;
        self.laser_illuminated = Some(value.starts_with("ON"));
        Ok(self)
    }

    /// Parses `SCSP`, kept as the device words it.
    pub fn parse_motor_speed(&mut self, field: &str) -> Result<&mut Self> {
        self.motor_speed = Some(field_value(SCIP_TAG_SCAN_SPEED, field)?.to_owned());
        Ok(self)
    }

    /// Parses `MESM`.
    pub fn parse_measurement_mode(&mut self, field: &str) -> Result<&mut Self> {
        self.measurement_mode = Some(field_value(SCIP_TAG_MEASUREMENT_MODE, field)?.to_owned());
        Ok(self)
    }

    /// Parses `SBPS`.
    pub fn parse_bit_rate(&mut self, field: &str) -> Result<&mut Self> {
        self.bit_rate = Some(field_value(SCIP_TAG_BIT_RATE, field)?.to_owned());
        Ok(self)
    }

    /// Parses `TIME`. The value is kept as reported; see [`State::time_stamp_millis`].
    pub fn parse_time_stamp(&mut self, field: &str) -> Result<&mut Self> {
        self.time_stamp = Some(field_value(SCIP_TAG_TIME, field)?.to_owned());
        Ok(self)
    }

    /// Parses `STAT`, the self-diagnostic message.
    pub fn parse_sensor_diagnostic(&mut self, field: &str) -> Result<&mut Self> {
        self.sensor_diagnostic = Some(field_value(SCIP_TAG_STATUS, field)?.to_owned());
        Ok(self)
    }

    /// Builds the state. Fails with [`Error::InvalidConfiguration`] if a field is missing.
    pub fn build(&self) -> Result<State> {
        Ok(State {
            model: self.model.clone().ok_or_else(|| missing(SCIP_TAG_MODEL))?,
            laser_illuminated: self.laser_illuminated.ok_or_else(|| missing(SCIP_TAG_LASER))?,
            motor_speed: self.motor_speed.clone().ok_or_else(|| missing(SCIP_TAG_SCAN_SPEED))?,
            measurement_mode: self
                .measurement_mode
                .clone()
                .ok_or_else(|| missing(SCIP_TAG_MEASUREMENT_MODE))?,
            bit_rate: self.bit_rate.clone().ok_or_else(|| missing(SCIP_TAG_BIT_RATE))?,
            time_stamp: self.time_stamp.clone().ok_or_else(|| missing(SCIP_TAG_TIME))?,
            sensor_diagnostic: self
                .sensor_diagnostic
                .clone()
                .ok_or_else(|| missing(SCIP_TAG_STATUS))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urg_04lx() -> ConfigurationBuilder {
        let mut builder = ConfigurationBuilder::new();
        builder
            .parse_model("MODL:URG-04LX")
            .unwrap()
            .parse_min_distance("DMIN:20")
            .unwrap()
            .parse_max_distance("DMAX:4095")
            .unwrap()
            .parse_total_steps("ARES:1024")
            .unwrap()
            .parse_first_step("AMIN:44")
            .unwrap()
            .parse_last_step("AMAX:725")
            .unwrap()
            .parse_front_step("AFRT:384")
            .unwrap()
            .parse_standard_motor_speed("SCAN:600")
            .unwrap();
        builder
    }

    #[test]
    fn builds_urg_04lx() {
        let c = urg_04lx().build().unwrap();
        assert_eq!(c.model(), "URG-04LX");
        assert_eq!(c.min_distance(), 20);
        assert_eq!(c.max_distance(), 4095);
        assert_eq!(c.total_steps(), 1024);
        assert_eq!(c.first_step(), 44);
        assert_eq!(c.last_step(), 725);
        assert_eq!(c.front_step(), 384);
        assert_eq!(c.standard_motor_speed(), 600);
    }

    #[test]
    fn derived_geometry() {
        let c = urg_04lx().build().unwrap();
        assert_eq!(c.angle_increment(), TAU / 1024.0);
        assert!((c.min_angle() - (44.0 - 384.0) * TAU / 1024.0).abs() < 1e-12);
        assert!((c.max_angle() - (725.0 - 384.0) * TAU / 1024.0).abs() < 1e-12);
        assert_eq!(c.step_angle(384), 0.0);
        assert!((c.scan_time() - 0.1).abs() < 1e-12);
        assert!((c.time_increment() - 0.1 / 1024.0).abs() < 1e-12);
    }

    #[test]
    fn wrong_tag_is_fatal() {
        let mut builder = ConfigurationBuilder::new();
        assert!(matches!(
            builder.parse_min_distance("DMAX:4095"),
            Err(Error::ProtocolError { .. })
        ));
        assert!(builder.parse_total_steps("ARES:lots").is_err());
        assert!(builder.parse_model("URG-04LX").is_err());
    }

    #[test]
    fn missing_field_is_reported() {
        let mut builder = urg_04lx();
        builder.front_step = None;
        match builder.build() {
            Err(Error::InvalidConfiguration { description }) => {
                assert!(description.contains("AFRT"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn step_order_is_enforced() {
        let mut builder = urg_04lx();
        builder.parse_front_step("AFRT:800").unwrap();
        assert!(matches!(
            builder.build(),
            Err(Error::InvalidConfiguration { .. })
        ));

        let mut builder = urg_04lx();
        builder.parse_last_step("AMAX:1025").unwrap();
        assert!(builder.build().is_err());
    }

    #[test]
    fn builds_state() {
        let mut builder = StateBuilder::new();
        builder
            .parse_model("MODL:URG-04LX(Hokuyo Automatic Co.,Ltd.)")
            .unwrap()
            .parse_laser_state("LASR:OFF")
            .unwrap()
            .parse_motor_speed("SCSP:Initial(600[rpm])")
            .unwrap()
            .parse_measurement_mode("MESM:Measuring by Normal Mode")
            .unwrap()
            .parse_bit_rate("SBPS:USB only")
            .unwrap()
            .parse_time_stamp("TIME:0BCD")
            .unwrap()
            .parse_sensor_diagnostic("STAT:Sensor works well.")
            .unwrap();
        let state = builder.build().unwrap();
        assert!(!state.laser_illuminated());
        assert_eq!(state.sensor_diagnostic(), "Sensor works well.");
        assert_eq!(state.model(), "URG-04LX(Hokuyo Automatic Co.,Ltd.)");
        assert_eq!(state.time_stamp(), "0BCD");
        assert_eq!(state.time_stamp_millis(), decode_value(b"0BCD", 4).ok());
    }

    fn state_with_time(time: &str) -> State {
        let mut builder = StateBuilder::new();
        builder
            .parse_model("MODL:UTM-30LX")
            .and_then(|b| b.parse_laser_state("LASR:ON"))
            .and_then(|b| b.parse_motor_speed("SCSP:2400"))
            .and_then(|b| b.parse_measurement_mode("MESM:Normal"))
            .and_then(|b| b.parse_bit_rate("SBPS:Ethernet 100[Mbps]"))
            .and_then(|b| b.parse_time_stamp(&format!("TIME:{}", time)))
            .and_then(|b| b.parse_sensor_diagnostic("STAT:Stable 000 no error."))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn hex_time_stamp() {
        assert_eq!(state_with_time("00a1f2").time_stamp_millis(), Some(0xa1f2));
    }

    #[test]
    fn unreadable_time_stamp_is_kept() {
        let state = state_with_time("n/a");
        assert_eq!(state.time_stamp(), "n/a");
        assert_eq!(state.time_stamp_millis(), None);
        assert!(state.laser_illuminated());
    }
}
