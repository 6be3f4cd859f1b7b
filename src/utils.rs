use crate::base::{Error, Result};
use crate::configuration::Configuration;
use crate::types::Scan;
use log::trace;

/// Returns the median of `samples`, or `None` if there are none.
///
/// For an even number of samples the two middle values are averaged, rounding
/// toward negative infinity.
pub fn median(samples: &[i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]).div_euclid(2)
    };
    trace!("Median of {} samples: {}", samples.len(), median);
    Some(median)
}

/// Returns the readings of `scan` outside the blind zone, i.e. steps
/// `first_step..=last_step` of `configuration`.
///
/// The scan must start at step 0, which is what [`Device`](crate::Device) requests.
///
/// # Arguments
///
/// * `scan` - A scan delivered by the device.
/// * `configuration` - The configuration of the device that produced it.
pub fn usable_ranges<'a>(scan: &'a Scan, configuration: &Configuration) -> Result<&'a [u32]> {
    let first = configuration.first_step() as usize;
    let last = configuration.last_step() as usize;
    if last >= scan.ranges.len() {
        return Err(Error::MalformedScanData {
            description: format!(
                "scan has {} readings but the last usable step is {}",
                scan.ranges.len(),
                last
            ),
        });
    }
    Ok(&scan.ranges[first..=last])
}

/// Converts millimeter readings to meters.
///
/// Readings outside `min_distance..=max_distance` are error codes and become `NaN`.
pub fn ranges_in_meters(ranges: &[u32], configuration: &Configuration) -> Vec<f32> {
    let valid = configuration.min_distance()..=configuration.max_distance();
    ranges
        .iter()
        .map(|&r| {
            if valid.contains(&r) {
                r as f32 / 1000.0
            } else {
                f32::NAN
            }
        })
        .collect()
}
