//! SCIP 2.0 character encoding.
//!
//! Integers are sent as groups of printable characters, each carrying six bits
//! of the value as `byte - 0x30`, most significant character first.

use crate::base::{Error, Result};
use log::trace;

const ENCODING_BIAS: u8 = 0x30;
const BITS_PER_CHAR: usize = 6;
const CHAR_MASK: u32 = 0x3F;

/// Largest character group that still fits a `u32`.
pub const MAX_CHARS_PER_VALUE: usize = 5;

fn check_width(num_chars: usize) -> Result<()> {
    if num_chars == 0 || num_chars > MAX_CHARS_PER_VALUE {
        return Err(Error::MalformedScanData {
            description: format!(
                "unsupported encoding width {} (expected 1..={})",
                num_chars, MAX_CHARS_PER_VALUE
            ),
        });
    }
    Ok(())
}

/// Decodes exactly `num_chars` characters from the front of `buffer`.
pub fn decode_value(buffer: &[u8], num_chars: usize) -> Result<u32> {
    check_width(num_chars)?;
    if buffer.len() < num_chars {
        return Err(Error::MalformedScanData {
            description: format!(
                "need {} characters to decode a value, got {}",
                num_chars,
                buffer.len()
            ),
        });
    }

    let mut value = 0u32;
    for &byte in &buffer[..num_chars] {
        let digit = byte.wrapping_sub(ENCODING_BIAS) as u32;
        if byte < ENCODING_BIAS || digit > CHAR_MASK {
            return Err(Error::MalformedScanData {
                description: format!("invalid encoded character {:?}", byte as char),
            });
        }
        value = (value << BITS_PER_CHAR) | digit;
    }
    Ok(value)
}

/// Decodes a whole buffer of fixed-width values, preserving their order.
///
/// The buffer length must be a multiple of `chars_per_value`.
pub fn decode_values(buffer: &[u8], chars_per_value: usize) -> Result<Vec<u32>> {
    check_width(chars_per_value)?;
    if buffer.len() % chars_per_value != 0 {
        return Err(Error::MalformedScanData {
            description: format!(
                "{} characters is not a multiple of {}",
                buffer.len(),
                chars_per_value
            ),
        });
    }

    let values = buffer
        .chunks_exact(chars_per_value)
        .map(|chunk| decode_value(chunk, chars_per_value))
        .collect::<Result<Vec<u32>>>()?;
    trace!(
        "Decoded {} values of {} characters each",
        values.len(),
        chars_per_value
    );
    Ok(values)
}

/// Encodes `value` into `num_chars` characters.
///
/// Fails if the value needs more than `6 * num_chars` bits.
pub fn encode_value(value: u32, num_chars: usize) -> Result<Vec<u8>> {
    check_width(num_chars)?;
    let bits = BITS_PER_CHAR * num_chars;
    if bits < 32 && value >> bits != 0 {
        return Err(Error::MalformedScanData {
            description: format!("value {} does not fit in {} characters", value, num_chars),
        });
    }

    Ok((0..num_chars)
        .rev()
        .map(|i| ((value >> (i * BITS_PER_CHAR)) & CHAR_MASK) as u8 + ENCODING_BIAS)
        .collect())
}

/// Encodes a sequence of values with a fixed width each.
pub fn encode_values(values: &[u32], chars_per_value: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * chars_per_value);
    for &value in values {
        out.extend(encode_value(value, chars_per_value)?);
    }
    Ok(out)
}
