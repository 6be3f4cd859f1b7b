use crate::base::{Error, Result};

const CHECKSUM_MASK: u32 = 0x3F;
const CHECKSUM_BIAS: u8 = 0x30;

/// Calculates the 6-bit additive checksum that terminates SCIP 2.0 lines.
///
/// This is a plain modular sum, so it catches most single-byte corruption but
/// not swapped bytes or errors that cancel out. It is not cryptographic.
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    /// Creates a new `Checksum` instance, initialized to 0.
    #[inline]
    pub fn new() -> Checksum {
        Checksum { sum: 0 }
    }

    /// Includes a slice of bytes in the checksum calculation.
    #[inline]
    pub fn push_slice(&mut self, data: &[u8]) {
        for d in data {
            self.sum = self.sum.wrapping_add(*d as u32);
        }
    }

    /// Returns the checksum character: the low six bits of the sum plus `0x30`.
    #[inline]
    pub fn checksum(&self) -> u8 {
        (self.sum & CHECKSUM_MASK) as u8 + CHECKSUM_BIAS
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the checksum character for `data`.
pub fn checksum(data: &[u8]) -> u8 {
    let mut checksum = Checksum::new();
    checksum.push_slice(data);
    checksum.checksum()
}

/// Splits the trailing checksum character off `line` and verifies it.
///
/// Returns the payload on success and [`Error::ChecksumMismatch`] otherwise.
/// Lines holding non-ASCII bytes never verify.
pub fn verify_checksum(line: &[u8]) -> Result<&[u8]> {
    let (received, data) = line
        .split_last()
        .ok_or_else(|| Error::protocol("empty line supplied to checksum verification"))?;
    let calculated = checksum(data);
    if calculated == *received && line.is_ascii() {
        Ok(data)
    } else {
        Err(Error::ChecksumMismatch {
            expected: calculated as char,
            actual: *received as char,
        })
    }
}
