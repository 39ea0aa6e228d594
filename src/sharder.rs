//! Sharder implementation.
use md5;

use crate::model::PercentageRange;

pub trait Sharder {
    /// Map `input` to a percentage in `[0, 1]`.
    fn percentage_of(&self, input: impl AsRef<[u8]>) -> f64;

    /// Check whether `input` falls into `range`. The full range matches without hashing.
    fn in_range(&self, input: impl AsRef<[u8]>, range: &PercentageRange) -> bool {
        range.is_full() || range.contains(self.percentage_of(input))
    }
}

/// The default (and only) sharder.
///
/// Interprets the first four bytes of the MD5 digest as a big-endian signed integer and scales
/// its absolute value by 2^31, so `i32::MIN` maps to exactly `1.0`.
pub struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn percentage_of(&self, input: impl AsRef<[u8]>) -> f64 {
        let hash = md5::compute(input);
        let value = i32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (value as i64).abs() as f64 / (1u64 << 31) as f64
    }
}
