//! Fence tokens: 15-digit, zero-padded, lexicographically comparable
//! decimal strings.

use crate::error::{CoreError, ErrorContext};
use std::fmt;

/// Upper bound (exclusive) on a fence token's numeric value: `10^15`.
pub const FENCE_CAPACITY: u64 = 1_000_000_000_000_000;

/// Digit width of a formatted fence token.
pub const FENCE_DIGITS: usize = 15;

/// A monotonic fence counter value in `[0, 10^15 - 1]`. Comparison is
/// defined by its decimal-string form, which by construction (fixed-width
/// zero-padding) coincides with numeric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct FenceToken(u64);

impl FenceToken {
    /// The zero token. Fence counters start here before the first increment.
    pub const ZERO: FenceToken = FenceToken(0);

    /// Construct a fence token, validating the capacity bound. Overflow of
    /// the fence counter past `10^15` is a fatal internal error, not a
    /// silent wraparound.
    pub fn new(value: u64) -> Result<Self, CoreError> {
        if value >= FENCE_CAPACITY {
            return Err(CoreError::invalid_argument_with(
                format!("fence token {value} exceeds capacity 10^{FENCE_DIGITS}"),
                ErrorContext::new(),
            ));
        }
        Ok(FenceToken(value))
    }

    /// The next fence token after this one. Returns an error, rather than
    /// wrapping, at the capacity boundary — the system must refuse to issue
    /// a token past the declared capacity.
    pub fn next(self) -> Result<Self, CoreError> {
        FenceToken::new(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// `true` once the counter has crossed the operator-visible warning
    /// threshold: 1% of capacity, i.e. `10^13`.
    pub fn is_near_capacity(self) -> bool {
        self.0 >= FENCE_CAPACITY / 100
    }

    /// Parse a 15-digit zero-padded decimal string back into a token.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.len() != FENCE_DIGITS || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::invalid_argument_with(
                format!("fence token must be exactly {FENCE_DIGITS} decimal digits"),
                ErrorContext::new(),
            ));
        }
        let value: u64 = raw
            .parse()
            .map_err(|_| CoreError::invalid_argument("fence token is not a valid integer"))?;
        FenceToken::new(value)
    }
}

impl TryFrom<u64> for FenceToken {
    type Error = CoreError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        FenceToken::new(value)
    }
}

impl From<FenceToken> for u64 {
    fn from(token: FenceToken) -> Self {
        token.0
    }
}

impl fmt::Display for FenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = FENCE_DIGITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_formats_as_fifteen_zeros() {
        assert_eq!(FenceToken::ZERO.to_string(), "0".repeat(15));
    }

    #[test]
    fn max_value_accepted_next_rejected() {
        let max = FenceToken::new(FENCE_CAPACITY - 1).unwrap();
        assert_eq!(max.to_string().len(), 15);
        assert!(max.next().is_err());
    }

    #[test]
    fn string_comparison_matches_numeric_comparison() {
        let a = FenceToken::new(9).unwrap();
        let b = FenceToken::new(10).unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn parse_roundtrips_display() {
        let token = FenceToken::new(42).unwrap();
        let parsed = FenceToken::parse(&token.to_string()).unwrap();
        assert_eq!(token, parsed);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        assert!(FenceToken::parse("123").is_err());
    }

    #[test]
    fn capacity_rejected() {
        assert!(FenceToken::new(FENCE_CAPACITY).is_err());
    }

    #[test]
    fn near_capacity_warning_threshold_is_one_percent_of_capacity() {
        let below = FenceToken::new(FENCE_CAPACITY / 100 - 1).unwrap();
        let at = FenceToken::new(FENCE_CAPACITY / 100).unwrap();
        assert!(!below.is_near_capacity());
        assert!(at.is_near_capacity());
    }
}
