//! Circular time-of-day rebasing
//!
//! A load test run on Tuesday at 03:12 and one run on Friday at 14:55 chart
//! on top of each other once both are shifted so their first request lands on
//! the same wall-clock time of day. The shift is a single signed millisecond
//! offset computed here, wraparound-normalized so a run near midnight moves
//! the short way around the clock.

use std::str::FromStr;

use tracing::debug;

/// Milliseconds in a 24 hour day.
pub const DAY_MS: i64 = 24 * 3600 * 1000;

/// Milliseconds in half a day, the wraparound tie point.
pub const HALF_DAY_MS: i64 = 12 * 3600 * 1000;

/// Errors produced when parsing a [`RebaseTime`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The text did not follow the required pattern.
    #[error("Invalid time format for rebase time, must follow HH:mm:ss")]
    InvalidFormat,
}

/// Signed millisecond offset rebasing `observed` onto `desired`, both given
/// as milliseconds since midnight.
///
/// The result lies in `(-12h, +12h]`: when the naive difference crosses half
/// a day the offset wraps the other way around the clock, and the tie at
/// exactly twelve hours goes to the positive branch. Total over all inputs
/// in `[0, 24h)`.
#[must_use]
pub fn offset_ms(observed: i64, desired: i64) -> i64 {
    let offset = if desired - observed > HALF_DAY_MS {
        desired - observed - DAY_MS
    } else if observed - desired >= HALF_DAY_MS {
        DAY_MS + desired - observed
    } else {
        desired - observed
    };
    debug!("observed: {observed}, desired: {desired}, offset_ms: {offset}");
    offset
}

/// A desired time of day, parsed from strict `HH:mm:ss` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebaseTime {
    seconds_since_midnight: u32,
}

impl RebaseTime {
    /// The desired time of day as milliseconds since midnight.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        i64::from(self.seconds_since_midnight) * 1000
    }

    /// The signed offset that moves `observed_ms_since_midnight` onto this
    /// time of day.
    #[must_use]
    pub fn offset_from(&self, observed_ms_since_midnight: i64) -> i64 {
        offset_ms(observed_ms_since_midnight, self.as_millis())
    }
}

impl FromStr for RebaseTime {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = input.as_bytes();
        if bytes.len() != 8 || bytes[2] != b':' || bytes[5] != b':' {
            return Err(Error::InvalidFormat);
        }
        let hours: u32 = input[0..2].parse().map_err(|_| Error::InvalidFormat)?;
        let minutes: u32 = input[3..5].parse().map_err(|_| Error::InvalidFormat)?;
        let seconds: u32 = input[6..8].parse().map_err(|_| Error::InvalidFormat)?;
        if hours > 23 || minutes > 59 || seconds > 59 {
            return Err(Error::InvalidFormat);
        }
        Ok(Self {
            seconds_since_midnight: hours * 3600 + minutes * 60 + seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    const HOUR_MS: i64 = 3600 * 1000;

    #[test]
    fn hour_table_oracle() {
        // (observed hour, desired hour, expected offset in hours)
        let table: &[(i64, i64, i64)] = &[
            (0, 0, 0),
            (0, 1, 1),
            (0, 11, 11),
            (0, 12, 12),
            (0, 13, -11),
            (0, 23, -1),
            (23, 0, 1),
            (23, 1, 2),
            (23, 11, 12),
            (23, 12, -11),
            (23, 13, -10),
            (23, 23, 0),
            (3, 4, 1),
            (3, 2, -1),
            (3, 23, -4),
            (3, 14, 11),
            (3, 15, 12),
            (3, 16, -11),
        ];

        for &(observed, desired, expected) in table {
            assert_eq!(
                offset_ms(observed * HOUR_MS, desired * HOUR_MS),
                expected * HOUR_MS,
                "observed {observed}h, desired {desired}h"
            );
        }
    }

    #[test]
    fn tie_at_twelve_hours_goes_positive() {
        assert_eq!(offset_ms(0, HALF_DAY_MS), HALF_DAY_MS);
        assert_eq!(offset_ms(HALF_DAY_MS, 0), HALF_DAY_MS);
    }

    #[test]
    fn parses_valid_times() {
        let t: RebaseTime = "00:00:00".parse().expect("midnight parses");
        assert_eq!(t.as_millis(), 0);

        let t: RebaseTime = "13:45:30".parse().expect("valid time parses");
        assert_eq!(t.as_millis(), (13 * 3600 + 45 * 60 + 30) * 1000);

        let t: RebaseTime = "23:59:59".parse().expect("last second parses");
        assert_eq!(t.as_millis(), (23 * 3600 + 59 * 60 + 59) * 1000);
    }

    #[test]
    fn rejects_malformed_times() {
        for input in [
            "24:00:00", "00:60:00", "00:00:60", "0:00:00", "00-00-00", "000000", "00:00", "",
            "aa:bb:cc", "-1:00:00",
        ] {
            assert!(
                input.parse::<RebaseTime>().is_err(),
                "{input:?} should not parse"
            );
        }
    }

    proptest! {
        #[test]
        fn offset_stays_in_half_day_band(
            observed in 0_i64..DAY_MS,
            desired in 0_i64..DAY_MS,
        ) {
            let offset = offset_ms(observed, desired);
            prop_assert!(offset > -HALF_DAY_MS);
            prop_assert!(offset <= HALF_DAY_MS);
        }

        #[test]
        fn applying_offset_lands_on_desired(
            observed in 0_i64..DAY_MS,
            desired in 0_i64..DAY_MS,
        ) {
            let offset = offset_ms(observed, desired);
            prop_assert_eq!((observed + offset).rem_euclid(DAY_MS), desired);
        }
    }
}
