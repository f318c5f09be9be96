// Copyright 2024 the zonesync authors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Date-stamped SOA serial numbers.
//!
//! Serials follow the `YYYYMMDDNN` operator convention: the wire value is
//! `year * 10^6 + month * 10^4 + day * 10^2 + counter`, where the counter
//! restarts at 1 on the first change of a day and increments on each further
//! change. The counter occupies two decimal digits and saturates at 99.

use chrono::{Datelike, Local, NaiveDate};
use tracing::warn;

/// The two-digit per-day change counter cannot go past this.
const MAX_COUNTER: u32 = 99;

/// An SOA serial split into its date and per-day counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serial {
    year: u32,
    month: u32,
    day: u32,
    counter: u32,
}

impl Serial {
    /// Serial for the first change of today.
    pub fn today() -> Self {
        Self::for_date(Local::now().date_naive())
    }

    fn for_date(date: NaiveDate) -> Self {
        Self {
            year: date.year() as u32,
            month: date.month(),
            day: date.day(),
            counter: 1,
        }
    }

    /// Decode a wire serial. Any value is accepted; the projection is
    /// treated as canonical.
    pub fn from_u32(value: u32) -> Self {
        Self {
            year: value / 1_000_000,
            month: value / 10_000 % 100,
            day: value / 100 % 100,
            counter: value % 100,
        }
    }

    /// The `YYYYMMDDNN` wire projection.
    pub fn as_u32(&self) -> u32 {
        self.year * 1_000_000 + self.month * 10_000 + self.day * 100 + self.counter
    }

    /// The serial after one observed zone change.
    pub fn bumped(&self) -> Self {
        self.bumped_on(Local::now().date_naive())
    }

    fn bumped_on(&self, date: NaiveDate) -> Self {
        if self.year == date.year() as u32
            && self.month == date.month()
            && self.day == date.day()
        {
            if self.counter >= MAX_COUNTER {
                warn!(
                    serial = self.as_u32(),
                    "per-day serial counter saturated, further changes today keep the same serial"
                );
                return *self;
            }
            Self {
                counter: self.counter + 1,
                ..*self
            }
        } else {
            Self::for_date(date)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn projection() {
        let serial = Serial::for_date(date(2024, 3, 7));
        assert_eq!(serial.as_u32(), 2_024_030_701);
    }

    #[test]
    fn round_trip() {
        for value in [0, 2_024_030_701, 2_024_123_199, 1_999_000_000, 2_024_999_999] {
            assert_eq!(Serial::from_u32(value).as_u32(), value);
        }
    }

    #[test]
    fn bump_same_day_increments() {
        let serial = Serial::for_date(date(2024, 3, 7));
        let bumped = serial.bumped_on(date(2024, 3, 7));
        assert_eq!(bumped.as_u32(), 2_024_030_702);
    }

    #[test]
    fn bump_new_day_resets() {
        let mut serial = Serial::for_date(date(2024, 3, 7));
        serial = serial.bumped_on(date(2024, 3, 7));
        serial = serial.bumped_on(date(2024, 3, 8));
        assert_eq!(serial.as_u32(), 2_024_030_801);
    }

    #[test]
    fn bump_saturates_at_99() {
        let mut serial = Serial::for_date(date(2024, 3, 7));
        for _ in 0..200 {
            serial = serial.bumped_on(date(2024, 3, 7));
        }
        assert_eq!(serial.as_u32(), 2_024_030_799);
    }

    #[test]
    fn bump_is_monotone() {
        let mut serial = Serial::for_date(date(2024, 3, 7));
        let mut previous = serial.as_u32();
        for day in [7, 7, 7, 8, 9, 9] {
            serial = serial.bumped_on(date(2024, 3, day));
            assert!(serial.as_u32() > previous);
            previous = serial.as_u32();
        }
    }
}
