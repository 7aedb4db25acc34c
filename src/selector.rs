//! Record selection
//!
//! A request names a user and a calendar day. The day becomes the half-open
//! window `[midnight, midnight + 1 day)` in the offset the stored timestamps
//! were written in, and only that user's records inside it are scored.

use crate::error::ComputeError;
use crate::types::{RawRecord, UserKey};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The one-day window starting at local midnight of `date`
    pub fn for_date(date: NaiveDate, offset: FixedOffset) -> Result<Self, ComputeError> {
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| out_of_range(date))?;
        let start = offset
            .from_local_datetime(&midnight)
            .single()
            .ok_or_else(|| out_of_range(date))?
            .with_timezone(&Utc);
        let end = start
            .checked_add_signed(Duration::days(1))
            .ok_or_else(|| out_of_range(date))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

fn out_of_range(date: NaiveDate) -> ComputeError {
    ComputeError::InvalidRequest(format!("date {} is out of range", date))
}

/// Parse a fixed UTC offset: `Z`, `UTC`, `+02:00`, `-0530`
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let trimmed = raw.trim();
    let invalid = || format!("{:?} is not a UTC offset like +02:00", raw);

    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match trimmed.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Key-and-window query for one request
#[derive(Debug, Clone)]
pub struct RecordSelector {
    user_key: UserKey,
    date: NaiveDate,
    window: TimeWindow,
}

impl RecordSelector {
    pub fn new(
        user_key: UserKey,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Result<Self, ComputeError> {
        let window = TimeWindow::for_date(date, offset)?;
        Ok(Self {
            user_key,
            date,
            window,
        })
    }

    pub fn user_key(&self) -> &UserKey {
        &self.user_key
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Key equals the user AND timestamp falls in the window
    pub fn matches(&self, record: &RawRecord) -> bool {
        record.key == self.user_key.as_str() && self.window.contains(record.created_at)
    }

    /// Keep matching records, ascending by `createdAt`.
    ///
    /// The sort is stable, so records sharing a timestamp keep the order the
    /// store returned them in. An empty result is a valid outcome.
    pub fn select<I>(&self, records: I) -> Vec<RawRecord>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut selected: Vec<RawRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        selected.sort_by_key(|r| r.created_at);
        selected
    }
}
