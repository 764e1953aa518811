//! The persisted form of a point in time.
//!
//! The document collection stores dates as a `{ seconds, nanoseconds }` pair counted from the Unix
//! epoch. In memory a transaction date is a `DateTime<Utc>`. The two forms encode the same instant.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A serialized timestamp as stored in a document. Deserializing goes through `Timestamp::new`, so
/// a stored nanosecond part of one second or more is rejected.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimestamp")]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: u32,
}

#[derive(Deserialize)]
struct RawTimestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = String;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        Timestamp::new(raw.seconds, raw.nanoseconds).map_err(|e| e.to_string())
    }
}

impl Timestamp {
    /// Creates a `Timestamp`, rejecting a nanosecond part of one second or more.
    pub fn new(seconds: i64, nanoseconds: u32) -> crate::Result<Self> {
        anyhow::ensure!(
            nanoseconds < NANOS_PER_SECOND,
            "Timestamp nanoseconds out of range: {nanoseconds}"
        );
        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// Decodes the stored form into a calendar timestamp.
    pub fn to_date_time(&self) -> crate::Result<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds).with_context(|| {
            format!(
                "Timestamp {}.{:09} is outside the supported range",
                self.seconds, self.nanoseconds
            )
        })
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos() % NANOS_PER_SECOND,
        }
    }
}

impl From<&DateTime<Utc>> for Timestamp {
    fn from(value: &DateTime<Utc>) -> Self {
        Timestamp::from(*value)
    }
}

impl TryFrom<Timestamp> for DateTime<Utc> {
    type Error = crate::Error;

    fn try_from(value: Timestamp) -> Result<Self, Self::Error> {
        value.to_date_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip_second_precision() {
        let date = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let ts = Timestamp::from(date);
        assert_eq!(ts.seconds(), 1_704_412_800);
        assert_eq!(ts.nanoseconds(), 0);
        assert_eq!(ts.to_date_time().unwrap(), date);
    }

    #[test]
    fn test_round_trip_keeps_sub_second_part() {
        let date = Utc.timestamp_opt(1_706_745_600, 123_456_789).unwrap();
        let back: DateTime<Utc> = Timestamp::from(&date).try_into().unwrap();
        assert_eq!(back, date);
    }

    #[test]
    fn test_before_epoch() {
        let date = Utc.with_ymd_and_hms(1950, 6, 1, 12, 30, 15).unwrap();
        let ts = Timestamp::from(date);
        assert!(ts.seconds() < 0);
        assert_eq!(ts.to_date_time().unwrap(), date);
    }

    #[test]
    fn test_new_rejects_nanos_overflow() {
        assert!(Timestamp::new(0, NANOS_PER_SECOND).is_err());
        assert!(Timestamp::new(0, NANOS_PER_SECOND - 1).is_ok());
    }

    #[test]
    fn test_deserialize_rejects_nanos_overflow() {
        let stored = serde_json::json!({ "seconds": 59, "nanoseconds": 1_500_000_000u32 });
        let err = serde_json::from_value::<Timestamp>(stored).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let stored = serde_json::json!({ "seconds": 59, "nanoseconds": 500_000_000u32 });
        let ts: Timestamp = serde_json::from_value(stored).unwrap();
        assert_eq!(Timestamp::from(ts.to_date_time().unwrap()), ts);
    }

    #[test]
    fn test_out_of_range() {
        let ts = Timestamp::new(i64::MAX, 0).unwrap();
        assert!(ts.to_date_time().is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let ts = Timestamp::new(1_704_412_800, 5).unwrap();
        let json = serde_json::to_value(ts).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "seconds": 1_704_412_800i64, "nanoseconds": 5 })
        );
    }
}
