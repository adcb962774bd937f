use chrono::{DateTime, NaiveDateTime, Utc};

use crate::WireError;

/// Fixed-width UTC form carried on the wire, microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d:%H:%M:%S:%6f";

/// Second-resolution variant used in rotated file names.
pub const TIMESTAMP_FORMAT_SHORT: &str = "%Y%m%d%H%M%S";

pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_timestamp_short(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT_SHORT).to_string()
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, WireError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| WireError::Timestamp { text: text.to_owned(), source })
}

/// serde adapter for `systime` fields in the fixed wire format.
pub mod systime_format {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{format_timestamp, parse_timestamp};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format_timestamp(*dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(de)?;
        parse_timestamp(&text).map_err(D::Error::custom)
    }
}

/// Time source injected into anything with a freshness rule, so staleness
/// and purge behavior are testable without sleeping.
pub trait Clock {
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
