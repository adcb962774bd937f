use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::timestamp::systime_format;

/// Display color attached to a publisher's status line. Presentation
/// metadata only; carried opaquely through the fabric.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusColor {
    #[default]
    White,
    Green,
    Yellow,
    Red,
    Cyan,
    Magenta,
    Blue,
}

/// One publisher's liveness record: who it is, where it listens, and when
/// it last pulsed. A [`Snapshot`](crate::Snapshot) holds one per live
/// publisher, keyed by (addr, port).
///
/// Equality and hashing cover the full tuple, so two pulses from the same
/// location at different times are distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub pid: String,
    pub addr: String,
    pub port: u16,
    #[serde(with = "systime_format")]
    pub systime: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub status_color: StatusColor,
}

impl Entry {
    /// `self` updates `other` iff both describe the same listening location
    /// and `self` is not older.
    pub fn updates(&self, other: &Entry) -> bool {
        self.addr == other.addr && self.port == other.port && self.systime >= other.systime
    }

    /// Key under which a snapshot holds this entry.
    pub fn location(&self) -> (String, u16) {
        (self.addr.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn entry(addr: &str, port: u16, secs: u32) -> Entry {
        Entry {
            name: "daq0".into(),
            pid: "4242".into(),
            addr: addr.into(),
            port,
            systime: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, secs).unwrap(),
            status: "ok".into(),
            status_color: StatusColor::Green,
        }
    }

    #[test]
    fn serde_uses_wire_timestamp_and_defaults_color() {
        let e = entry("10.0.0.7", 3141, 5);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"systime\":\"2024-03-09:12:00:05:000000\""));

        let text = r#"{"name":"daq0","pid":"4242","addr":"10.0.0.7","port":3141,
            "systime":"2024-03-09:12:00:05:000000","status":"ok"}"#;
        let parsed: Entry = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.status_color, StatusColor::White);
    }

    #[test]
    fn updates_requires_same_location_and_later_time() {
        let old = entry("10.0.0.7", 3141, 5);
        let newer = entry("10.0.0.7", 3141, 6);
        assert!(newer.updates(&old));
        assert!(!old.updates(&newer));
        assert!(old.updates(&old));

        let elsewhere = entry("10.0.0.8", 3141, 9);
        assert!(!elsewhere.updates(&old));
    }
}
