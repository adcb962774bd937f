use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{entry::Entry, snapshot::Snapshot};

/// A publisher's application payload: the identity stamp plus whatever
/// fields the producing script put in the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    /// (publisher name, publisher pid).
    pub source: (String, u32),
    /// Wire-format timestamp, kept textual; consumers parse on demand.
    pub systime: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Every recognized payload on the fabric, tagged by its `event` field.
///
/// Parsing is total over byte input: malformed JSON comes back as `None`
/// (roles drop it silently), a well-formed object with an unrecognized or
/// missing tag (or a recognized tag with an unusable body) becomes
/// [`Message::Unknown`] and is ignored by every role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Message {
    Data(DataRecord),
    Pulse(Entry),
    Snapshot(Snapshot),
    RequestSnapshot,
    #[serde(skip)]
    Unknown(Value),
}

impl Message {
    pub fn parse(bytes: &[u8]) -> Option<Message> {
        match serde_json::from_slice::<Message>(bytes) {
            Ok(message) => Some(message),
            Err(_) => match serde_json::from_slice::<Value>(bytes) {
                Ok(value) if value.is_object() => Some(Message::Unknown(value)),
                _ => None,
            },
        }
    }

    /// Wire bytes for this message. `Unknown` carries whatever arrived and
    /// is not sendable; serializing it is an error, never a panic.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_events() {
        let pulse = br#"{"event":"pulse","name":"daq0","pid":"7","addr":"10.0.0.7",
            "port":9000,"systime":"2024-03-09:12:00:00:000000","status":"ok",
            "status_color":"green"}"#;
        assert!(matches!(Message::parse(pulse), Some(Message::Pulse(e)) if e.name == "daq0"));

        let request = br#"{"event":"request_snapshot"}"#;
        assert!(matches!(Message::parse(request), Some(Message::RequestSnapshot)));

        let data = br#"{"event":"data","source":["daq0",7],
            "systime":"2024-03-09:12:00:00:000000","i":42}"#;
        match Message::parse(data) {
            Some(Message::Data(record)) => {
                assert_eq!(record.source.0, "daq0");
                assert_eq!(record.fields["i"], 42);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_is_preserved_not_dropped() {
        let msg = Message::parse(br#"{"event":"shutdown","reason":"maintenance"}"#);
        assert!(matches!(msg, Some(Message::Unknown(_))));
        // A recognized tag with an unusable body degrades the same way.
        let msg = Message::parse(br#"{"event":"pulse","name":"daq0"}"#);
        assert!(matches!(msg, Some(Message::Unknown(_))));
    }

    #[test]
    fn malformed_json_is_none() {
        assert!(Message::parse(b"{not json").is_none());
        assert!(Message::parse(b"[1,2,3]").is_none());
    }

    #[test]
    fn request_snapshot_wire_form() {
        assert_eq!(
            Message::RequestSnapshot.to_bytes().unwrap(),
            br#"{"event":"request_snapshot"}"#
        );
    }

    #[test]
    fn unknown_is_not_sendable() {
        let unknown = Message::parse(br#"{"event":"shutdown"}"#).unwrap();
        assert!(matches!(unknown, Message::Unknown(_)));
        assert!(unknown.to_bytes().is_err());
    }
}
