//! Wire payloads and the liveness directory for the slowlink fabric.
//!
//! Every payload on the wire is a UTF-8 JSON object tagged by an `event`
//! field. Publishers emit `pulse` heartbeats and `data` frames; the
//! aggregator answers `request_snapshot` with a `snapshot` of its directory.
//! The directory itself is the [`Snapshot`]/[`Entry`] model: one [`Entry`]
//! per live publisher, keyed by its advertised (addr, port).

mod entry;
mod error;
mod message;
mod netarray;
mod snapshot;
mod timestamp;

pub use entry::{Entry, StatusColor};
pub use error::WireError;
pub use message::{DataRecord, Message};
pub use netarray::ArrayEnvelope;
pub use snapshot::{Snapshot, SnapshotDiff};
pub use timestamp::{
    Clock, SystemClock, TIMESTAMP_FORMAT, TIMESTAMP_FORMAT_SHORT, format_timestamp,
    format_timestamp_short, parse_timestamp, systime_format,
};
