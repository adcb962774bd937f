//! Length-prefixed ASCII framing for slow-telemetry byte streams.
//!
//! A frame on the wire is `<L>:<payload>,` where `<L>` is the payload length
//! in 1 to 9 decimal digits. The payload is transmitted verbatim and may
//! contain any bytes, including commas and digits. Encoders prepend a single
//! newline so that captures and log files stay human-scannable; decoders
//! treat that newline as recoverable noise.

mod logfile;
mod netstring;

pub use logfile::{LogError, LogReader, LogWriter};
pub use netstring::{
    CHUNK_THRESHOLD, Decoder, FrameError, FrameEvent, MAX_PREFIX_DIGITS, encode, encode_segments,
};
