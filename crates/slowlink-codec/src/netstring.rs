use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, trace};

/// Maximum number of ASCII digits in a length prefix.
pub const MAX_PREFIX_DIGITS: usize = 9;

/// Payloads at or above this size are framed as separate segments so the
/// payload bytes are moved, not copied, into the send queue.
pub const CHUNK_THRESHOLD: usize = 4096;

const DEFAULT_MAX_PAYLOAD: usize = 1_000_000_000;

/// Frame a payload as `\n<L>:<payload>,`.
///
/// The leading newline is not part of the frame proper; it keeps log files
/// and wire captures scannable by eye. Decoders report it as one byte of
/// discarded noise.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let prefix = format!("\n{}:", payload.len());
    let mut out = Vec::with_capacity(prefix.len() + payload.len() + 1);
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(payload);
    out.push(b',');
    out
}

/// Frame a payload as one or more owned segments.
///
/// Below [`CHUNK_THRESHOLD`] this is a single contiguous frame. At or above
/// it, the prefix, the payload (moved as-is), and the terminator come back
/// as three segments.
pub fn encode_segments(payload: Vec<u8>) -> Vec<Vec<u8>> {
    if payload.len() < CHUNK_THRESHOLD {
        return vec![encode(&payload)];
    }
    let prefix = format!("\n{}:", payload.len()).into_bytes();
    vec![prefix, payload, vec![b',']]
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {len} exceeds the configured maximum of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },
}

/// One decoded occurrence on the inbound byte stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame's payload, byte-for-byte as sent.
    Payload(Vec<u8>),
    /// A run of bytes that did not conform to the framing and was dropped.
    Discard(usize),
}

enum ScanState {
    /// Hunting for the next `<digits><sep?>:` prefix.
    Prefix,
    /// A prefix of `prefix_len` bytes announced a `len`-byte payload.
    Payload { len: usize, prefix_len: usize },
}

/// Incremental frame reassembler.
///
/// Feed arbitrary byte chunks; the event sequence is invariant under how the
/// stream is chunked. Non-conforming bytes are dropped eagerly (the decoder
/// keeps at most a candidate prefix tail besides the in-progress payload)
/// and surface as coalesced [`FrameEvent::Discard`] reports once the stream
/// resynchronizes on a valid prefix.
///
/// A prefix announcing more than the configured ceiling fails the feed with
/// [`FrameError::MessageTooLarge`]; the decoder is left parked at the
/// oversized prefix and the connection should be torn down.
pub struct Decoder {
    buf: VecDeque<u8>,
    state: ScanState,
    /// Noise bytes seen since the last event, reported on the next resync.
    pending_noise: usize,
    events: VecDeque<FrameEvent>,
    max_payload: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: VecDeque::new(),
            state: ScanState::Prefix,
            pending_noise: 0,
            events: VecDeque::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Lower (or raise, up to the 9-digit wire limit) the payload ceiling.
    pub fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Absorb a chunk of the inbound stream.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.buf.extend(bytes.iter().copied());
        self.scan()
    }

    /// Drain all events decoded so far, in arrival order.
    pub fn take_events(&mut self) -> Vec<FrameEvent> {
        self.events.drain(..).collect()
    }

    fn scan(&mut self) -> Result<(), FrameError> {
        loop {
            match self.state {
                ScanState::Prefix => match self.seek_prefix()? {
                    Some((len, prefix_len)) => {
                        self.state = ScanState::Payload { len, prefix_len };
                    }
                    None => return Ok(()),
                },
                ScanState::Payload { len, prefix_len } => {
                    if self.buf.len() < len + 1 {
                        return Ok(());
                    }
                    if self.buf[len] == b',' {
                        let payload: Vec<u8> = self.buf.drain(..len).collect();
                        let _ = self.buf.pop_front();
                        self.events.push_back(FrameEvent::Payload(payload));
                    } else {
                        // The whole attempted message is noise. The failed
                        // terminator byte stays put; the next seek accounts
                        // for it (or starts a new prefix with it).
                        debug!(payload_len = len, prefix_len, "decoder: missing terminator");
                        self.buf.drain(..len);
                        self.events.push_back(FrameEvent::Discard(prefix_len + len));
                    }
                    self.state = ScanState::Prefix;
                }
            }
        }
    }

    /// Find a `[0-9]{1,9}.?:` prefix at the earliest position in the buffer.
    ///
    /// Everything before it is dropped and tallied into `pending_noise`,
    /// including the optional single byte between digits and colon. Returns
    /// the announced payload length and the digits+colon byte count, or
    /// `None` while the tail of the buffer could still grow into a prefix.
    fn seek_prefix(&mut self) -> Result<Option<(usize, usize)>, FrameError> {
        loop {
            while let Some(&b) = self.buf.front() {
                if b.is_ascii_digit() {
                    break;
                }
                self.buf.pop_front();
                self.pending_noise += 1;
            }

            let mut digits = 0;
            while digits < MAX_PREFIX_DIGITS &&
                digits < self.buf.len() &&
                self.buf[digits].is_ascii_digit()
            {
                digits += 1;
            }
            if digits == 0 || self.buf.len() == digits {
                return Ok(None);
            }

            let sep = if self.buf[digits] == b':' {
                0
            } else {
                if self.buf.len() == digits + 1 {
                    return Ok(None);
                }
                if self.buf[digits + 1] != b':' {
                    // No prefix starts at this digit; shift by one and rescan.
                    self.buf.pop_front();
                    self.pending_noise += 1;
                    continue;
                }
                1
            };

            let len = (0..digits).fold(0usize, |acc, i| acc * 10 + (self.buf[i] - b'0') as usize);
            if len > self.max_payload {
                return Err(FrameError::MessageTooLarge { len, max: self.max_payload });
            }

            self.pending_noise += sep;
            self.buf.drain(..digits + sep + 1);
            if self.pending_noise > 0 {
                trace!(bytes = self.pending_noise, "decoder: resynchronized past noise");
                self.events.push_back(FrameEvent::Discard(self.pending_noise));
                self.pending_noise = 0;
            }
            return Ok(Some((len, digits + 1)));
        }
    }
}
