use adler32::RollingAdler32;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WireError;

/// Self-describing numeric-array envelope produced by an external
/// serializer: row-major bytes hex-encoded into `buf`, checksummed with
/// Adler-32 over the hex text itself (not the decoded bytes).
///
/// Receivers detect an envelope by the presence of the `adler32` key and
/// may defer decoding until the array is actually wanted. The stored
/// checksum may be the signed form of the 32-bit value; comparison is over
/// the low 32 bits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayEnvelope {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub buf: String,
    pub adler32: i64,
}

impl ArrayEnvelope {
    /// Wrap raw row-major element bytes.
    pub fn new(shape: Vec<u64>, dtype: impl Into<String>, bytes: &[u8]) -> Self {
        let buf = hex::encode(bytes);
        let adler32 = i64::from(RollingAdler32::from_buffer(buf.as_bytes()).hash());
        Self { shape, dtype: dtype.into(), buf, adler32 }
    }

    /// Whether a decoded JSON value looks like an array envelope.
    pub fn is_envelope(value: &Value) -> bool {
        value.get("adler32").is_some()
    }

    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn verify(&self) -> Result<(), WireError> {
        let stored = self.adler32 as u32;
        let computed = RollingAdler32::from_buffer(self.buf.as_bytes()).hash();
        if stored == computed {
            Ok(())
        } else {
            Err(WireError::ChecksumMismatch { stored, computed })
        }
    }

    /// Verify the checksum and decode the element bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, WireError> {
        self.verify()?;
        Ok(hex::decode(&self.buf)?)
    }
}
