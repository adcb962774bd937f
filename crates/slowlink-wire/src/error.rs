use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("bad timestamp {text:?}: {source}")]
    Timestamp {
        text: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("array checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("bad hex buffer: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}
