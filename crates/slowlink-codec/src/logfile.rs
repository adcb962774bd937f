use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use thiserror::Error;

use crate::netstring::{CHUNK_THRESHOLD, Decoder, FrameError, FrameEvent, encode};

const READ_BLOCK: usize = 1 << 16;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("log io: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Appends framed payloads to a durable log file.
///
/// The on-disk format is the wire format: a sequence of frames, each with
/// the readability newline, so a log file can be replayed through any
/// [`Decoder`].
pub struct LogWriter {
    inner: BufWriter<File>,
}

impl LogWriter {
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { inner: BufWriter::new(file) })
    }

    pub fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        if payload.len() >= CHUNK_THRESHOLD {
            self.inner.write_all(format!("\n{}:", payload.len()).as_bytes())?;
            self.inner.write_all(payload)?;
            self.inner.write_all(b",")
        } else {
            self.inner.write_all(&encode(payload))
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Iterates the payloads of a framed log file, skipping discard reports.
pub struct LogReader {
    inner: BufReader<File>,
    decoder: Decoder,
    ready: VecDeque<Vec<u8>>,
    eof: bool,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            inner: BufReader::new(File::open(path)?),
            decoder: Decoder::new(),
            ready: VecDeque::new(),
            eof: false,
        })
    }
}

impl Iterator for LogReader {
    type Item = Result<Vec<u8>, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(payload) = self.ready.pop_front() {
                return Some(Ok(payload));
            }
            if self.eof {
                return None;
            }
            let mut block = [0u8; READ_BLOCK];
            match self.inner.read(&mut block) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    if let Err(e) = self.decoder.feed(&block[..n]) {
                        self.eof = true;
                        return Some(Err(e.into()));
                    }
                    for event in self.decoder.take_events() {
                        if let FrameEvent::Payload(p) = event {
                            self.ready.push_back(p);
                        }
                    }
                }
                Err(e) => {
                    self.eof = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
