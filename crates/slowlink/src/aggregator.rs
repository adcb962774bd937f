use std::{
    fs,
    fs::File,
    io::{BufWriter, Write},
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::TimeDelta;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use slowlink_codec::LogWriter;
use slowlink_net::{Handler, Server, StreamId, StreamSet};
use slowlink_wire::{
    ArrayEnvelope, Clock, DataRecord, Message, Snapshot, SystemClock, format_timestamp_short,
};
use tracing::{debug, info, warn};

use crate::{AggregatorConfig, ENTRY_TTL_MINUTES, FabricError};

const LOG_NAME: &str = "incremental.log";

/// The broker of the fabric. Publishers push pulses and data frames here;
/// pulses maintain the live directory, data frames buffer for the durable
/// log, and any peer can ask for the current directory with a
/// `request_snapshot`.
///
/// Snapshot answers go out in the same tick the request arrived in, after
/// the batch has been absorbed and stale entries purged, so a peer always
/// receives the post-batch view.
pub struct Aggregator {
    server: Server,
    bound: SocketAddr,
    core: AggregatorCore,
}

struct AggregatorCore {
    snapshot: Snapshot,
    /// Raw data payloads awaiting the next log append.
    data: Vec<Vec<u8>>,
    /// Flattened rows per publisher name, emitted as side-files on rotation.
    table: IndexMap<String, Vec<Map<String, Value>>>,
    log_dir: PathBuf,
    rotate_threshold: u64,
    clock: Box<dyn Clock>,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, FabricError> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(
        config: AggregatorConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self, FabricError> {
        let bind: IpAddr = config
            .bind_addr
            .parse()
            .map_err(|_| FabricError::BindAddr(config.bind_addr.clone()))?;
        fs::create_dir_all(&config.log_dir)?;

        let mut server = Server::new();
        let (_, bound) = server.streams().add_listener(Some(bind), config.bind_port)?;

        let mut snapshot = Snapshot::new(clock.utc_now());
        snapshot.log = Some(config.log_dir.join(LOG_NAME).to_string_lossy().into_owned());

        Ok(Self {
            server,
            bound,
            core: AggregatorCore {
                snapshot,
                data: Vec::new(),
                table: IndexMap::new(),
                log_dir: config.log_dir,
                rotate_threshold: config.rotate_threshold_bytes,
                clock,
            },
        })
    }

    /// Where the aggregator accepts publishers and subscribers.
    pub fn listen_location(&self) -> SocketAddr {
        self.bound
    }

    /// The live directory as of the last batch.
    pub fn snapshot(&self) -> &Snapshot {
        &self.core.snapshot
    }

    pub fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.core.snapshot
    }

    /// Data frames buffered since the last successful log append.
    pub fn pending_frames(&self) -> usize {
        self.core.data.len()
    }

    /// One reactor tick.
    pub fn serve(&mut self, timeout: Duration) -> bool {
        self.server.serve(timeout, &mut self.core)
    }

    /// Append all buffered data frames to `<logdir>/incremental.log`,
    /// rotating first if the file has outgrown the threshold. On failure
    /// the buffer is preserved for the next attempt.
    pub fn log(&mut self) -> Result<(), FabricError> {
        self.core.log()
    }
}

impl AggregatorCore {
    fn snapshot_bytes(&mut self) -> Option<Vec<u8>> {
        self.snapshot.systime = self.clock.utc_now();
        match Message::Snapshot(self.snapshot.clone()).to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(%err, "snapshot serialization failed");
                None
            }
        }
    }

    fn tabulate(&mut self, record: &DataRecord) {
        let mut row = Map::new();
        row.insert("systime".to_owned(), Value::from(record.systime.clone()));
        row.insert("pid".to_owned(), Value::from(record.source.1));
        flatten_into("", &record.fields, &mut row);
        self.table.entry(record.source.0.clone()).or_default().push(row);
    }

    fn log(&mut self) -> Result<(), FabricError> {
        let path = self.log_dir.join(LOG_NAME);
        if fs::metadata(&path).map(|meta| meta.len() > self.rotate_threshold).unwrap_or(false) {
            self.rotate(&path)?;
        }

        if self.data.is_empty() {
            return Ok(());
        }
        let mut writer = LogWriter::append(&path)?;
        for payload in &self.data {
            writer.write(payload)?;
        }
        writer.flush()?;
        debug!(frames = self.data.len(), "appended to log");
        self.data.clear();
        Ok(())
    }

    /// Archive the current log by rename and emit the tabular buffer as
    /// one JSON-lines side-file per publisher.
    fn rotate(&mut self, path: &Path) -> Result<(), FabricError> {
        let stamp = format_timestamp_short(self.clock.utc_now());
        let archived = self.log_dir.join(format!("incremental_{stamp}.log"));
        fs::rename(path, &archived)?;
        info!(archived = %archived.display(), "rotated log");

        for (name, rows) in &self.table {
            let side = self.log_dir.join(format!("{name}_{stamp}"));
            let mut file = BufWriter::new(File::create(&side)?);
            for row in rows {
                serde_json::to_writer(&mut file, row)?;
                file.write_all(b"\n")?;
            }
            file.flush()?;
        }
        self.table.clear();
        Ok(())
    }
}

impl Handler for AggregatorCore {
    fn on_accept(&mut self, streams: &mut StreamSet, id: StreamId) {
        // Every new peer gets the current directory unprompted.
        if let Some(bytes) = self.snapshot_bytes() {
            streams.queue_to(id, bytes);
        }
    }

    fn on_recv(&mut self, streams: &mut StreamSet, id: StreamId, payloads: Vec<Vec<u8>>) {
        let peer = streams.get(id).and_then(|s| s.remote_location());
        let mut snapshot_due = false;

        for payload in payloads {
            match Message::parse(&payload) {
                Some(Message::Data(record)) => {
                    self.tabulate(&record);
                    self.data.push(payload);
                }
                Some(Message::Pulse(mut entry)) => {
                    // The publisher knows its port but not its externally
                    // visible address; trust the wire.
                    if let Some(peer) = peer {
                        entry.addr = peer.ip().to_string();
                    }
                    self.snapshot.add_entry(entry);
                }
                Some(Message::RequestSnapshot) => snapshot_due = true,
                Some(Message::Snapshot(_) | Message::Unknown(_)) => {}
                None => debug!(?peer, "dropped unparseable payload"),
            }
        }

        let now = self.clock.utc_now();
        self.snapshot.remove_stale(TimeDelta::minutes(ENTRY_TTL_MINUTES), now);

        if snapshot_due &&
            let Some(bytes) = self.snapshot_bytes()
        {
            streams.queue_to(id, bytes);
        }
    }
}

/// Flatten nested objects into dotted keys; array envelopes stay leaves.
fn flatten_into(prefix: &str, fields: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in fields {
        let name = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Value::Object(inner) if !ArrayEnvelope::is_envelope(value) => {
                flatten_into(&name, inner, out);
            }
            _ => {
                out.insert(name, value.clone());
            }
        }
    }
}
