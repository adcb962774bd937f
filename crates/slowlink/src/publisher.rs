use std::{net::SocketAddr, time::Duration};

use serde_json::{Map, Value};
use slowlink_net::{Handler, Server, StreamId, StreamSet};
use slowlink_wire::{Clock, DataRecord, Entry, Message, StatusColor, SystemClock, format_timestamp};
use tracing::{debug, warn};

use crate::{FabricError, PUBLISHER_INBOX_LEN, PublisherConfig, Repeater, Ring};

/// A slow-data producer. Connects to the aggregator, listens on an
/// ephemeral port for direct peers (subscribers), and pulses its liveness
/// record: immediately on construction, then whenever the heartbeat
/// interval has elapsed at [`Publisher::serve`].
///
/// The advertised address in a pulse is whatever the listener bound
/// (usually the wildcard); the aggregator substitutes the address it
/// observes on the wire, so only the port needs to be right here.
pub struct Publisher {
    server: Server,
    core: PublisherCore,
}

struct PublisherCore {
    name: String,
    pid: u32,
    status: String,
    status_color: StatusColor,
    listen_location: SocketAddr,
    heartbeat: Repeater,
    inbox: Ring<Vec<u8>>,
    clock: Box<dyn Clock>,
}

impl Publisher {
    pub fn new(config: PublisherConfig) -> Result<Self, FabricError> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: PublisherConfig, clock: Box<dyn Clock>) -> Result<Self, FabricError> {
        let mut server = Server::new();
        server.streams().add_connection(&config.aggregator_addr, config.aggregator_port)?;
        let (_, listen_location) = server.streams().add_listener(None, 0)?;

        let mut core = PublisherCore {
            name: config.name,
            pid: std::process::id(),
            status: "unset".to_owned(),
            status_color: StatusColor::White,
            listen_location,
            heartbeat: Repeater::every(config.heartbeat_interval),
            inbox: Ring::new(PUBLISHER_INBOX_LEN),
            clock,
        };
        core.pulse(server.streams());
        Ok(Self { server, core })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Where direct peers reach this publisher.
    pub fn listen_location(&self) -> SocketAddr {
        self.core.listen_location
    }

    /// Display status carried by subsequent pulses.
    pub fn set_status(&mut self, status: impl Into<String>, color: StatusColor) {
        self.core.status = status.into();
        self.core.status_color = color;
    }

    /// Stamp a record with this publisher's identity and the current time,
    /// ready for [`Publisher::queue`].
    pub fn pack(&self, fields: Map<String, Value>) -> Result<Vec<u8>, FabricError> {
        Ok(Message::Data(DataRecord {
            source: (self.core.name.clone(), self.core.pid),
            systime: format_timestamp(self.core.clock.utc_now()),
            fields,
        })
        .to_bytes()?)
    }

    /// Broadcast a payload to every peer: the aggregator and any directly
    /// attached subscribers.
    pub fn queue(&mut self, payload: &[u8]) {
        self.server.streams().queue(payload);
    }

    /// Broadcast a liveness record now and restart the heartbeat clock.
    pub fn pulse(&mut self) {
        self.core.pulse(self.server.streams());
    }

    /// Payloads addressed to this publisher, oldest first.
    pub fn take_inbox(&mut self) -> Vec<Vec<u8>> {
        self.core.inbox.drain().collect()
    }

    /// One reactor tick, preceded by a pulse when the heartbeat is due.
    pub fn serve(&mut self, timeout: Duration) -> bool {
        if self.core.heartbeat.fired() {
            self.core.pulse(self.server.streams());
        }
        self.server.serve(timeout, &mut self.core)
    }
}

impl PublisherCore {
    fn pulse(&mut self, streams: &mut StreamSet) {
        let entry = Entry {
            name: self.name.clone(),
            pid: self.pid.to_string(),
            addr: self.listen_location.ip().to_string(),
            port: self.listen_location.port(),
            systime: self.clock.utc_now(),
            status: self.status.clone(),
            status_color: self.status_color,
        };
        match Message::Pulse(entry).to_bytes() {
            Ok(bytes) => streams.queue(&bytes),
            Err(err) => warn!(%err, "pulse serialization failed"),
        }
        self.heartbeat.reset();
    }
}

impl Handler for PublisherCore {
    fn on_recv(&mut self, _streams: &mut StreamSet, _id: StreamId, payloads: Vec<Vec<u8>>) {
        for payload in payloads {
            if self.inbox.push(payload).is_some() {
                debug!(name = %self.name, "inbox full, dropped oldest payload");
            }
        }
    }
}
