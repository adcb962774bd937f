use std::{collections::HashSet, net::SocketAddr, time::Duration};

use slowlink_net::{Handler, Role, Server, StreamId, StreamSet};
use slowlink_wire::{Message, Snapshot, SnapshotDiff};
use tracing::{debug, warn};

use crate::{FabricError, SUBSCRIBER_BUFFER_LEN, Ring, SubscriberConfig};

/// Follows the aggregator's directory and attaches directly to every
/// publisher in it.
///
/// Each tick requests a fresh snapshot; each received snapshot is diffed
/// against the previous one: added entries get a connect-role stream,
/// removed ones lose theirs. Data frames from attached publishers land in
/// a bounded buffer for the caller to drain.
pub struct Subscriber {
    server: Server,
    core: SubscriberCore,
}

struct SubscriberCore {
    aggregator: SocketAddr,
    aggregator_id: StreamId,
    snapshot: Option<Snapshot>,
    last_diff: SnapshotDiff,
    data: Ring<Vec<u8>>,
}

impl Subscriber {
    pub fn new(config: SubscriberConfig) -> Result<Self, FabricError> {
        let aggregator =
            StreamSet::resolve(&config.aggregator_addr, config.aggregator_port)?;
        let mut server = Server::new();
        let aggregator_id = server.streams().add_connection_addr(aggregator);
        Ok(Self {
            server,
            core: SubscriberCore {
                aggregator,
                aggregator_id,
                snapshot: None,
                last_diff: SnapshotDiff::default(),
                data: Ring::new(SUBSCRIBER_BUFFER_LEN),
            },
        })
    }

    /// The last directory received, if any.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.core.snapshot.as_ref()
    }

    /// The most recent change to the directory: the last non-empty diff
    /// computed from successive snapshots.
    pub fn last_diff(&self) -> &SnapshotDiff {
        &self.core.last_diff
    }

    /// Like [`Subscriber::last_diff`], but consuming: changes since the
    /// caller last asked.
    pub fn take_diff(&mut self) -> SnapshotDiff {
        std::mem::take(&mut self.core.last_diff)
    }

    /// Locations of the publishers currently attached (or attaching).
    pub fn attached(&mut self) -> Vec<SocketAddr> {
        let aggregator = self.core.aggregator;
        self.server
            .streams()
            .iter()
            .filter(|(_, s)| s.role() == Some(Role::Connect))
            .filter_map(|(_, s)| s.remote_location())
            .filter(|addr| *addr != aggregator)
            .collect()
    }

    /// Ask the aggregator for its current directory.
    pub fn request_snapshot(&mut self) {
        self.core.request_snapshot(self.server.streams());
    }

    /// Data frames received from publishers, oldest first.
    pub fn take_data(&mut self) -> Vec<Vec<u8>> {
        self.core.data.drain().collect()
    }

    /// Queue a payload for the publisher registered under `name`. Returns
    /// whether the message was accepted for delivery.
    pub fn message(&mut self, name: &str, payload: Vec<u8>) -> bool {
        let Some(entry) = self.core.snapshot.as_ref().and_then(|s| s.by_name(name)) else {
            return false;
        };
        let Ok(addr) = StreamSet::resolve(&entry.addr, entry.port) else {
            return false;
        };
        let streams = self.server.streams();
        let id = streams
            .iter()
            .find(|(_, s)| s.role() == Some(Role::Connect) && s.remote_location() == Some(addr))
            .map(|(id, _)| id);
        match id {
            Some(id) => streams.queue_to(id, payload),
            None => false,
        }
    }

    /// One reactor tick, preceded by a snapshot request.
    pub fn serve(&mut self, timeout: Duration) -> bool {
        self.request_snapshot();
        self.server.serve(timeout, &mut self.core)
    }
}

impl SubscriberCore {
    fn request_snapshot(&mut self, streams: &mut StreamSet) {
        match Message::RequestSnapshot.to_bytes() {
            Ok(bytes) => {
                streams.queue_to(self.aggregator_id, bytes);
            }
            Err(err) => warn!(%err, "snapshot request serialization failed"),
        }
    }

    /// Reconcile held connections against a freshly received directory.
    fn register_snapshot(&mut self, streams: &mut StreamSet, snapshot: Snapshot) {
        let old = self.snapshot.take().unwrap_or_else(|| Snapshot::new(snapshot.systime));
        let diff = &snapshot - &old;

        for entry in &diff.add {
            match StreamSet::resolve(&entry.addr, entry.port) {
                Ok(addr) if addr == self.aggregator => {}
                Ok(addr) => {
                    streams.add_connection_addr(addr);
                }
                Err(err) => warn!(?err, name = %entry.name, "unresolvable publisher entry"),
            }
        }

        // Belt and braces beyond the diff: drop any connect stream whose
        // remote fell out of the directory. The aggregator link is exempt.
        let live: HashSet<SocketAddr> = snapshot
            .locations()
            .filter_map(|(addr, port)| StreamSet::resolve(addr, *port).ok())
            .collect();
        let stale: Vec<SocketAddr> = streams
            .iter()
            .filter(|(_, s)| s.role() == Some(Role::Connect))
            .filter_map(|(_, s)| s.remote_location())
            .filter(|addr| *addr != self.aggregator && !live.contains(addr))
            .collect();
        for addr in stale {
            debug!(%addr, "publisher left the directory, detaching");
            streams.remove_connection(addr);
        }

        // Identical snapshots arrive every tick; only a membership change
        // is worth remembering.
        if !diff.is_empty() {
            self.last_diff = diff;
        }
        self.snapshot = Some(snapshot);
    }
}

impl Handler for SubscriberCore {
    fn on_recv(&mut self, streams: &mut StreamSet, _id: StreamId, payloads: Vec<Vec<u8>>) {
        for payload in payloads {
            match Message::parse(&payload) {
                Some(Message::Snapshot(snapshot)) => self.register_snapshot(streams, snapshot),
                Some(Message::Data(_)) => {
                    if self.data.push(payload).is_some() {
                        debug!("data buffer full, dropped oldest frame");
                    }
                }
                Some(Message::Pulse(_) | Message::RequestSnapshot | Message::Unknown(_)) => {}
                None => {}
            }
        }
    }

    fn on_close(&mut self, streams: &mut StreamSet, id: StreamId) {
        // Losing the aggregator link queues a fresh snapshot request on it;
        // the frame rides out after the reconnect path brings it back.
        // Publisher streams just follow the standard retry handling.
        if streams.get(id).and_then(|s| s.remote_location()) == Some(self.aggregator) {
            debug!("aggregator link lost, queueing snapshot request");
            self.request_snapshot(streams);
        }
    }
}
