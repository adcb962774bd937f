use std::{
    io,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, event::Event};
use tracing::{debug, info, warn};

use crate::{
    NetError,
    stream::{Role, Status, Stream},
};

/// Stable identifier of a stream within one [`Server`]. Valid until the
/// stream is destroyed; identifiers are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

/// Role-layer callbacks, dispatched from inside a [`Server::serve`] tick.
/// Callbacks run on the reactor thread and must not block.
pub trait Handler {
    /// A listener produced a new accept-role stream.
    fn on_accept(&mut self, streams: &mut StreamSet, id: StreamId) {
        let _ = (streams, id);
    }

    /// One or more complete payloads arrived on a stream, in arrival order.
    fn on_recv(&mut self, streams: &mut StreamSet, id: StreamId, payloads: Vec<Vec<u8>>) {
        let _ = (streams, id, payloads);
    }

    /// A stream transitioned to closed during this tick. Fired exactly once
    /// per closure; afterwards connect-role streams go to the retry list
    /// (queues intact) and all others are destroyed.
    fn on_close(&mut self, streams: &mut StreamSet, id: StreamId) {
        let _ = (streams, id);
    }
}

/// The reactor's stream table: every live stream, keyed by [`StreamId`],
/// plus the retry list of connect-role streams whose last attempt failed.
/// This is the surface handlers get to mutate mid-tick.
pub struct StreamSet {
    poll: Poll,
    conns: Vec<(StreamId, Stream)>,
    retry: Vec<StreamId>,
    next_id: usize,
}

impl StreamSet {
    fn new() -> Self {
        Self {
            poll: Poll::new().expect("couldn't set up a poll for the reactor"),
            conns: Vec::with_capacity(8),
            retry: Vec::new(),
            next_id: 0,
        }
    }

    fn alloc_id(&mut self) -> StreamId {
        let id = StreamId(self.next_id);
        self.next_id += 1;
        id
    }

    fn index_of(&self, id: StreamId) -> Option<usize> {
        self.conns.iter().position(|(t, _)| *t == id)
    }

    /// Resolve a host/port pair the way the fabric's endpoints are compared.
    pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetError> {
        (host, port)
            .to_socket_addrs()
            .map_err(|source| NetError::Resolve { host: host.to_owned(), port, source })?
            .next()
            .ok_or_else(|| NetError::NoAddress { host: host.to_owned(), port })
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.conns.iter().find(|(t, _)| *t == id).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.conns.iter_mut().find(|(t, _)| *t == id).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &Stream)> {
        self.conns.iter().map(|(id, s)| (*id, s))
    }

    /// Open (or return the existing) connect-role stream to `host:port`.
    ///
    /// Idempotent per remote endpoint: no duplicate stream for an endpoint
    /// is ever observable to the role layer. A failed attempt still
    /// registers the stream and queues it for retry on the next tick.
    pub fn add_connection(&mut self, host: &str, port: u16) -> Result<StreamId, NetError> {
        let addr = Self::resolve(host, port)?;
        Ok(self.add_connection_addr(addr))
    }

    pub fn add_connection_addr(&mut self, addr: SocketAddr) -> StreamId {
        if let Some((id, _)) = self
            .conns
            .iter()
            .find(|(_, s)| s.role() == Some(Role::Connect) && s.remote_location() == Some(addr))
        {
            return *id;
        }

        let mut stream = Stream::new();
        let id = self.alloc_id();
        if stream.connect_to(addr) == Status::Closed {
            debug!(%addr, errno = ?stream.last_error(), "connect failed, queued for retry");
            self.retry.push(id);
        } else if !self.register(id, &mut stream, Interest::READABLE) {
            stream.close();
            self.retry.push(id);
        } else {
            debug!(%addr, "connected");
        }
        self.conns.push((id, stream));
        id
    }

    /// Bind a listen-role stream. Returns its id and the bound location.
    pub fn add_listener(
        &mut self,
        addr: Option<IpAddr>,
        port: u16,
    ) -> Result<(StreamId, SocketAddr), NetError> {
        let mut stream = Stream::new();
        let bound = stream.listen(addr, port)?;
        let id = self.alloc_id();
        if !self.register(id, &mut stream, Interest::READABLE) {
            return Err(NetError::Bind {
                addr: bound,
                source: io::Error::other("registering listener failed"),
            });
        }
        info!(%bound, "listening");
        self.conns.push((id, stream));
        Ok((id, bound))
    }

    /// Close and destroy every stream connected (or connecting) to `addr`,
    /// dropping them from the retry list as well. Returns how many went.
    pub fn remove_connection(&mut self, addr: SocketAddr) -> usize {
        let mut removed = 0;
        let mut i = self.conns.len();
        while i != 0 {
            i -= 1;
            if self.conns[i].1.role() != Some(Role::Listen) &&
                self.conns[i].1.remote_location() == Some(addr)
            {
                let (id, mut stream) = self.conns.swap_remove(i);
                if let Some(source) = stream.source() {
                    let _ = self.poll.registry().deregister(source);
                }
                stream.close();
                self.retry.retain(|t| *t != id);
                removed += 1;
            }
        }
        removed
    }

    /// Broadcast: frame and queue `payload` on every non-listener stream,
    /// including closed connect-role streams awaiting retry; their queues
    /// survive reconnection.
    pub fn queue(&mut self, payload: &[u8]) {
        for (_, stream) in &mut self.conns {
            if stream.role() != Some(Role::Listen) {
                stream.queue(payload.to_vec());
            }
        }
    }

    /// Frame and queue `payload` on one stream. Returns whether the stream
    /// exists and can carry it.
    pub fn queue_to(&mut self, id: StreamId, payload: Vec<u8>) -> bool {
        match self.get_mut(id) {
            Some(stream) if stream.role() != Some(Role::Listen) => {
                stream.queue(payload);
                true
            }
            _ => false,
        }
    }

    fn register(&mut self, id: StreamId, stream: &mut Stream, interest: Interest) -> bool {
        let Some(source) = stream.source() else { return false };
        match self.poll.registry().register(source, Token(id.0), interest) {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, "reactor: register failed");
                false
            }
        }
    }

    /// Synchronous bounded reconnect pass over the retry list.
    fn retry_connects(&mut self) {
        let mut i = self.retry.len();
        while i != 0 {
            i -= 1;
            let id = self.retry[i];
            let Some(idx) = self.index_of(id) else {
                self.retry.swap_remove(i);
                continue;
            };
            let mut stream = std::mem::take(&mut self.conns[idx].1);
            if stream.connect() != Status::Closed {
                if self.register(id, &mut stream, Interest::READABLE) {
                    debug!(addr = ?stream.remote_location(), "reconnected");
                    self.retry.swap_remove(i);
                } else {
                    stream.close();
                }
            }
            self.conns[idx].1 = stream;
        }
    }

    /// Keep WRITABLE interest armed while a stream has pending output, so a
    /// queue-then-serve flushes within the same tick. Re-armed on every
    /// tick with output pending: a partial drain (short-write budget)
    /// consumes the edge, and only the reregister brings the event back.
    fn arm_writables(&mut self) {
        let registry = self.poll.registry();
        for (id, stream) in &mut self.conns {
            if stream.role() == Some(Role::Listen) || stream.status() == Status::Closed {
                continue;
            }
            let want = stream.has_pending_output();
            if !want && !stream.writable_armed {
                continue;
            }
            let interest = if want {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let token = Token(id.0);
            let Some(source) = stream.source() else { continue };
            match registry.reregister(source, token, interest) {
                Ok(()) => stream.writable_armed = want,
                Err(err) => {
                    debug!(?err, "reactor: reregister failed");
                    stream.close();
                }
            }
        }
    }

    fn accept_loop(&mut self, listener_id: StreamId, handler: &mut dyn Handler) {
        loop {
            let accepted = {
                let Some(idx) = self.index_of(listener_id) else { return };
                self.conns[idx].1.accept()
            };
            match accepted {
                Ok(mut stream) => {
                    let id = self.alloc_id();
                    if !self.register(id, &mut stream, Interest::READABLE) {
                        continue;
                    }
                    info!(peer = ?stream.remote_location(), "accepted connection");
                    self.conns.push((id, stream));
                    handler.on_accept(self, id);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(?err, "reactor: accept failed");
                    return;
                }
            }
        }
    }

    fn handle_event(&mut self, event: &Event, handler: &mut dyn Handler) {
        let id = StreamId(event.token().0);
        let Some(idx) = self.index_of(id) else {
            debug!(?id, "reactor: event for unknown stream");
            return;
        };

        if self.conns[idx].1.role() == Some(Role::Listen) {
            if event.is_readable() {
                self.accept_loop(id, handler);
            }
            return;
        }

        // Readability before writability within a tick.
        if event.is_readable() {
            let payloads = {
                let stream = &mut self.conns[idx].1;
                stream.recv_all();
                stream.take_payloads()
            };
            if !payloads.is_empty() {
                handler.on_recv(self, id, payloads);
            }
        }

        // The handler may have removed or shifted streams; re-find.
        if event.is_writable() &&
            let Some(idx) = self.index_of(id)
        {
            self.conns[idx].1.send_all(true);
        }
    }

    /// Fire `on_close` exactly once for every stream that closed during the
    /// tick; retry-listed streams are already accounted for.
    fn reap_closed(&mut self, handler: &mut dyn Handler) {
        loop {
            let candidate = self
                .conns
                .iter()
                .find(|(id, s)| s.status() == Status::Closed && !self.retry.contains(id))
                .map(|(id, _)| *id);
            let Some(id) = candidate else { break };

            handler.on_close(self, id);

            // The handler may itself have removed the stream.
            let Some(idx) = self.index_of(id) else { continue };
            if self.conns[idx].1.role() == Some(Role::Connect) {
                debug!(addr = ?self.conns[idx].1.remote_location(), "connection lost, queued for retry");
                self.retry.push(id);
            } else {
                self.conns.swap_remove(idx);
            }
        }
    }
}

/// One reactor: a stream table plus the poll event buffer.
///
/// Single-threaded and cooperative: all I/O is non-blocking, and the only
/// suspension points are the readiness wait (bounded by the `serve` timeout)
/// and the short bounded connect attempts for retry-listed streams at the
/// start of each tick.
pub struct Server {
    events: Events,
    streams: StreamSet,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self { events: Events::with_capacity(128), streams: StreamSet::new() }
    }

    /// The stream table, for role logic running between ticks.
    pub fn streams(&mut self) -> &mut StreamSet {
        &mut self.streams
    }

    /// One reactor tick: retry failed connects, wait up to `timeout` for
    /// readiness, then dispatch accept/recv/write/close work. Returns
    /// whether any I/O events were processed.
    pub fn serve(&mut self, timeout: Duration, handler: &mut dyn Handler) -> bool {
        self.streams.retry_connects();
        self.streams.arm_writables();

        if let Err(err) = self.streams.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() != io::ErrorKind::Interrupted {
                warn!(?err, "reactor: poll failed");
            }
            return false;
        }

        let mut any = false;
        for event in self.events.iter() {
            any = true;
            self.streams.handle_event(event, handler);
        }
        self.streams.reap_closed(handler);
        any
    }
}
