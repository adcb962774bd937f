use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use mio::net::{TcpListener, TcpStream};
use slowlink_codec::{Decoder, FrameEvent, encode_segments};
use tracing::{debug, warn};

use crate::NetError;

/// Upper bound on the synchronous connect attempt. Kept short and blocking
/// because in-progress non-blocking connects do not reliably signal
/// writability on every platform.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const RECV_BLOCK: usize = 4096;
/// Short writes tolerated per `send_all` before yielding to other streams.
const SEND_RETRIES: usize = 4;

/// What the stream's socket is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Listen,
    Connect,
    Accept,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Created, no socket yet.
    Detached,
    Listening,
    Connected,
    Accepted,
    Closed,
}

enum Sock {
    None,
    Listener(TcpListener),
    Conn(TcpStream),
}

/// Per-connection state machine over one non-blocking socket.
///
/// Outbound payloads are framed into segments on [`Stream::queue`] and
/// drained by [`Stream::send_all`]; short writes leave the unsent residual
/// at the head of the queue. Inbound bytes flow through the frame decoder
/// and come back, in arrival order, from [`Stream::take_payloads`].
///
/// A peer close, a fatal socket error, or an unrecoverable framing overflow
/// transitions the stream to [`Status::Closed`] and releases the socket; no
/// further I/O happens. The reactor may call [`Stream::connect`] again on a
/// closed connect-role stream; the queues survive, so frames queued while
/// disconnected go out after the next successful connect.
pub struct Stream {
    sock: Sock,
    decoder: Decoder,
    /// Segments waiting for the kernel.
    tcpbox: VecDeque<Vec<u8>>,
    /// Segments not yet acknowledged by a receipt-aware peer. Resynced to
    /// `tcpbox` on every `send_all` unless the caller opts out.
    outbox: VecDeque<Vec<u8>>,
    role: Option<Role>,
    status: Status,
    host_location: Option<SocketAddr>,
    remote_location: Option<SocketAddr>,
    last_error: Option<i32>,
    /// Whether WRITABLE interest is currently registered for this stream.
    /// Maintained by the reactor: armed exactly while `tcpbox` is non-empty.
    pub(crate) writable_armed: bool,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    pub fn new() -> Self {
        Self {
            sock: Sock::None,
            decoder: Decoder::new(),
            tcpbox: VecDeque::new(),
            outbox: VecDeque::new(),
            role: None,
            status: Status::Detached,
            host_location: None,
            remote_location: None,
            last_error: None,
            writable_armed: false,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn host_location(&self) -> Option<SocketAddr> {
        self.host_location
    }

    pub fn remote_location(&self) -> Option<SocketAddr> {
        self.remote_location
    }

    /// Raw OS error code of the last failed socket operation.
    pub fn last_error(&self) -> Option<i32> {
        self.last_error
    }

    pub fn has_pending_output(&self) -> bool {
        !self.tcpbox.is_empty()
    }

    /// Bytes framed and waiting for the kernel.
    pub fn pending_output_bytes(&self) -> usize {
        self.tcpbox.iter().map(Vec::len).sum()
    }

    /// Bytes sent but not yet acknowledged by a receipt-aware peer.
    pub fn unacked_bytes(&self) -> usize {
        self.outbox.iter().map(Vec::len).sum()
    }

    /// Bind and listen. `addr` defaults to the wildcard address, `port` 0
    /// picks an ephemeral port; the actual bound location is returned.
    pub fn listen(&mut self, addr: Option<IpAddr>, port: u16) -> Result<SocketAddr, NetError> {
        let bind = SocketAddr::new(addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), port);
        let listener =
            TcpListener::bind(bind).map_err(|source| NetError::Bind { addr: bind, source })?;
        let bound = listener.local_addr().map_err(|source| NetError::Bind { addr: bind, source })?;
        self.sock = Sock::Listener(listener);
        self.role = Some(Role::Listen);
        self.status = Status::Listening;
        self.host_location = Some(bound);
        Ok(bound)
    }

    /// Store `addr` as the remote location and attempt to connect to it.
    pub fn connect_to(&mut self, addr: SocketAddr) -> Status {
        self.remote_location = Some(addr);
        self.connect()
    }

    /// Bounded-time connect to the stored remote location. On success the
    /// socket is switched to non-blocking and the stream is `Connected`;
    /// on failure the stream is `Closed` with the error code recorded.
    pub fn connect(&mut self) -> Status {
        self.role = Some(Role::Connect);
        let Some(addr) = self.remote_location else {
            self.status = Status::Closed;
            return self.status;
        };
        match std::net::TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .and_then(|sock| sock.set_nonblocking(true).map(|()| sock))
        {
            Ok(sock) => {
                let sock = TcpStream::from_std(sock);
                self.host_location = sock.local_addr().ok();
                self.sock = Sock::Conn(sock);
                self.status = Status::Connected;
                self.last_error = None;
            }
            Err(err) => {
                self.last_error = err.raw_os_error();
                self.status = Status::Closed;
            }
        }
        self.status
    }

    /// Frame a payload and queue its segments for sending.
    pub fn queue(&mut self, payload: Vec<u8>) {
        for segment in encode_segments(payload) {
            self.outbox.push_back(segment.clone());
            self.tcpbox.push_back(segment);
        }
    }

    /// Drain the pending-send queue with non-blocking writes. Returns the
    /// number of bytes handed to the kernel. Stops on an empty queue, a
    /// would-block, the short-write retry budget, or a dead peer (which
    /// closes the stream).
    pub fn send_all(&mut self, sync_outbox: bool) -> usize {
        let mut total = 0;
        let mut retries = SEND_RETRIES;
        let mut dead = false;

        if let Sock::Conn(sock) = &mut self.sock {
            while let Some(front) = self.tcpbox.front_mut() {
                match sock.write(front) {
                    Ok(0) => {
                        dead = true;
                        break;
                    }
                    Ok(n) => {
                        total += n;
                        if n == front.len() {
                            self.tcpbox.pop_front();
                        } else {
                            front.drain(..n);
                            retries -= 1;
                            if retries == 0 {
                                break;
                            }
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        debug!(?err, "stream: write failed");
                        self.last_error = err.raw_os_error();
                        dead = true;
                        break;
                    }
                }
            }
        }

        if dead {
            self.close();
        }
        if sync_outbox {
            self.outbox = self.tcpbox.clone();
        }
        total
    }

    /// Read until the socket would block, feeding everything into the frame
    /// decoder. A zero-byte read, a fatal error, or a framing overflow
    /// closes the stream.
    pub fn recv_all(&mut self) {
        let mut buf = [0u8; RECV_BLOCK];
        let mut dead = false;

        if let Sock::Conn(sock) = &mut self.sock {
            loop {
                match sock.read(&mut buf) {
                    Ok(0) => {
                        dead = true;
                        break;
                    }
                    Ok(n) => {
                        if let Err(err) = self.decoder.feed(&buf[..n]) {
                            warn!(?err, "stream: unrecoverable framing, closing");
                            dead = true;
                            break;
                        }
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        debug!(?err, "stream: read failed");
                        self.last_error = err.raw_os_error();
                        dead = true;
                        break;
                    }
                }
            }
        }

        if dead {
            self.close();
        }
    }

    /// Accept one pending connection. Listen-role only; the new stream is
    /// accept-role, non-blocking, with the peer's location filled in.
    pub fn accept(&mut self) -> io::Result<Stream> {
        let Sock::Listener(listener) = &mut self.sock else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "accept on a non-listener"));
        };
        let (sock, peer) = listener.accept()?;
        let mut stream = Stream::new();
        stream.host_location = sock.local_addr().ok();
        stream.sock = Sock::Conn(sock);
        stream.role = Some(Role::Accept);
        stream.status = Status::Accepted;
        stream.remote_location = Some(peer);
        Ok(stream)
    }

    /// Drain decoded payloads in arrival order. Discard reports are logged
    /// and dropped here.
    pub fn take_payloads(&mut self) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();
        for event in self.decoder.take_events() {
            match event {
                FrameEvent::Payload(payload) => payloads.push(payload),
                FrameEvent::Discard(n) => {
                    debug!(bytes = n, peer = ?self.remote_location, "stream: discarded bytes");
                }
            }
        }
        payloads
    }

    /// Trim `nbytes` acknowledged bytes from the front of the
    /// unacknowledged queue.
    pub fn ack_bytes(&mut self, mut nbytes: usize) {
        while nbytes > 0 {
            let Some(front) = self.outbox.front_mut() else { break };
            if front.len() <= nbytes {
                nbytes -= front.len();
                self.outbox.pop_front();
            } else {
                front.drain(..nbytes);
                break;
            }
        }
    }

    /// Release the socket. Terminal for listen/accept roles; connect-role
    /// streams may be reconnected by the reactor.
    pub fn close(&mut self) {
        self.sock = Sock::None;
        self.status = Status::Closed;
        self.writable_armed = false;
    }

    pub(crate) fn source(&mut self) -> Option<&mut dyn mio::event::Source> {
        match &mut self.sock {
            Sock::Listener(listener) => Some(listener),
            Sock::Conn(sock) => Some(sock),
            Sock::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_fills_both_boxes() {
        let mut stream = Stream::new();
        assert_eq!(stream.status(), Status::Detached);

        stream.queue(b"hello".to_vec());
        // "\n5:hello," both pending and unacknowledged.
        assert!(stream.has_pending_output());
        assert_eq!(stream.pending_output_bytes(), 9);
        assert_eq!(stream.unacked_bytes(), 9);
    }

    #[test]
    fn ack_trims_the_oldest_unacked_bytes() {
        let mut stream = Stream::new();
        stream.queue(b"aa".to_vec());
        stream.queue(b"bb".to_vec());
        let total = stream.unacked_bytes();

        stream.ack_bytes(4);
        assert_eq!(stream.unacked_bytes(), total - 4);
        stream.ack_bytes(total);
        assert_eq!(stream.unacked_bytes(), 0);
        // Acks touch only the unacknowledged queue.
        assert_eq!(stream.pending_output_bytes(), total);
    }

    #[test]
    fn connect_to_nothing_closes_with_an_error_code() {
        let mut stream = Stream::new();
        // A port nothing listens on; reserve-then-drop keeps it free.
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        assert_eq!(stream.connect_to(addr), Status::Closed);
        assert_eq!(stream.role(), Some(Role::Connect));
        assert!(stream.last_error().is_some());
        assert_eq!(stream.remote_location(), Some(addr));
    }
}
