use std::{
    net::{IpAddr, Ipv4Addr},
    time::{Duration, Instant},
};

use slowlink_net::{Handler, Role, Server, StreamId, StreamSet};

const TICK: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(5);
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Default)]
struct Recorder {
    accepted: Vec<StreamId>,
    received: Vec<(StreamId, Vec<u8>)>,
    closed: Vec<StreamId>,
}

impl Handler for Recorder {
    fn on_accept(&mut self, _streams: &mut StreamSet, id: StreamId) {
        self.accepted.push(id);
    }

    fn on_recv(&mut self, _streams: &mut StreamSet, id: StreamId, payloads: Vec<Vec<u8>>) {
        for payload in payloads {
            self.received.push((id, payload));
        }
    }

    fn on_close(&mut self, _streams: &mut StreamSet, id: StreamId) {
        self.closed.push(id);
    }
}

fn connect_count(server: &mut Server) -> usize {
    server.streams().iter().filter(|(_, s)| s.role() == Some(Role::Connect)).count()
}

#[test]
fn roundtrip_order_and_broadcast() {
    let mut server = Server::new();
    let mut server_h = Recorder::default();
    let (_lid, bound) = server.streams().add_listener(Some(LOCALHOST), 0).unwrap();

    let mut client = Server::new();
    let mut client_h = Recorder::default();
    client.streams().add_connection_addr(bound);

    for i in 0..3 {
        client.streams().queue(format!("msg-{i}").as_bytes());
    }

    let deadline = Instant::now() + DEADLINE;
    while server_h.received.len() < 3 {
        assert!(Instant::now() < deadline, "server never got the frames");
        client.serve(TICK, &mut client_h);
        server.serve(TICK, &mut server_h);
    }

    // Accept preceded the first payload, and arrival order held.
    assert_eq!(server_h.accepted.len(), 1);
    let bodies: Vec<&[u8]> = server_h.received.iter().map(|(_, p)| p.as_slice()).collect();
    assert_eq!(bodies, vec![b"msg-0".as_slice(), b"msg-1", b"msg-2"]);
    assert!(server_h.received.iter().all(|(id, _)| *id == server_h.accepted[0]));

    // Broadcast reaches the accepted peer.
    server.streams().queue(b"tick");
    let deadline = Instant::now() + DEADLINE;
    while client_h.received.is_empty() {
        assert!(Instant::now() < deadline, "client never got the broadcast");
        server.serve(TICK, &mut server_h);
        client.serve(TICK, &mut client_h);
    }
    assert_eq!(client_h.received[0].1, b"tick");
}

#[test]
fn add_connection_is_idempotent_per_endpoint() {
    let mut server = Server::new();
    let (_lid, bound) = server.streams().add_listener(Some(LOCALHOST), 0).unwrap();

    let mut client = Server::new();
    let first = client.streams().add_connection_addr(bound);
    let second = client.streams().add_connection_addr(bound);
    assert_eq!(first, second);
    assert_eq!(connect_count(&mut client), 1);
}

#[test]
fn failed_connect_lands_on_retry_list_and_recovers() {
    // Reserve a port, then free it so the first attempt fails.
    let mut probe = Server::new();
    let (_lid, bound) = probe.streams().add_listener(Some(LOCALHOST), 0).unwrap();
    drop(probe);

    let mut client = Server::new();
    let mut client_h = Recorder::default();
    let id = client.streams().add_connection_addr(bound);
    assert_eq!(client.streams().get(id).unwrap().status(), slowlink_net::Status::Closed);

    client.streams().queue(b"queued while down");
    client.serve(TICK, &mut client_h);

    let mut server = Server::new();
    let mut server_h = Recorder::default();
    server.streams().add_listener(Some(LOCALHOST), bound.port()).unwrap();

    let deadline = Instant::now() + DEADLINE;
    while server_h.received.is_empty() {
        assert!(Instant::now() < deadline, "queued frame never arrived");
        client.serve(TICK, &mut client_h);
        server.serve(TICK, &mut server_h);
    }
    assert_eq!(server_h.received[0].1, b"queued while down");
}

#[test]
fn peer_loss_fires_on_close_once_and_reconnects() {
    let mut server = Server::new();
    let mut server_h = Recorder::default();
    let (_lid, bound) = server.streams().add_listener(Some(LOCALHOST), 0).unwrap();

    let mut client = Server::new();
    let mut client_h = Recorder::default();
    let id = client.streams().add_connection_addr(bound);

    // Make sure the server has accepted before tearing it down.
    let deadline = Instant::now() + DEADLINE;
    while server_h.accepted.is_empty() {
        assert!(Instant::now() < deadline, "never accepted");
        client.serve(TICK, &mut client_h);
        server.serve(TICK, &mut server_h);
    }
    drop(server);

    let deadline = Instant::now() + DEADLINE;
    while client_h.closed.is_empty() {
        assert!(Instant::now() < deadline, "close never observed");
        client.serve(TICK, &mut client_h);
    }
    assert_eq!(client_h.closed, vec![id]);

    // Queue while down, restart the listener, and expect delivery.
    client.streams().queue(b"after-restart");
    let mut server = Server::new();
    let mut server_h = Recorder::default();
    server.streams().add_listener(Some(LOCALHOST), bound.port()).unwrap();

    let deadline = Instant::now() + DEADLINE;
    while server_h.received.is_empty() {
        assert!(Instant::now() < deadline, "frame lost across reconnect");
        client.serve(TICK, &mut client_h);
        server.serve(TICK, &mut server_h);
    }
    assert_eq!(server_h.received[0].1, b"after-restart");
    assert_eq!(client_h.closed.len(), 1);
}

#[test]
fn remove_connection_destroys_the_stream() {
    let mut server = Server::new();
    let mut server_h = Recorder::default();
    let (_lid, bound) = server.streams().add_listener(Some(LOCALHOST), 0).unwrap();

    let mut client = Server::new();
    let mut client_h = Recorder::default();
    client.streams().add_connection_addr(bound);
    client.serve(TICK, &mut client_h);
    server.serve(TICK, &mut server_h);

    assert_eq!(client.streams().remove_connection(bound), 1);
    assert_eq!(connect_count(&mut client), 0);

    // The reactor keeps ticking without the stream.
    client.serve(TICK, &mut client_h);
    server.serve(TICK, &mut server_h);
}
