//! End-to-end scenarios with a client and server endpoint wired back to
//! back over in-memory queues: discovery, reads, writes, notifies,
//! retransmission and connection loss.

mod common;

use common::{TestTransport, clock, frame_bytes};

use anyhow::Result;
use codec::Role;
use sonar::{
    AttributeDef, Client, ClientObserver, ClientOptions, Errors, Ops, Server, ServerObserver,
    ServerOptions,
};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

const ATTR: u16 = 0xFFF;
const MAX_SIZE: usize = 16;

#[derive(Default)]
struct ClientState {
    connection_events: Vec<bool>,
    reads: Vec<(u16, bool, Vec<u8>)>,
    writes: Vec<(u16, bool)>,
    notifies: Vec<(u16, Vec<u8>)>,
}

#[derive(Clone, Default)]
struct ClientRecorder(Rc<RefCell<ClientState>>);

impl ClientObserver for ClientRecorder {
    fn connection_changed(&mut self, connected: bool) {
        self.0.borrow_mut().connection_events.push(connected);
    }

    fn read_complete(&mut self, id: u16, success: bool, data: &[u8]) {
        self.0.borrow_mut().reads.push((id, success, data.to_vec()));
    }

    fn write_complete(&mut self, id: u16, success: bool) {
        self.0.borrow_mut().writes.push((id, success));
    }

    fn notify(&mut self, id: u16, data: &[u8]) -> bool {
        self.0.borrow_mut().notifies.push((id, data.to_vec()));
        true
    }
}

#[derive(Default)]
struct ServerState {
    connection_events: Vec<bool>,
    value: Vec<u8>,
    reads: u32,
    writes: Vec<(u16, Vec<u8>)>,
    notify_completes: Vec<(u16, bool)>,
}

#[derive(Clone, Default)]
struct ServerRecorder(Rc<RefCell<ServerState>>);

impl ServerObserver for ServerRecorder {
    fn connection_changed(&mut self, connected: bool) {
        self.0.borrow_mut().connection_events.push(connected);
    }

    fn read(&mut self, _id: u16, buf: &mut [u8]) -> Option<usize> {
        let mut state = self.0.borrow_mut();
        state.reads += 1;
        buf[..state.value.len()].copy_from_slice(&state.value);
        Some(state.value.len())
    }

    fn write(&mut self, id: u16, data: &[u8]) -> bool {
        self.0.borrow_mut().writes.push((id, data.to_vec()));
        true
    }

    fn notify_complete(&mut self, id: u16, success: bool) {
        self.0.borrow_mut().notify_completes.push((id, success));
    }
}

struct Pair {
    clk: Rc<Cell<u64>>,
    client_io: TestTransport,
    server_io: TestTransport,
    client: Client<TestTransport, ClientRecorder>,
    server: Server<TestTransport, ServerRecorder>,
    client_state: ClientRecorder,
    server_state: ServerRecorder,
}

impl Pair {
    fn new(defs: &[AttributeDef]) -> Self {
        Self::asymmetric(defs, defs)
    }

    fn asymmetric(client_defs: &[AttributeDef], server_defs: &[AttributeDef]) -> Self {
        let clk = clock();
        let client_io = TestTransport::new(&clk);
        let server_io = TestTransport::new(&clk);
        let client_state = ClientRecorder::default();
        let server_state = ServerRecorder::default();

        let mut client = Client::new(
            ClientOptions {
                max_attribute_size: MAX_SIZE,
            },
            client_io.clone(),
            client_state.clone(),
        );
        let mut server = Server::new(
            ServerOptions {
                max_attribute_size: MAX_SIZE,
            },
            server_io.clone(),
            server_state.clone(),
        );
        for def in client_defs {
            assert!(client.register(*def));
        }
        for def in server_defs {
            assert!(server.register(*def));
        }

        Self {
            clk,
            client_io,
            server_io,
            client,
            server,
            client_state,
            server_state,
        }
    }

    /// Delivers each endpoint's output to its peer once.
    fn pump(&mut self) {
        let to_server = self.client_io.take_sent();
        self.server.process(&to_server);
        let to_client = self.server_io.take_sent();
        self.client.process(&to_client);
    }

    /// Runs `ms` one-millisecond ticks with both endpoints live.
    fn run(&mut self, ms: u64) {
        for _ in 0..ms {
            self.clk.set(self.clk.get() + 1);
            self.pump();
        }
    }

    fn connect(&mut self) {
        self.run(20);
        assert!(self.client.is_connected());
        assert!(self.server.is_connected());
    }
}

#[test]
fn connect_runs_discovery() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    // The user sees connected exactly once, and only after discovery.
    assert_eq!(pair.client_state.0.borrow().connection_events, vec![true]);
    assert_eq!(pair.server_state.0.borrow().connection_events, vec![true]);
    assert_eq!(pair.client.get_and_clear_errors(), Errors::default());
    assert_eq!(pair.server.get_and_clear_errors(), Errors::default());
    Ok(())
}

#[test]
fn read_fetches_the_server_value() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();
    pair.server_state.0.borrow_mut().value = vec![0x44, 0x33, 0x22, 0x11];
    assert_eq!(pair.server_state.0.borrow().reads, 0);

    assert!(pair.client.read(ATTR));
    pair.run(5);

    assert_eq!(
        pair.client_state.0.borrow().reads,
        vec![(ATTR, true, vec![0x44, 0x33, 0x22, 0x11])]
    );
    assert_eq!(pair.server_state.0.borrow().reads, 1);
    Ok(())
}

#[test]
fn write_applies_on_the_server() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    // Oversized writes are rejected locally, exact-size writes pass.
    assert!(!pair.client.write(ATTR, &[0u8; MAX_SIZE + 1]));
    let data = [7u8; MAX_SIZE];
    assert!(pair.client.write(ATTR, &data));
    pair.run(5);

    assert_eq!(
        pair.server_state.0.borrow().writes,
        vec![(ATTR, data.to_vec())]
    );
    assert_eq!(pair.client_state.0.borrow().writes, vec![(ATTR, true)]);
    Ok(())
}

#[test]
fn lost_response_is_recovered_by_retransmission() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    assert!(pair.client.write(ATTR, &[1, 2, 3]));

    // Deliver the request but lose the response.
    let to_server = pair.client_io.take_sent();
    pair.server.process(&to_server);
    assert_eq!(pair.server_state.0.borrow().writes.len(), 1);
    pair.server_io.take_sent();

    // After the retry interval the client retransmits; the server answers
    // from its response cache without running the write handler again.
    pair.clk.set(pair.clk.get() + 100);
    pair.pump();
    pair.pump();

    assert_eq!(pair.server_state.0.borrow().writes.len(), 1);
    assert_eq!(pair.client_state.0.borrow().writes, vec![(ATTR, true)]);
    assert_eq!(pair.client.get_and_clear_errors().link.retries, 1);
    Ok(())
}

#[test]
fn silence_times_out_the_request_then_the_connection() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    assert!(pair.client.write(ATTR, &[9]));

    // The server goes silent; only the client keeps running.
    for _ in 0..1100 {
        pair.clk.set(pair.clk.get() + 1);
        pair.client.process(&[]);
    }

    {
        let state = pair.client_state.0.borrow();
        assert_eq!(state.writes, vec![(ATTR, false)]);
        assert_eq!(state.connection_events, vec![true, false]);
    }
    assert!(!pair.client.is_connected());

    // Availability was cleared by the disconnect.
    assert!(!pair.client.write(ATTR, &[9]));
    assert_eq!(pair.client.get_and_clear_errors().link.unexpected_packet, 0);
    Ok(())
}

#[test]
fn notify_reaches_the_client() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    assert!(pair.server.notify(ATTR, &[7, 8]));
    pair.run(5);
    assert_eq!(pair.client_state.0.borrow().notifies, vec![(ATTR, vec![7, 8])]);
    assert_eq!(
        pair.server_state.0.borrow().notify_completes,
        vec![(ATTR, true)]
    );

    // notify_read_data pushes whatever the read handler produces.
    pair.server_state.0.borrow_mut().value = vec![1, 2, 3];
    assert!(pair.server.notify_read_data(ATTR));
    pair.run(5);
    assert_eq!(
        pair.client_state.0.borrow().notifies,
        vec![(ATTR, vec![7, 8]), (ATTR, vec![1, 2, 3])]
    );
    assert_eq!(pair.server_state.0.borrow().reads, 1);
    Ok(())
}

#[test]
fn mismatched_attributes_stay_unavailable() -> Result<()> {
    let mut pair = Pair::asymmetric(
        &[
            AttributeDef::new(0x200, 4, Ops::RW),
            AttributeDef::new(0x300, 4, Ops::R),
        ],
        &[AttributeDef::new(0x200, 4, Ops::RWN)],
    );
    pair.run(30);
    assert!(pair.client.is_connected());

    // Capability mismatch, server-side absence, and no registration at all.
    assert!(!pair.client.read(0x200));
    assert!(!pair.client.read(0x300));
    assert!(!pair.client.read(0x400));
    Ok(())
}

#[test]
fn discovery_pages_through_a_large_registry() -> Result<()> {
    let defs: Vec<AttributeDef> = (1u16..=9)
        .map(|id| AttributeDef::new(id, 4, Ops::RWN))
        .collect();
    let mut pair = Pair::new(&defs);
    pair.run(40);
    assert!(pair.client.is_connected());

    // The ninth attribute only appears in the second list chunk.
    assert!(pair.client.read(0x009));
    pair.run(5);
    assert_eq!(pair.client_state.0.borrow().reads, vec![(9, true, vec![])]);
    Ok(())
}

#[test]
fn corrupt_frames_only_bump_counters() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    let mut bad = frame_bytes(Role::Server, true, false, 9, &[1]);
    bad[3] ^= 0x01;
    pair.client.process(&bad);

    let errors = pair.client.get_and_clear_errors();
    assert_eq!(errors.framing.invalid_crc, 1);
    assert_eq!(pair.client.get_and_clear_errors(), Errors::default());
    assert!(pair.client.is_connected());
    Ok(())
}

#[test]
fn keepalive_holds_an_idle_connection() -> Result<()> {
    let mut pair = Pair::new(&[AttributeDef::new(ATTR, MAX_SIZE, Ops::RWN)]);
    pair.connect();

    pair.run(2500);
    assert!(pair.client.is_connected());
    assert!(pair.server.is_connected());
    assert_eq!(pair.client_state.0.borrow().connection_events, vec![true]);
    Ok(())
}

#[test]
fn registration_rules_are_enforced() -> Result<()> {
    let clk = clock();
    let io = TestTransport::new(&clk);
    let mut client = Client::new(
        ClientOptions {
            max_attribute_size: MAX_SIZE,
        },
        io.clone(),
        ClientRecorder::default(),
    );

    // Reserved control IDs, out-of-range IDs and duplicates are rejected.
    assert!(!client.register(AttributeDef::new(0x101, 2, Ops::R)));
    assert!(!client.register(AttributeDef::new(0x102, 2, Ops::RW)));
    assert!(!client.register(AttributeDef::new(0x103, 2, Ops::R)));
    assert!(!client.register(AttributeDef::new(0x1000, 2, Ops::R)));
    assert!(client.register(AttributeDef::new(0x001, 2, Ops::R)));
    assert!(!client.register(AttributeDef::new(0x001, 2, Ops::R)));

    let mut server = Server::new(
        ServerOptions {
            max_attribute_size: MAX_SIZE,
        },
        io,
        ServerRecorder::default(),
    );
    assert!(!server.register(AttributeDef::new(0x101, 2, Ops::R)));
    assert!(server.register(AttributeDef::new(0x010, 2, Ops::RW)));
    assert!(!server.register(AttributeDef::new(0x010, 2, Ops::RW)));

    // Notify requires the capability bit and a live connection.
    assert!(!server.notify(0x300, &[1]));
    assert!(!server.notify(0x010, &[1]));
    assert!(server.register(AttributeDef::new(0x020, 2, Ops::N)));
    assert!(!server.notify(0x020, &[1]));
    Ok(())
}
