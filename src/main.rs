//! Loopback demonstration of the SONAR protocol stack.
//!
//! Runs a client and a server endpoint in one process, connected by
//! in-memory byte queues and a manually stepped millisecond clock, and
//! exercises the full protocol: connect, discovery, writes, read-backs and
//! notifications. Useful as a smoke test and as a worked example of the
//! endpoint API.

use anyhow::{Context, bail};
use clap::Parser;
use sonar::{
    AttributeDef, Client, ClientObserver, ClientOptions, Ops, Server, ServerObserver,
    ServerOptions, Transport,
};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// The client-writable setpoint, read back to verify the round trip.
const ATTR_SETPOINT: u16 = 0x020;
/// A server-side counter pushed to the client via notify.
const ATTR_COUNTER: u16 = 0x010;

const MAX_ATTRIBUTE_SIZE: usize = 16;

#[derive(Parser, Debug)]
#[command(about = "Run a SONAR client and server against each other in-process")]
struct Args {
    /// Number of write/read/notify rounds to run.
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Milliseconds to run before giving up.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Log at debug level instead of info.
    #[arg(long)]
    verbose: bool,
}

/// One direction of the loopback link: bytes written here are read by the
/// peer on its next `process()` call.
struct Pipe {
    out: Rc<RefCell<VecDeque<u8>>>,
    clock: Rc<Cell<u64>>,
}

impl Transport for Pipe {
    fn write_byte(&mut self, byte: u8) {
        self.out.borrow_mut().push_back(byte);
    }

    fn now_ms(&self) -> u64 {
        self.clock.get()
    }
}

#[derive(Default)]
struct ClientEvents {
    connected: bool,
    write_done: Option<bool>,
    read_done: Option<(bool, Vec<u8>)>,
    notified: Option<Vec<u8>>,
}

#[derive(Clone, Default)]
struct ClientApp(Rc<RefCell<ClientEvents>>);

impl ClientObserver for ClientApp {
    fn connection_changed(&mut self, connected: bool) {
        log::info!("client: connection changed (connected={connected})");
        self.0.borrow_mut().connected = connected;
    }

    fn read_complete(&mut self, id: u16, success: bool, data: &[u8]) {
        log::debug!("client: read complete (id=0x{id:x}, success={success})");
        self.0.borrow_mut().read_done = Some((success, data.to_vec()));
    }

    fn write_complete(&mut self, id: u16, success: bool) {
        log::debug!("client: write complete (id=0x{id:x}, success={success})");
        self.0.borrow_mut().write_done = Some(success);
    }

    fn notify(&mut self, id: u16, data: &[u8]) -> bool {
        log::debug!("client: notify (id=0x{id:x}, len={})", data.len());
        self.0.borrow_mut().notified = Some(data.to_vec());
        true
    }
}

#[derive(Default)]
struct ServerState {
    setpoint: Vec<u8>,
    reads: u32,
}

#[derive(Clone, Default)]
struct ServerApp(Rc<RefCell<ServerState>>);

impl ServerObserver for ServerApp {
    fn connection_changed(&mut self, connected: bool) {
        log::info!("server: connection changed (connected={connected})");
    }

    fn read(&mut self, id: u16, buf: &mut [u8]) -> Option<usize> {
        let mut state = self.0.borrow_mut();
        state.reads += 1;
        match id {
            ATTR_SETPOINT => {
                buf[..state.setpoint.len()].copy_from_slice(&state.setpoint);
                Some(state.setpoint.len())
            }
            ATTR_COUNTER => {
                buf[..4].copy_from_slice(&state.reads.to_le_bytes());
                Some(4)
            }
            _ => None,
        }
    }

    fn write(&mut self, id: u16, data: &[u8]) -> bool {
        if id != ATTR_SETPOINT {
            return false;
        }
        self.0.borrow_mut().setpoint = data.to_vec();
        true
    }

    fn notify_complete(&mut self, id: u16, success: bool) {
        log::debug!("server: notify complete (id=0x{id:x}, success={success})");
    }
}

struct Loopback {
    clock: Rc<Cell<u64>>,
    client_out: Rc<RefCell<VecDeque<u8>>>,
    server_out: Rc<RefCell<VecDeque<u8>>>,
    client: Client<Pipe, ClientApp>,
    server: Server<Pipe, ServerApp>,
    deadline_ms: u64,
}

impl Loopback {
    /// Advances the clock one millisecond and lets both endpoints drain
    /// their peer's output.
    fn step(&mut self) -> anyhow::Result<()> {
        let now = self.clock.get() + 1;
        if now > self.deadline_ms {
            bail!("deadline reached at {now} ms");
        }
        self.clock.set(now);

        let to_server: Vec<u8> = self.client_out.borrow_mut().drain(..).collect();
        self.server.process(&to_server);
        let to_client: Vec<u8> = self.server_out.borrow_mut().drain(..).collect();
        self.client.process(&to_client);
        Ok(())
    }

    fn step_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) -> anyhow::Result<()> {
        while !done(self) {
            self.step()?;
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    })?;

    let clock = Rc::new(Cell::new(0));
    let client_out = Rc::new(RefCell::new(VecDeque::new()));
    let server_out = Rc::new(RefCell::new(VecDeque::new()));
    let client_events = ClientApp::default();
    let server_state = ServerApp::default();

    let mut client = Client::new(
        ClientOptions {
            max_attribute_size: MAX_ATTRIBUTE_SIZE,
        },
        Pipe {
            out: client_out.clone(),
            clock: clock.clone(),
        },
        client_events.clone(),
    );
    let mut server = Server::new(
        ServerOptions {
            max_attribute_size: MAX_ATTRIBUTE_SIZE,
        },
        Pipe {
            out: server_out.clone(),
            clock: clock.clone(),
        },
        server_state.clone(),
    );

    let registered = client.register(AttributeDef::new(ATTR_SETPOINT, 2, Ops::RW))
        && client.register(AttributeDef::new(ATTR_COUNTER, 4, Ops::RN))
        && server.register(AttributeDef::new(ATTR_SETPOINT, 2, Ops::RW))
        && server.register(AttributeDef::new(ATTR_COUNTER, 4, Ops::RN));
    if !registered {
        bail!("attribute registration failed");
    }

    let mut link = Loopback {
        clock,
        client_out,
        server_out,
        client,
        server,
        deadline_ms: args.timeout_ms,
    };

    link.step_until(|l| l.client.is_connected())
        .context("waiting for connection")?;
    log::info!("connected at {} ms", link.clock.get());

    for round in 0..args.rounds {
        let value = (round as u16).to_le_bytes();

        if !link.client.write(ATTR_SETPOINT, &value) {
            bail!("write request rejected");
        }
        link.step_until(|_| client_events.0.borrow_mut().write_done.is_some())
            .context("waiting for write completion")?;
        if !client_events.0.borrow_mut().write_done.take().unwrap() {
            bail!("setpoint write failed");
        }

        if !link.client.read(ATTR_SETPOINT) {
            bail!("read request rejected");
        }
        link.step_until(|_| client_events.0.borrow_mut().read_done.is_some())
            .context("waiting for read completion")?;
        let (success, data) = client_events.0.borrow_mut().read_done.take().unwrap();
        if !success || data != value {
            bail!("setpoint read back {data:02x?}, expected {value:02x?}");
        }

        if !link.server.notify_read_data(ATTR_COUNTER) {
            bail!("notify request rejected");
        }
        link.step_until(|_| client_events.0.borrow_mut().notified.is_some())
            .context("waiting for notify delivery")?;
        let counter = client_events.0.borrow_mut().notified.take().unwrap();
        log::info!(
            "round {round}: setpoint verified, counter={:?}",
            u32::from_le_bytes(counter.as_slice().try_into()?)
        );
    }

    let client_errors = link.client.get_and_clear_errors();
    let server_errors = link.server.get_and_clear_errors();
    log::info!(
        "done after {} ms (server reads={})",
        link.clock.get(),
        server_state.0.borrow().reads
    );
    log::info!("client errors: {client_errors:?}");
    log::info!("server errors: {server_errors:?}");
    Ok(())
}
