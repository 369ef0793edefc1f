//! ## SONAR
//!
//! A connection-oriented request/response protocol for exchanging small
//! named attributes between exactly two endpoints, a client and a server,
//! over any byte transport. The stack has three layers:
//!
//! - the **link layer** ([`link`]) frames bytes, establishes and maintains
//!   the connection, and pairs each request with its response using
//!   stop-and-wait retransmission;
//! - the **application layer** ([`app`]) maps a 16-bit header onto attribute
//!   read, write and notify operations;
//! - the **attribute layer** ([`attributes`]) keeps the registry on each
//!   side and runs the client's discovery handshake over the reserved
//!   control attributes.
//!
//! [`Client`] and [`Server`] compose the layers behind a small facade. The
//! engine is single-threaded and callback-driven: the user supplies a
//! [`Transport`] (byte sink plus millisecond clock) and an observer for
//! protocol events, then calls `process()` with whatever bytes arrived.
//!
//! ```
//! use sonar::{
//!     AttributeDef, Client, ClientObserver, ClientOptions, Ops, Server, ServerObserver,
//!     ServerOptions, Transport,
//! };
//! use std::cell::{Cell, RefCell};
//! use std::collections::VecDeque;
//! use std::rc::Rc;
//!
//! struct Pipe {
//!     out: Rc<RefCell<VecDeque<u8>>>,
//!     clock: Rc<Cell<u64>>,
//! }
//!
//! impl Transport for Pipe {
//!     fn write_byte(&mut self, byte: u8) {
//!         self.out.borrow_mut().push_back(byte);
//!     }
//!
//!     fn now_ms(&self) -> u64 {
//!         self.clock.get()
//!     }
//! }
//!
//! struct Quiet;
//! impl ClientObserver for Quiet {}
//! impl ServerObserver for Quiet {}
//!
//! let clock = Rc::new(Cell::new(0));
//! let client_out = Rc::new(RefCell::new(VecDeque::new()));
//! let server_out = Rc::new(RefCell::new(VecDeque::new()));
//!
//! let mut client = Client::new(
//!     ClientOptions { max_attribute_size: 16 },
//!     Pipe { out: client_out.clone(), clock: clock.clone() },
//!     Quiet,
//! );
//! let mut server = Server::new(
//!     ServerOptions { max_attribute_size: 16 },
//!     Pipe { out: server_out.clone(), clock: clock.clone() },
//!     Quiet,
//! );
//!
//! assert!(client.register(AttributeDef::new(0x001, 4, Ops::RWN)));
//! assert!(server.register(AttributeDef::new(0x001, 4, Ops::RWN)));
//!
//! // Pump both directions until the connection and discovery complete.
//! for _ in 0..16 {
//!     clock.set(clock.get() + 1);
//!     let to_server: Vec<u8> = client_out.borrow_mut().drain(..).collect();
//!     server.process(&to_server);
//!     let to_client: Vec<u8> = server_out.borrow_mut().drain(..).collect();
//!     client.process(&to_client);
//! }
//!
//! assert!(client.is_connected());
//! assert!(server.is_connected());
//! ```

pub mod app;
pub mod attributes;
pub mod client;
pub mod link;
pub mod server;

pub use attributes::AttributeDef;
pub use client::{Client, ClientObserver, ClientOptions};
pub use codec::{FramingErrors, Ops, Role};
pub use link::LinkErrors;
pub use server::{Server, ServerObserver, ServerOptions};

/// The physical byte transport plus the system clock, both user-provided.
///
/// `write_byte` may be called from within any engine entry point; callers
/// sharing the transport must serialize access externally. The clock must be
/// monotonic; a non-monotonic clock causes spurious or missed timeouts but
/// nothing worse.
pub trait Transport {
    fn write_byte(&mut self, byte: u8);
    fn now_ms(&self) -> u64;
}

/// Every error counter an endpoint keeps, split between the byte framing
/// path and the link layer proper. Counters only grow between
/// `get_and_clear_errors()` calls, which reset them to zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Errors {
    pub framing: FramingErrors,
    pub link: LinkErrors,
}
