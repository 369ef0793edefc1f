//! The server endpoint: the three layers composed behind the public facade.

use crate::app::{AppEvents, ApplicationLayer};
use crate::attributes::AttributeDef;
use crate::attributes::server::AttributeServer;
use crate::link::{LinkHandler, LinkLayer, ResponseSink};
use crate::{Errors, Transport};

use codec::{FRAME_OVERHEAD, Role};

/// Server-side protocol events and attribute handlers, dispatched by
/// attribute ID.
pub trait ServerObserver {
    /// Reported when a client connects or the connection is lost.
    #[allow(unused)]
    fn connection_changed(&mut self, connected: bool) {}

    /// Fill `buf` with the current value of attribute `id` and return the
    /// value length. `None` drops the request, leaving the client to retry
    /// and time out.
    #[allow(unused)]
    fn read(&mut self, id: u16, buf: &mut [u8]) -> Option<usize> {
        None
    }

    /// Apply an inbound write. Returning `false` drops the request.
    #[allow(unused)]
    fn write(&mut self, id: u16, data: &[u8]) -> bool {
        false
    }

    /// A [`Server::notify`] or [`Server::notify_read_data`] finished.
    #[allow(unused)]
    fn notify_complete(&mut self, id: u16, success: bool) {}
}

pub struct ServerOptions {
    /// The largest attribute value this endpoint supports; sizes the
    /// pre-allocated receive and staging buffers.
    pub max_attribute_size: usize,
}

pub struct Server<T, O> {
    transport: T,
    observer: O,
    link: LinkLayer,
    app: ApplicationLayer,
    attrs: AttributeServer,
}

impl<T: Transport, O: ServerObserver> Server<T, O> {
    pub fn new(options: ServerOptions, transport: T, observer: O) -> Self {
        Self {
            transport,
            observer,
            link: LinkLayer::new(Role::Server, options.max_attribute_size + FRAME_OVERHEAD),
            app: ApplicationLayer::new(Role::Server),
            attrs: AttributeServer::new(),
        }
    }

    /// Registers an attribute; duplicate and reserved IDs are rejected.
    pub fn register(&mut self, def: AttributeDef) -> bool {
        self.attrs.register(def)
    }

    /// A client currently holds the link.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Feeds received bytes and drives retransmissions and timeouts. Call
    /// regularly even when no data arrived.
    pub fn process(&mut self, received: &[u8]) {
        let mut glue = ServerGlue {
            app: &mut self.app,
            events: ServerEvents {
                attrs: &mut self.attrs,
                observer: &mut self.observer,
            },
        };
        self.link.receive(received, &mut self.transport, &mut glue);
        self.link.poll(&mut self.transport, &mut glue);
    }

    /// Notifies the client with the given payload; the data is copied out
    /// before returning. Completion arrives via
    /// [`ServerObserver::notify_complete`].
    pub fn notify(&mut self, id: u16, data: &[u8]) -> bool {
        match self.attrs.prepare_notify(id, data) {
            Some(payload) => self
                .app
                .notify_request(id, payload, &mut self.link, &mut self.transport),
            None => false,
        }
    }

    /// Notifies the client with whatever the attribute's read handler
    /// produces; requires both read and notify capability.
    pub fn notify_read_data(&mut self, id: u16) -> bool {
        match self.attrs.prepare_notify_read(id, &mut self.observer) {
            Some(payload) => self
                .app
                .notify_request(id, payload, &mut self.link, &mut self.transport),
            None => false,
        }
    }

    /// Reads and resets every error counter.
    pub fn get_and_clear_errors(&mut self) -> Errors {
        let (link, framing) = self.link.get_and_clear_errors();
        Errors { framing, link }
    }
}

struct ServerEvents<'a, O> {
    attrs: &'a mut AttributeServer,
    observer: &'a mut O,
}

impl<O: ServerObserver> AppEvents for ServerEvents<'_, O> {
    fn handle_read(&mut self, id: u16) -> Option<&[u8]> {
        self.attrs.handle_read(id, &mut *self.observer)
    }

    fn handle_write(&mut self, id: u16, data: &[u8]) -> bool {
        self.attrs.handle_write(id, data, &mut *self.observer)
    }

    fn handle_notify(&mut self, id: u16, _data: &[u8]) -> bool {
        log::error!("unexpected notify request (0x{id:x})");
        false
    }

    fn read_complete(&mut self, id: u16, _success: bool, _data: &[u8]) {
        log::error!("unexpected read response (0x{id:x})");
    }

    fn write_complete(&mut self, id: u16, _success: bool) {
        log::error!("unexpected write response (0x{id:x})");
    }

    fn notify_complete(&mut self, id: u16, success: bool) {
        self.attrs
            .handle_notify_response(id, success, &mut *self.observer);
    }
}

struct ServerGlue<'a, O> {
    app: &'a mut ApplicationLayer,
    events: ServerEvents<'a, O>,
}

impl<O: ServerObserver> LinkHandler for ServerGlue<'_, O> {
    fn connection_changed(&mut self, connected: bool) {
        self.events.observer.connection_changed(connected);
    }

    fn request(&mut self, payload: &[u8], response: ResponseSink<'_>) -> bool {
        self.app.handle_request(payload, response, &mut self.events)
    }

    fn request_complete(&mut self, success: bool, payload: &[u8]) {
        self.app.handle_response(success, payload, &mut self.events);
    }
}
