//! The client endpoint: the three layers composed behind the public facade.

use crate::app::{AppEvents, ApplicationLayer};
use crate::attributes::client::{AttributeClient, ControlRequest};
use crate::attributes::{
    ATTR_LIST_BYTES, AttributeDef, CTRL_ATTR_LIST, CTRL_ATTR_OFFSET, CTRL_NUM_ATTRS,
};
use crate::link::{LinkHandler, LinkLayer, ResponseSink};
use crate::{Errors, Transport};

use codec::{FRAME_OVERHEAD, Role};

/// Client-side protocol events.
pub trait ClientObserver {
    /// Reported once discovery completes (`true`) and when the connection is
    /// lost for any reason (`false`).
    #[allow(unused)]
    fn connection_changed(&mut self, connected: bool) {}

    /// A [`Client::read`] finished; `data` is the attribute value on success.
    #[allow(unused)]
    fn read_complete(&mut self, id: u16, success: bool, data: &[u8]) {}

    /// A [`Client::write`] finished.
    #[allow(unused)]
    fn write_complete(&mut self, id: u16, success: bool) {}

    /// An inbound notify for an available attribute. Returning `false`
    /// drops it unacknowledged, leaving the server to retry and time out.
    #[allow(unused)]
    fn notify(&mut self, id: u16, data: &[u8]) -> bool {
        true
    }
}

pub struct ClientOptions {
    /// The largest attribute value this endpoint supports; sizes the
    /// pre-allocated receive and staging buffers.
    pub max_attribute_size: usize,
}

pub struct Client<T, O> {
    transport: T,
    observer: O,
    link: LinkLayer,
    app: ApplicationLayer,
    attrs: AttributeClient,
}

impl<T: Transport, O: ClientObserver> Client<T, O> {
    pub fn new(options: ClientOptions, transport: T, observer: O) -> Self {
        // The receive buffer must also fit a full attribute list chunk,
        // whose size does not depend on the registered attributes.
        let capacity = options.max_attribute_size.max(ATTR_LIST_BYTES) + FRAME_OVERHEAD;
        Self {
            transport,
            observer,
            link: LinkLayer::new(Role::Client, capacity),
            app: ApplicationLayer::new(Role::Client),
            attrs: AttributeClient::new(),
        }
    }

    /// Registers an attribute. Must happen before a connection is
    /// established; duplicate and reserved IDs are rejected.
    pub fn register(&mut self, def: AttributeDef) -> bool {
        self.attrs.register(def)
    }

    /// Connected and discovery complete.
    pub fn is_connected(&self) -> bool {
        self.attrs.is_connected()
    }

    /// Feeds received bytes and drives retransmissions, timeouts and the
    /// discovery handshake. Call regularly even when no data arrived.
    pub fn process(&mut self, received: &[u8]) {
        {
            let mut glue = ClientGlue {
                app: &mut self.app,
                events: ClientEvents {
                    attrs: &mut self.attrs,
                    observer: &mut self.observer,
                },
            };
            self.link.receive(received, &mut self.transport, &mut glue);
            self.link.poll(&mut self.transport, &mut glue);
        }

        // Completion events queue at most one discovery step; issue it now
        // that the engine is quiescent.
        if let Some(request) = self.attrs.take_pending_control() {
            let sent = match request {
                ControlRequest::ReadNumAttrs => {
                    self.app
                        .read_request(CTRL_NUM_ATTRS, &mut self.link, &mut self.transport)
                }
                ControlRequest::WriteOffset(offset) => self.app.write_request(
                    CTRL_ATTR_OFFSET,
                    &offset.to_le_bytes(),
                    &mut self.link,
                    &mut self.transport,
                ),
                ControlRequest::ReadAttrList => {
                    self.app
                        .read_request(CTRL_ATTR_LIST, &mut self.link, &mut self.transport)
                }
            };
            if !sent {
                log::error!("failed to issue discovery request ({request:?})");
            }
        }
    }

    /// Requests the attribute's value from the server; completion arrives
    /// via [`ClientObserver::read_complete`].
    pub fn read(&mut self, id: u16) -> bool {
        if !self.attrs.check_read(id) {
            return false;
        }
        self.app.read_request(id, &mut self.link, &mut self.transport)
    }

    /// Writes the attribute on the server; the data is copied out before
    /// returning. Completion arrives via [`ClientObserver::write_complete`].
    pub fn write(&mut self, id: u16, data: &[u8]) -> bool {
        match self.attrs.prepare_write(id, data) {
            Some(payload) => self
                .app
                .write_request(id, payload, &mut self.link, &mut self.transport),
            None => false,
        }
    }

    /// Reads and resets every error counter.
    pub fn get_and_clear_errors(&mut self) -> Errors {
        let (link, framing) = self.link.get_and_clear_errors();
        Errors { framing, link }
    }
}

struct ClientEvents<'a, O> {
    attrs: &'a mut AttributeClient,
    observer: &'a mut O,
}

impl<O: ClientObserver> AppEvents for ClientEvents<'_, O> {
    fn handle_read(&mut self, id: u16) -> Option<&[u8]> {
        log::error!("unexpected read request (0x{id:x})");
        None
    }

    fn handle_write(&mut self, id: u16, _data: &[u8]) -> bool {
        log::error!("unexpected write request (0x{id:x})");
        false
    }

    fn handle_notify(&mut self, id: u16, data: &[u8]) -> bool {
        self.attrs.handle_notify(id, data, &mut *self.observer)
    }

    fn read_complete(&mut self, id: u16, success: bool, data: &[u8]) {
        self.attrs
            .handle_read_response(id, success, data, &mut *self.observer);
    }

    fn write_complete(&mut self, id: u16, success: bool) {
        self.attrs
            .handle_write_response(id, success, &mut *self.observer);
    }

    fn notify_complete(&mut self, id: u16, _success: bool) {
        log::error!("unexpected notify response (0x{id:x})");
    }
}

struct ClientGlue<'a, O> {
    app: &'a mut ApplicationLayer,
    events: ClientEvents<'a, O>,
}

impl<O: ClientObserver> LinkHandler for ClientGlue<'_, O> {
    fn connection_changed(&mut self, connected: bool) {
        if connected {
            self.events.attrs.on_link_connected();
        } else {
            self.events
                .attrs
                .on_link_disconnected(&mut *self.events.observer);
        }
    }

    fn request(&mut self, payload: &[u8], response: ResponseSink<'_>) -> bool {
        self.app.handle_request(payload, response, &mut self.events)
    }

    fn request_complete(&mut self, success: bool, payload: &[u8]) {
        self.app.handle_response(success, payload, &mut self.events);
    }
}
