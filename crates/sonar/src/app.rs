//! The application layer: a thin demultiplexer mapping the two-byte
//! operation/attribute-ID header onto read, write and notify dispatch.
//!
//! Requests carry the header followed by the attribute data; responses carry
//! the data alone, paired to their request by the link layer. Read and write
//! requests only travel client to server, notify only server to client.

use crate::Transport;
use crate::link::{LinkLayer, ResponseSink};

use codec::{AttributeHeader, BufferChain, Opcode, Role, header::ATTRIBUTE_ID_MASK};

/// Attribute-level events delivered by the application layer: inbound
/// operations on one side, completions of our own requests on the other.
pub trait AppEvents {
    /// Serve a read; the returned bytes become the response.
    fn handle_read(&mut self, id: u16) -> Option<&[u8]>;
    fn handle_write(&mut self, id: u16, data: &[u8]) -> bool;
    fn handle_notify(&mut self, id: u16, data: &[u8]) -> bool;
    fn read_complete(&mut self, id: u16, success: bool, data: &[u8]);
    fn write_complete(&mut self, id: u16, success: bool);
    fn notify_complete(&mut self, id: u16, success: bool);
}

pub struct ApplicationLayer {
    role: Role,
    active: Option<AttributeHeader>,
}

impl ApplicationLayer {
    pub fn new(role: Role) -> Self {
        Self { role, active: None }
    }

    pub fn read_request(
        &mut self,
        id: u16,
        link: &mut LinkLayer,
        transport: &mut impl Transport,
    ) -> bool {
        self.issue(Opcode::Read, id, &[], link, transport)
    }

    pub fn write_request(
        &mut self,
        id: u16,
        data: &[u8],
        link: &mut LinkLayer,
        transport: &mut impl Transport,
    ) -> bool {
        self.issue(Opcode::Write, id, data, link, transport)
    }

    pub fn notify_request(
        &mut self,
        id: u16,
        data: &[u8],
        link: &mut LinkLayer,
        transport: &mut impl Transport,
    ) -> bool {
        self.issue(Opcode::Notify, id, data, link, transport)
    }

    fn issue(
        &mut self,
        op: Opcode,
        id: u16,
        data: &[u8],
        link: &mut LinkLayer,
        transport: &mut impl Transport,
    ) -> bool {
        if self.active.is_some() {
            log::error!("application layer request already pending");
            return false;
        }
        if id & !ATTRIBUTE_ID_MASK != 0 {
            log::error!("invalid attribute id (0x{id:x})");
            return false;
        }
        let wrong_direction = match op {
            Opcode::Read | Opcode::Write => self.role.is_server(),
            Opcode::Notify => !self.role.is_server(),
        };
        if wrong_direction {
            log::error!("operation {op:?} not valid for this role");
            return false;
        }

        let header = AttributeHeader { op, id };
        let header_bytes = header.encode();
        let entries: [&[u8]; 2] = [&header_bytes, data];
        if !link.send_request(&BufferChain::new(&entries), transport) {
            return false;
        }
        self.active = Some(header);
        true
    }

    /// An inbound request from the link layer. Returns false to drop it.
    pub fn handle_request(
        &mut self,
        payload: &[u8],
        response: ResponseSink<'_>,
        events: &mut impl AppEvents,
    ) -> bool {
        let header = match AttributeHeader::decode(payload) {
            Ok(header) => header,
            Err(err) => {
                log::error!("invalid application packet: {err}");
                return false;
            }
        };
        let data = &payload[2..];

        match header.op {
            Opcode::Read => {
                if !self.role.is_server() {
                    log::error!("invalid application packet: read request sent to client");
                    return false;
                }
                if !data.is_empty() {
                    log::error!(
                        "invalid application packet: read request with data ({})",
                        data.len()
                    );
                    return false;
                }
                match events.handle_read(header.id) {
                    Some(value) => {
                        response.respond(value);
                        true
                    }
                    None => false,
                }
            }
            Opcode::Write => {
                if !self.role.is_server() {
                    log::error!("invalid application packet: write request sent to client");
                    return false;
                }
                if !events.handle_write(header.id, data) {
                    return false;
                }
                response.respond(&[]);
                true
            }
            Opcode::Notify => {
                if self.role.is_server() {
                    log::error!("invalid application packet: notify request sent to server");
                    return false;
                }
                if !events.handle_notify(header.id, data) {
                    return false;
                }
                response.respond(&[]);
                true
            }
        }
    }

    /// The response to our pending request, routed by the stored opcode.
    pub fn handle_response(&mut self, success: bool, payload: &[u8], events: &mut impl AppEvents) {
        let Some(header) = self.active.take() else {
            log::error!("unexpected application response");
            return;
        };
        match header.op {
            Opcode::Read => events.read_complete(header.id, success, payload),
            Opcode::Write => events.write_complete(header.id, success),
            Opcode::Notify => events.notify_complete(header.id, success),
        }
    }
}
