//! The link layer: connection lifecycle, stop-and-wait request/response
//! pairing, retransmission, and duplicate suppression.
//!
//! Link control frames are overloaded by payload length: one byte is a
//! connection request (the byte seeds the sequence numbering), zero bytes is
//! connection maintenance. All link control responses are empty. Everything
//! else is an opaque payload handed to the layer above.

use crate::Transport;

use bytes::BytesMut;
use codec::{BufferChain, Deframer, Frame, FramingErrors, Role, write_frame};

pub const REQUEST_RETRY_INTERVAL_MS: u64 = 100;
pub const REQUEST_TIMEOUT_MS: u64 = 300;
pub const CONNECTION_MAINTENANCE_INTERVAL_MS: u64 = 500;
pub const CONNECTION_TIMEOUT_MS: u64 = 1000;

// A maintenance request must be able to run its full retry schedule, with
// one retry interval of slack, before the connection is declared dead.
const _: () = assert!(
    CONNECTION_TIMEOUT_MS
        >= CONNECTION_MAINTENANCE_INTERVAL_MS + REQUEST_TIMEOUT_MS + REQUEST_RETRY_INTERVAL_MS
);

/// Upward events out of the link layer.
pub trait LinkHandler {
    fn connection_changed(&mut self, connected: bool);

    /// An inbound request. Accept by responding through the sink and
    /// returning `true`; returning `false` drops the request so that no
    /// response (and no retransmission cache) exists for it.
    fn request(&mut self, payload: &[u8], response: ResponseSink<'_>) -> bool;

    /// The pending request finished. `payload` is the response data on
    /// success and empty on timeout or disconnect.
    fn request_complete(&mut self, success: bool, payload: &[u8]);
}

/// One-shot capability for answering an inbound request. Consumed by
/// [`ResponseSink::respond`], so a handler can respond at most once and must
/// do so before returning.
pub struct ResponseSink<'a> {
    buffer: &'a mut BytesMut,
    responded: &'a mut bool,
}

impl ResponseSink<'_> {
    pub fn respond(self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        *self.responded = true;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkErrors {
    /// Link control frames with a bad shape or direction.
    pub invalid_packet: u32,
    /// Traffic while not connected, or a response with nothing pending.
    pub unexpected_packet: u32,
    pub invalid_sequence_number: u32,
    /// Request retransmissions.
    pub retries: u32,
}

#[derive(Default)]
struct Connection {
    active: bool,
    prev_rx_sequence: u8,
    last_packet_ms: u64,
}

struct PendingRequest {
    active: bool,
    link_control: bool,
    sequence: u8,
    first_send_ms: u64,
    last_send_ms: u64,
    payload: BytesMut,
}

struct PendingResponse {
    active: bool,
    link_control: bool,
    sequence: u8,
    payload: BytesMut,
}

pub struct LinkLayer {
    deframer: Deframer,
    state: LinkState,
}

struct LinkState {
    role: Role,
    errors: LinkErrors,
    connection: Connection,
    pending_request: PendingRequest,
    pending_response: PendingResponse,
}

impl LinkLayer {
    /// `receive_capacity` bounds one unescaped frame and should be the
    /// largest supported attribute plus [`codec::FRAME_OVERHEAD`].
    pub fn new(role: Role, receive_capacity: usize) -> Self {
        Self {
            deframer: Deframer::new(role, receive_capacity),
            state: LinkState {
                role,
                errors: LinkErrors::default(),
                connection: Connection::default(),
                pending_request: PendingRequest {
                    active: false,
                    link_control: false,
                    sequence: 0,
                    first_send_ms: 0,
                    last_send_ms: 0,
                    payload: BytesMut::with_capacity(receive_capacity),
                },
                pending_response: PendingResponse {
                    active: false,
                    link_control: false,
                    sequence: 0,
                    payload: BytesMut::with_capacity(receive_capacity),
                },
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connection.active
    }

    /// Issues a request. Fails while disconnected or while another request
    /// is still pending; the payload is copied out before returning.
    pub fn send_request(&mut self, payload: &BufferChain<'_>, transport: &mut impl Transport) -> bool {
        self.state.send_request(payload, transport)
    }

    /// Feeds received transport bytes through the deframer and handles every
    /// completed frame.
    pub fn receive(
        &mut self,
        data: &[u8],
        transport: &mut impl Transport,
        handler: &mut impl LinkHandler,
    ) {
        let Self { deframer, state } = self;
        for &byte in data {
            if let Some(frame) = deframer.push_byte(byte) {
                state.handle_frame(&frame, transport, handler);
            }
        }
    }

    /// Drives retransmissions, timeouts, connection establishment and
    /// keep-alive. Call regularly even when no data arrived.
    pub fn poll(&mut self, transport: &mut impl Transport, handler: &mut impl LinkHandler) {
        self.state.poll(transport, handler);
    }

    pub fn get_and_clear_errors(&mut self) -> (LinkErrors, FramingErrors) {
        (
            std::mem::take(&mut self.state.errors),
            self.deframer.take_errors(),
        )
    }
}

impl LinkState {
    fn send_request(&mut self, payload: &BufferChain<'_>, transport: &mut impl Transport) -> bool {
        if !self.connection.active {
            log::error!("cannot send request: not connected");
            return false;
        }
        if self.pending_request.active {
            log::error!("cannot send request: request already pending");
            return false;
        }
        self.set_pending_request(false, payload, transport.now_ms());
        self.send_pending_request(transport);
        true
    }

    fn set_pending_request(&mut self, link_control: bool, payload: &BufferChain<'_>, now_ms: u64) {
        self.pending_request.active = true;
        self.pending_request.first_send_ms = now_ms;
        self.pending_request.sequence = self.pending_request.sequence.wrapping_add(1);
        self.pending_request.link_control = link_control;
        self.pending_request.payload.clear();
        for entry in payload.entries() {
            self.pending_request.payload.extend_from_slice(entry);
        }
    }

    fn send_pending_request(&mut self, transport: &mut impl Transport) {
        self.pending_request.last_send_ms = transport.now_ms();
        let entries: [&[u8]; 1] = [&self.pending_request.payload];
        write_frame(
            &mut |byte| transport.write_byte(byte),
            self.role,
            false,
            self.pending_request.link_control,
            self.pending_request.sequence,
            &BufferChain::new(&entries),
        );
    }

    fn send_pending_response(&mut self, transport: &mut impl Transport) {
        let entries: [&[u8]; 1] = [&self.pending_response.payload];
        write_frame(
            &mut |byte| transport.write_byte(byte),
            self.role,
            true,
            self.pending_response.link_control,
            self.pending_response.sequence,
            &BufferChain::new(&entries),
        );
    }

    fn disconnect(&mut self, handler: &mut impl LinkHandler) {
        let had_pending_request = self.pending_request.active;
        // Clear the pending request and connection state before running the
        // callbacks so the handler sees the link as down.
        self.pending_request.active = false;
        self.connection.active = false;
        log::info!("disconnected");
        handler.connection_changed(false);
        if had_pending_request {
            if self.pending_request.link_control {
                log::info!("disconnected with link control request pending");
            } else {
                handler.request_complete(false, &[]);
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: &Frame<'_>,
        transport: &mut impl Transport,
        handler: &mut impl LinkHandler,
    ) {
        let Frame {
            is_response,
            is_link_control,
            sequence,
            payload,
        } = *frame;

        if !is_link_control && !self.connection.active {
            log::error!("dropping packet: not connected");
            self.errors.unexpected_packet += 1;
            return;
        } else if is_response && !self.pending_request.active {
            log::error!("dropping packet: response without a pending request");
            self.errors.unexpected_packet += 1;
            return;
        } else if is_response && sequence != self.pending_request.sequence {
            log::error!("dropping packet: response sequence does not match request");
            self.errors.invalid_sequence_number += 1;
            return;
        } else if !is_link_control && !is_response && sequence == self.connection.prev_rx_sequence {
            // A retry of the previous request; retransmit the cached
            // response. If the handler rejected the original there is no
            // response, and the retry is dropped the same way.
            if self.pending_response.active {
                self.send_pending_response(transport);
            }
            return;
        } else if !is_link_control
            && !is_response
            && sequence.wrapping_sub(1) != self.connection.prev_rx_sequence
        {
            log::error!("dropping packet: non-incrementing sequence number");
            self.errors.invalid_sequence_number += 1;
            return;
        }

        if is_link_control {
            if !self.handle_link_control(is_response, sequence, payload, transport, handler) {
                return;
            }
            if !is_response {
                self.connection.prev_rx_sequence = sequence;
            }
        } else if is_response {
            // Mark the request inactive first so a new request can be
            // issued as soon as the completion is observed.
            self.pending_request.active = false;
            handler.request_complete(true, payload);
        } else {
            // Valid as far as the link layer is concerned.
            self.connection.prev_rx_sequence = sequence;
            self.pending_response.active = false;
            self.pending_response.link_control = false;
            self.pending_response.sequence = sequence;
            let mut responded = false;
            let accepted = handler.request(
                payload,
                ResponseSink {
                    buffer: &mut self.pending_response.payload,
                    responded: &mut responded,
                },
            );
            if !accepted {
                return;
            } else if !responded {
                log::error!("request handler did not set a response");
                return;
            }
            self.pending_response.active = true;
            self.send_pending_response(transport);
        }

        self.connection.last_packet_ms = transport.now_ms();
    }

    fn handle_link_control(
        &mut self,
        is_response: bool,
        sequence: u8,
        payload: &[u8],
        transport: &mut impl Transport,
        handler: &mut impl LinkHandler,
    ) -> bool {
        if self.role.is_server() == is_response {
            // Link control requests flow client to server; responses flow
            // server to client.
            log::error!("dropping packet: wrong direction for link control");
            self.errors.invalid_packet += 1;
            return false;
        }

        if is_response {
            if !payload.is_empty() {
                log::error!("dropping packet: link control response with data");
                self.errors.invalid_packet += 1;
                return false;
            }
            let did_connect = !self.connection.active
                && self.pending_request.link_control
                && self.pending_request.payload.len() == 1;
            self.pending_request.active = false;
            self.connection.active = true;
            if did_connect {
                log::info!("connected");
                handler.connection_changed(true);
            }
            true
        } else {
            // The payload length tells the request type apart.
            match payload.len() {
                0 => {
                    // Connection maintenance.
                    if !self.connection.active {
                        log::error!("dropping packet: maintenance request while not connected");
                        self.errors.unexpected_packet += 1;
                        return false;
                    }
                }
                1 => {
                    // Connection request; tear down any existing connection.
                    if self.connection.active {
                        self.disconnect(handler);
                    }
                    log::info!("connected");
                    // The payload byte seeds our transmit sequence numbering.
                    self.pending_request.sequence = payload[0].wrapping_sub(1);
                    self.connection.active = true;
                    handler.connection_changed(true);
                }
                len => {
                    log::error!("dropping packet: bad link control length ({len})");
                    self.errors.invalid_packet += 1;
                    return false;
                }
            }

            // Valid request; the response never carries data.
            self.pending_response.active = true;
            self.pending_response.sequence = sequence;
            self.pending_response.link_control = true;
            self.pending_response.payload.clear();
            self.send_pending_response(transport);
            true
        }
    }

    fn poll(&mut self, transport: &mut impl Transport, handler: &mut impl LinkHandler) {
        let now_ms = transport.now_ms();
        let ms_since_last_packet = now_ms.wrapping_sub(self.connection.last_packet_ms);

        if self.connection.active && ms_since_last_packet >= CONNECTION_TIMEOUT_MS {
            log::info!("connection timed out");
            self.disconnect(handler);
        }

        if self.pending_request.active {
            if now_ms.wrapping_sub(self.pending_request.first_send_ms) >= REQUEST_TIMEOUT_MS {
                self.pending_request.active = false;
                if self.pending_request.link_control {
                    log::warn!("link control request timed out");
                } else {
                    log::warn!("request timed out");
                    handler.request_complete(false, &[]);
                }
            } else if now_ms.wrapping_sub(self.pending_request.last_send_ms)
                >= REQUEST_RETRY_INTERVAL_MS
            {
                self.send_pending_request(transport);
                self.errors.retries += 1;
            }
        } else if !self.role.is_server() {
            // The bus is free; the client drives connection establishment
            // and keep-alive.
            if !self.connection.active {
                // A somewhat-random initial sequence number based on time.
                let seed = (now_ms & 0xFF) as u8;
                self.connection.prev_rx_sequence = seed.wrapping_sub(1);
                let payload: [u8; 1] = [seed];
                let entries: [&[u8]; 1] = [&payload];
                self.set_pending_request(true, &BufferChain::new(&entries), now_ms);
                self.send_pending_request(transport);
            } else if ms_since_last_packet >= CONNECTION_MAINTENANCE_INTERVAL_MS {
                self.set_pending_request(true, &BufferChain::EMPTY, now_ms);
                self.send_pending_request(transport);
            }
        }
    }
}
