//! The client side of the attribute layer: the registry with availability
//! tracking and the discovery state machine run over the control channel.
//!
//! Discovery starts when the link comes up: read the attribute count, write
//! the list offset, read a list chunk, and repeat with the offset advanced
//! until every entry is consumed. Locally registered attributes become
//! available only when the server advertises the same ID with the same
//! capability set. Any failed step tears the logical connection down.

use crate::attributes::{
    ATTR_LIST_ENTRIES, AttributeDef, CTRL_ATTR_LIST, CTRL_ATTR_OFFSET, CTRL_NUM_ATTRS,
    ENTRY_OPS_MASK, ENTRY_RESERVED_BIT, check_definition,
};
use crate::client::ClientObserver;

use ahash::{HashMap, HashMapExt};
use bytes::BytesMut;
use codec::{Ops, header::ATTRIBUTE_ID_MASK};

struct Registered {
    def: AttributeDef,
    /// Staging for outgoing write payloads; survives the retransmit window.
    request_buffer: BytesMut,
    available: bool,
}

/// The next discovery step, queued from a completion event and issued by the
/// endpoint once the engine is quiescent again. Stop-and-wait bounds the
/// queue depth at one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    ReadNumAttrs,
    WriteOffset(u16),
    ReadAttrList,
}

pub struct AttributeClient {
    attrs: HashMap<u16, Registered>,
    connected: bool,
    num_attrs: u16,
    attr_offset: u16,
    pending_control: Option<ControlRequest>,
}

impl AttributeClient {
    pub fn new() -> Self {
        Self {
            attrs: HashMap::new(),
            connected: false,
            num_attrs: 0,
            attr_offset: 0,
            pending_control: None,
        }
    }

    pub fn register(&mut self, def: AttributeDef) -> bool {
        if !check_definition(&def) {
            return false;
        }
        if self.attrs.contains_key(&def.id) {
            log::error!("attribute 0x{:x} already registered", def.id);
            return false;
        }
        if self.connected {
            log::error!("attributes must be registered before a connection is established");
            return false;
        }
        self.attrs.insert(
            def.id,
            Registered {
                request_buffer: BytesMut::zeroed(def.max_size.max(1)),
                available: false,
                def,
            },
        );
        true
    }

    /// Connected from the user's point of view: discovery has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn take_pending_control(&mut self) -> Option<ControlRequest> {
        self.pending_control.take()
    }

    pub fn on_link_connected(&mut self) {
        // Kick off enumeration by reading the server's attribute count.
        self.pending_control = Some(ControlRequest::ReadNumAttrs);
    }

    pub fn on_link_disconnected(&mut self, observer: &mut impl ClientObserver) {
        log::info!("disconnected");
        self.drop_connection(observer);
    }

    fn drop_connection(&mut self, observer: &mut impl ClientObserver) {
        for attr in self.attrs.values_mut() {
            attr.available = false;
        }
        self.connected = false;
        self.pending_control = None;
        observer.connection_changed(false);
    }

    pub fn check_read(&self, id: u16) -> bool {
        let Some(attr) = self.attrs.get(&id) else {
            log::error!("unknown attribute (0x{id:x})");
            return false;
        };
        if !attr.def.ops.contains(Ops::R) {
            log::error!("read not allowed for attribute (0x{id:x})");
            return false;
        }
        if !attr.available {
            log::error!("attribute not available (0x{id:x})");
            return false;
        }
        true
    }

    /// Copies the write payload into the attribute's staging buffer so the
    /// caller's bytes need not outlive this call.
    pub fn prepare_write(&mut self, id: u16, data: &[u8]) -> Option<&[u8]> {
        let Some(attr) = self.attrs.get_mut(&id) else {
            log::error!("unknown attribute (0x{id:x})");
            return None;
        };
        if !attr.def.ops.contains(Ops::W) {
            log::error!("write not allowed for attribute (0x{id:x})");
            return None;
        }
        if !attr.available {
            log::error!("attribute not available (0x{id:x})");
            return None;
        }
        if data.len() > attr.def.max_size {
            log::error!("write data too big ({}) for attribute (0x{id:x})", data.len());
            return None;
        }
        attr.request_buffer[..data.len()].copy_from_slice(data);
        Some(&attr.request_buffer[..data.len()])
    }

    pub fn handle_read_response(
        &mut self,
        id: u16,
        success: bool,
        data: &[u8],
        observer: &mut impl ClientObserver,
    ) {
        // Control attributes route into the discovery state machine.
        if id == CTRL_NUM_ATTRS {
            self.num_attrs_read_complete(success, data, observer);
            return;
        }
        if id == CTRL_ATTR_LIST {
            self.attr_list_read_complete(success, data, observer);
            return;
        }

        let Some(attr) = self.attrs.get(&id) else {
            log::error!("unexpected read response (0x{id:x})");
            return;
        };
        if !attr.def.ops.contains(Ops::R) {
            log::error!("unexpected read response (0x{id:x})");
            return;
        }
        if success && data.len() > attr.def.max_size {
            log::error!("read response too big ({}) for attribute (0x{id:x})", data.len());
            return;
        }
        if !attr.available {
            // Can happen right after a disconnect.
            log::error!("read response for unavailable attribute (0x{id:x})");
            return;
        }
        observer.read_complete(id, success, data);
    }

    pub fn handle_write_response(
        &mut self,
        id: u16,
        success: bool,
        observer: &mut impl ClientObserver,
    ) {
        if id == CTRL_ATTR_OFFSET {
            self.attr_offset_write_complete(success, observer);
            return;
        }

        let Some(attr) = self.attrs.get(&id) else {
            log::error!("unexpected write response (0x{id:x})");
            return;
        };
        if !attr.def.ops.contains(Ops::W) {
            log::error!("unexpected write response (0x{id:x})");
            return;
        }
        if !attr.available {
            log::error!("write response for unavailable attribute (0x{id:x})");
            return;
        }
        observer.write_complete(id, success);
    }

    pub fn handle_notify(
        &mut self,
        id: u16,
        data: &[u8],
        observer: &mut impl ClientObserver,
    ) -> bool {
        let Some(attr) = self.attrs.get(&id) else {
            log::error!("notify request for unknown attribute (0x{id:x})");
            return false;
        };
        if !attr.def.ops.contains(Ops::N) {
            log::error!("notify not supported for attribute (0x{id:x})");
            return false;
        }
        if data.len() > attr.def.max_size {
            log::error!("notify request too big ({}) for attribute (0x{id:x})", data.len());
            return false;
        }
        if !attr.available {
            log::error!("notify request for unavailable attribute (0x{id:x})");
            return false;
        }
        observer.notify(id, data)
    }

    fn num_attrs_read_complete(
        &mut self,
        success: bool,
        data: &[u8],
        observer: &mut impl ClientObserver,
    ) {
        if !success || data.len() < 2 {
            log::error!("failed to read the attribute count");
            self.drop_connection(observer);
            return;
        }
        self.num_attrs = u16::from_le_bytes([data[0], data[1]]);
        self.attr_offset = 0;
        self.pending_control = Some(ControlRequest::WriteOffset(0));
    }

    fn attr_offset_write_complete(&mut self, success: bool, observer: &mut impl ClientObserver) {
        if !success {
            log::error!("failed to write the attribute list offset");
            self.drop_connection(observer);
            return;
        }
        self.pending_control = Some(ControlRequest::ReadAttrList);
    }

    fn attr_list_read_complete(
        &mut self,
        success: bool,
        data: &[u8],
        observer: &mut impl ClientObserver,
    ) {
        if !success {
            log::error!("failed to read the attribute list");
            self.drop_connection(observer);
            return;
        }

        let remaining = self.num_attrs.saturating_sub(self.attr_offset) as usize;
        let has_more = remaining > ATTR_LIST_ENTRIES;
        let count = remaining.min(ATTR_LIST_ENTRIES);
        for slot in 0..count {
            let Some(bytes) = data.get(slot * 2..slot * 2 + 2) else {
                break;
            };
            let entry = u16::from_le_bytes([bytes[0], bytes[1]]);
            let Some(attr) = self.attrs.get_mut(&(entry & ATTRIBUTE_ID_MASK)) else {
                // Not supported locally.
                continue;
            };
            if entry & ENTRY_RESERVED_BIT != 0 {
                log::error!("invalid capability bits in list entry (0x{entry:x})");
                continue;
            }
            if attr.def.ops.bits() != entry & ENTRY_OPS_MASK {
                // Capability mismatch between the two sides.
                continue;
            }
            attr.available = true;
        }

        if has_more {
            self.attr_offset += ATTR_LIST_ENTRIES as u16;
            self.pending_control = Some(ControlRequest::WriteOffset(self.attr_offset));
        } else {
            log::info!("connected");
            self.connected = true;
            observer.connection_changed(true);
        }
    }
}

impl Default for AttributeClient {
    fn default() -> Self {
        Self::new()
    }
}
