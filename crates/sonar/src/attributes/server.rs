//! The server side of the attribute layer: the registry, inbound read/write
//! routing, notify staging, and the inline control attributes.

use crate::attributes::{
    ATTR_LIST_BYTES, ATTR_LIST_ENTRIES, AttributeDef, CTRL_ATTR_LIST, CTRL_ATTR_OFFSET,
    CTRL_NUM_ATTRS, check_definition,
};
use crate::server::ServerObserver;

use bytes::BytesMut;
use codec::Ops;

struct Registered {
    def: AttributeDef,
    /// Staging for outgoing notify payloads; survives the retransmit window.
    request_buffer: BytesMut,
    /// Filled by the read handler when serving a read request.
    response_buffer: BytesMut,
}

/// Registration order is the enumeration order of the attribute list, so the
/// registry is an ordered list with linear ID lookup.
#[derive(Default)]
pub struct AttributeServer {
    attrs: Vec<Registered>,
    ctrl_attr_offset: u16,
    ctrl_scratch: [u8; ATTR_LIST_BYTES],
}

impl AttributeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: AttributeDef) -> bool {
        if !check_definition(&def) {
            return false;
        }
        if self.find(def.id).is_some() {
            log::error!("attribute 0x{:x} already registered", def.id);
            return false;
        }
        self.attrs.push(Registered {
            request_buffer: BytesMut::zeroed(def.max_size.max(1)),
            response_buffer: BytesMut::zeroed(def.max_size.max(1)),
            def,
        });
        true
    }

    pub fn num_attrs(&self) -> u16 {
        self.attrs.len() as u16
    }

    fn find(&self, id: u16) -> Option<usize> {
        self.attrs.iter().position(|attr| attr.def.id == id)
    }

    /// Serves a read request, control attributes included. The returned
    /// bytes become the response.
    pub fn handle_read(&mut self, id: u16, observer: &mut impl ServerObserver) -> Option<&[u8]> {
        if id == CTRL_NUM_ATTRS {
            let num_attrs = self.num_attrs();
            self.ctrl_scratch[..2].copy_from_slice(&num_attrs.to_le_bytes());
            return Some(&self.ctrl_scratch[..2]);
        }
        if id == CTRL_ATTR_OFFSET {
            self.ctrl_scratch[..2].copy_from_slice(&self.ctrl_attr_offset.to_le_bytes());
            return Some(&self.ctrl_scratch[..2]);
        }
        if id == CTRL_ATTR_LIST {
            self.ctrl_scratch.fill(0);
            let offset = self.ctrl_attr_offset as usize;
            for (slot, attr) in self
                .attrs
                .iter()
                .skip(offset)
                .take(ATTR_LIST_ENTRIES)
                .enumerate()
            {
                let entry = attr.def.id | attr.def.ops.bits();
                self.ctrl_scratch[slot * 2..slot * 2 + 2].copy_from_slice(&entry.to_le_bytes());
            }
            return Some(&self.ctrl_scratch);
        }

        let Some(index) = self.find(id) else {
            log::error!("read request for unknown attribute (0x{id:x})");
            return None;
        };
        let attr = &mut self.attrs[index];
        if !attr.def.ops.contains(Ops::R) {
            log::error!("read not supported for attribute (0x{id:x})");
            return None;
        }
        let Some(length) = observer.read(id, &mut attr.response_buffer) else {
            log::error!("read handler failed for attribute (0x{id:x})");
            return None;
        };
        if length > attr.def.max_size {
            log::error!("read handler returned too much data ({length}) for attribute (0x{id:x})");
            return None;
        }
        Some(&attr.response_buffer[..length])
    }

    pub fn handle_write(
        &mut self,
        id: u16,
        data: &[u8],
        observer: &mut impl ServerObserver,
    ) -> bool {
        if id == CTRL_ATTR_OFFSET {
            if data.len() != 2 {
                log::error!("invalid write length ({}) for the attribute list offset", data.len());
                return false;
            }
            self.ctrl_attr_offset = u16::from_le_bytes([data[0], data[1]]);
            return true;
        }

        let Some(index) = self.find(id) else {
            log::error!("write request for unknown attribute (0x{id:x})");
            return false;
        };
        let attr = &self.attrs[index];
        if !attr.def.ops.contains(Ops::W) {
            log::error!("write not supported for attribute (0x{id:x})");
            return false;
        }
        if data.len() > attr.def.max_size {
            log::error!(
                "write request too big ({}) for attribute (0x{id:x})",
                data.len()
            );
            return false;
        }
        observer.write(id, data)
    }

    /// Copies the notify payload into the attribute's staging buffer so the
    /// caller's bytes need not outlive this call.
    pub fn prepare_notify(&mut self, id: u16, data: &[u8]) -> Option<&[u8]> {
        let index = self.check_notify(id)?;
        let attr = &mut self.attrs[index];
        if data.len() > attr.def.max_size {
            log::error!("notify data too big ({}) for attribute (0x{id:x})", data.len());
            return None;
        }
        attr.request_buffer[..data.len()].copy_from_slice(data);
        Some(&attr.request_buffer[..data.len()])
    }

    /// Stages a notify payload produced by the attribute's read handler.
    pub fn prepare_notify_read(
        &mut self,
        id: u16,
        observer: &mut impl ServerObserver,
    ) -> Option<&[u8]> {
        let index = self.check_notify(id)?;
        let attr = &mut self.attrs[index];
        if !attr.def.ops.contains(Ops::R) {
            log::error!("read not supported for attribute (0x{id:x})");
            return None;
        }
        let Some(length) = observer.read(id, &mut attr.request_buffer) else {
            log::error!("read handler failed for attribute (0x{id:x})");
            return None;
        };
        if length > attr.def.max_size {
            log::error!("read handler returned too much data ({length}) for attribute (0x{id:x})");
            return None;
        }
        Some(&attr.request_buffer[..length])
    }

    pub fn handle_notify_response(
        &mut self,
        id: u16,
        success: bool,
        observer: &mut impl ServerObserver,
    ) {
        match self.find(id) {
            Some(index) if self.attrs[index].def.ops.contains(Ops::N) => {
                observer.notify_complete(id, success);
            }
            _ => log::error!("unexpected notify response (0x{id:x})"),
        }
    }

    fn check_notify(&self, id: u16) -> Option<usize> {
        let Some(index) = self.find(id) else {
            log::error!("unknown attribute (0x{id:x})");
            return None;
        };
        if !self.attrs[index].def.ops.contains(Ops::N) {
            log::error!("notify not supported for attribute (0x{id:x})");
            return None;
        }
        Some(index)
    }
}
