#![allow(dead_code)]

use codec::{BufferChain, Role, write_frame};
use sonar::Transport;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub fn clock() -> Rc<Cell<u64>> {
    Rc::new(Cell::new(0))
}

/// A transport that records written bytes and reads a shared, manually
/// stepped clock.
#[derive(Clone)]
pub struct TestTransport {
    pub sent: Rc<RefCell<Vec<u8>>>,
    pub clock: Rc<Cell<u64>>,
}

impl TestTransport {
    pub fn new(clock: &Rc<Cell<u64>>) -> Self {
        Self {
            sent: Rc::new(RefCell::new(Vec::new())),
            clock: clock.clone(),
        }
    }

    pub fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }
}

impl Transport for TestTransport {
    fn write_byte(&mut self, byte: u8) {
        self.sent.borrow_mut().push(byte);
    }

    fn now_ms(&self) -> u64 {
        self.clock.get()
    }
}

/// Encodes one frame the way the peer at `role` would put it on the wire.
pub fn frame_bytes(
    role: Role,
    is_response: bool,
    is_link_control: bool,
    sequence: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut wire = Vec::new();
    write_frame(
        &mut |byte| wire.push(byte),
        role,
        is_response,
        is_link_control,
        sequence,
        &BufferChain::new(&[payload]),
    );
    wire
}
