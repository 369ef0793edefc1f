use crate::chain::BufferChain;
use crate::crc::{CRC16_SEED, crc16};
use crate::header::{
    self, FLAGS_DIRECTION, FLAGS_LINK_CONTROL, FLAGS_RESERVED, FLAGS_RESPONSE, FLAGS_VERSION_MASK,
    FLAGS_VERSION_SHIFT, Role,
};

/// Frame delimiter.
pub const FLAG_BYTE: u8 = 0x7E;
/// Escape introducer for flag and escape bytes inside a frame.
pub const ESCAPE_BYTE: u8 = 0x7D;
/// XOR applied to an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

/// Link header plus CRC footer, the smallest valid frame.
const MIN_FRAME_LEN: usize = 4;

/// A validated frame as seen by the link layer: header fields decoded, CRC
/// and direction already checked, escaping removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub is_response: bool,
    pub is_link_control: bool,
    pub sequence: u8,
    pub payload: &'a [u8],
}

/// Counters for everything the receive path drops. Values only grow until
/// they are taken.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramingErrors {
    /// Reserved bit set, unknown version, or wrong direction.
    pub invalid_header: u32,
    pub invalid_crc: u32,
    /// Frame larger than the receive buffer.
    pub buffer_overflow: u32,
    /// Escape introducer followed by a flag or escape byte.
    pub invalid_escape_sequence: u32,
}

/// Decodes the flag/escape byte stream back into frames.
///
/// Bytes are pushed one at a time; a completed, validated frame is returned
/// from the push that carried its closing flag. A flag byte always ends the
/// current frame and starts the next one, so the decoder resynchronizes on
/// the next flag after any corruption.
pub struct Deframer {
    role: Role,
    buffer: Box<[u8]>,
    received: usize,
    started: bool,
    escaping: bool,
    errors: FramingErrors,
}

impl Deframer {
    /// `capacity` bounds the unescaped frame size and should be the largest
    /// supported attribute plus [`crate::FRAME_OVERHEAD`].
    pub fn new(role: Role, capacity: usize) -> Self {
        Self {
            role,
            buffer: vec![0; capacity].into_boxed_slice(),
            received: 0,
            started: false,
            escaping: false,
            errors: FramingErrors::default(),
        }
    }

    /// Feeds one byte; returns the completed frame when this byte closed one.
    pub fn push_byte(&mut self, byte: u8) -> Option<Frame<'_>> {
        if self.started {
            if self.escaping {
                self.escaping = false;
                if byte == ESCAPE_BYTE || byte == FLAG_BYTE {
                    log::error!("illegal escape sequence in frame");
                    self.errors.invalid_escape_sequence += 1;
                    self.started = false;
                    self.received = 0;
                } else {
                    self.store_byte(byte ^ ESCAPE_XOR);
                }
            } else if byte == ESCAPE_BYTE {
                self.escaping = true;
            } else if byte != FLAG_BYTE {
                self.store_byte(byte);
            }
        } else {
            self.escaping = false;
        }

        if byte == FLAG_BYTE {
            let frame_len = self.received;
            self.started = true;
            self.received = 0;
            return self.finish_frame(frame_len);
        }
        None
    }

    /// Current error counters, resetting them to zero.
    pub fn take_errors(&mut self) -> FramingErrors {
        std::mem::take(&mut self.errors)
    }

    fn store_byte(&mut self, byte: u8) {
        if self.received < self.buffer.len() {
            self.buffer[self.received] = byte;
            self.received += 1;
        } else {
            log::error!("frame overflowed receive buffer");
            self.errors.buffer_overflow += 1;
            self.started = false;
            self.received = 0;
        }
    }

    fn finish_frame(&mut self, frame_len: usize) -> Option<Frame<'_>> {
        if frame_len < MIN_FRAME_LEN {
            return None;
        }

        let flags = self.buffer[0];
        let sequence = self.buffer[1];
        let data_len = frame_len - MIN_FRAME_LEN;
        let crc_offset = 2 + data_len;
        let received_crc =
            u16::from_le_bytes([self.buffer[crc_offset], self.buffer[crc_offset + 1]]);
        let calculated_crc = crc16(&self.buffer[..crc_offset], CRC16_SEED);

        let version = (flags & FLAGS_VERSION_MASK) >> FLAGS_VERSION_SHIFT;
        let is_server_to_client = flags & FLAGS_DIRECTION != 0;

        if flags & FLAGS_RESERVED != 0 {
            log::error!("dropping frame: reserved flag bits set");
            self.errors.invalid_header += 1;
            return None;
        } else if version != header::VERSION {
            log::error!("dropping frame: unsupported version {version}");
            self.errors.invalid_header += 1;
            return None;
        } else if received_crc != calculated_crc {
            log::error!(
                "dropping frame: crc mismatch (received=0x{received_crc:04x}, calculated=0x{calculated_crc:04x})"
            );
            self.errors.invalid_crc += 1;
            return None;
        } else if is_server_to_client == self.role.is_server() {
            log::error!("dropping frame: wrong direction");
            self.errors.invalid_header += 1;
            return None;
        }

        Some(Frame {
            is_response: flags & FLAGS_RESPONSE != 0,
            is_link_control: flags & FLAGS_LINK_CONTROL != 0,
            sequence,
            payload: &self.buffer[2..crc_offset],
        })
    }
}

/// Encodes and writes one frame, escaping as it goes.
///
/// The CRC covers the unescaped header and payload bytes; escaping applies
/// to everything between the two delimiting flags, the CRC footer included.
///
/// # Test
///
/// ```
/// use sonar_codec::{BufferChain, Role, write_frame};
///
/// let mut wire = Vec::new();
/// let payload = [0x00u8];
/// write_frame(
///     &mut |byte| wire.push(byte),
///     Role::Client,
///     false,
///     true,
///     1,
///     &BufferChain::new(&[&payload]),
/// );
/// // Client connection request at time zero.
/// assert_eq!(wire, [0x7E, 0x14, 0x01, 0x00, 0x0E, 0x60, 0x7E]);
/// ```
pub fn write_frame(
    sink: &mut impl FnMut(u8),
    role: Role,
    is_response: bool,
    is_link_control: bool,
    sequence: u8,
    payload: &BufferChain<'_>,
) {
    sink(FLAG_BYTE);

    let header = [
        header::encode_flags(role, is_response, is_link_control),
        sequence,
    ];
    write_escaped(sink, &header);
    let mut crc = crc16(&header, CRC16_SEED);

    for entry in payload.entries() {
        write_escaped(sink, entry);
        crc = crc16(entry, crc);
    }

    write_escaped(sink, &crc.to_le_bytes());
    sink(FLAG_BYTE);
}

fn write_escaped(sink: &mut impl FnMut(u8), data: &[u8]) {
    for &byte in data {
        if byte == FLAG_BYTE || byte == ESCAPE_BYTE {
            sink(ESCAPE_BYTE);
            sink(byte ^ ESCAPE_XOR);
        } else {
            sink(byte);
        }
    }
}
