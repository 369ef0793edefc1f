//! ## SONAR wire codecs
//!
//! SONAR is a point-to-point request/response protocol carrying small named
//! attributes between a single client and a single server over an arbitrary
//! byte transport, typically a UART. This crate implements the wire formats
//! only; the protocol engine lives in the `sonar` crate.
//!
//! ### Frame structure
//!
//! ```text
//!  0        1        2 .. N    N+1      N+2
//! +--------+--------+--------+--------+--------+
//! | flags  |  seq   | payload| crc_lo | crc_hi |
//! +--------+--------+--------+--------+--------+
//! ```
//!
//! Every frame is delimited by `0x7E` flag bytes and byte-stuffed: `0x7E`
//! and `0x7D` inside the frame are written as `0x7D` followed by the byte
//! XOR `0x20`. The CRC is CRC-16/CCITT-FALSE over the unescaped header and
//! payload, little-endian on the wire.
//!
//! ### Flags byte
//!
//! ```text
//! bit 0: response (1) / request (0)
//! bit 1: direction, 1 for server to client
//! bit 2: link control
//! bit 3: reserved, must be zero
//! bits 4-7: protocol version, currently 1
//! ```
//!
//! The first two payload bytes of a non-link-control request form the
//! application header, a little-endian `u16` packing a 3-bit operation code
//! and a 12-bit attribute ID; see [`header::AttributeHeader`].

pub mod chain;
pub mod crc;
pub mod frame;
pub mod header;

pub use chain::BufferChain;
pub use crc::{CRC16_SEED, crc16};
pub use frame::{Deframer, Frame, FramingErrors, write_frame};
pub use header::{AttributeHeader, Opcode, Ops, Role};

/// Fixed per-frame overhead around the attribute data: the two link header
/// bytes, the two application header bytes and the two CRC bytes.
pub const FRAME_OVERHEAD: usize = 6;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Fewer bytes than the format requires.
    Truncated,
    /// The operation code field does not name a known operation.
    UnknownOpcode(u16),
    /// Capability bits outside the defined read/write/notify set.
    InvalidOps(u16),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
