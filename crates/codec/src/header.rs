use crate::Error;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Protocol version carried in the upper nibble of the flags byte.
pub const VERSION: u8 = 1;

pub const FLAGS_RESPONSE: u8 = 1 << 0;
pub const FLAGS_DIRECTION: u8 = 1 << 1;
pub const FLAGS_LINK_CONTROL: u8 = 1 << 2;
pub const FLAGS_RESERVED: u8 = 1 << 3;
pub const FLAGS_VERSION_MASK: u8 = 0xF0;
pub const FLAGS_VERSION_SHIFT: u8 = 4;

/// Attribute IDs occupy the low 12 bits of the application header.
pub const ATTRIBUTE_ID_MASK: u16 = 0x0FFF;

/// Which of the two endpoints this one is. The direction bit of every frame
/// names the sender's role, so a receiver rejects frames carrying its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_server(self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Builds the flags byte for an outgoing frame.
///
/// # Test
///
/// ```
/// use sonar_codec::Role;
/// use sonar_codec::header::encode_flags;
///
/// // Client connection request: version 1 | link control.
/// assert_eq!(encode_flags(Role::Client, false, true), 0x14);
/// // Server link control response: version | link control | direction | response.
/// assert_eq!(encode_flags(Role::Server, true, true), 0x17);
/// // Plain client data request.
/// assert_eq!(encode_flags(Role::Client, false, false), 0x10);
/// ```
pub fn encode_flags(role: Role, is_response: bool, is_link_control: bool) -> u8 {
    let mut flags = VERSION << FLAGS_VERSION_SHIFT;
    if is_link_control {
        flags |= FLAGS_LINK_CONTROL;
    }
    if role.is_server() {
        flags |= FLAGS_DIRECTION;
    }
    if is_response {
        flags |= FLAGS_RESPONSE;
    }
    flags
}

/// The three attribute operations, as encoded in bits 12-14 of the
/// application header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Read = 0x1,
    Write = 0x2,
    Notify = 0x3,
}

/// The operation capability set an attribute declares: any non-empty subset
/// of read, write and notify. The bit positions match the entries of the
/// control attribute list, so a capability set is compared against the wire
/// with no translation.
///
/// # Test
///
/// ```
/// use sonar_codec::Ops;
///
/// assert_eq!(Ops::RWN.bits(), 0x7000);
/// assert!(Ops::RW.contains(Ops::R));
/// assert!(!Ops::RN.contains(Ops::W));
/// assert!(Ops::from_bits(0x3000).is_ok());
/// assert!(Ops::from_bits(0x8000).is_err());
/// assert!(Ops::from_bits(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ops(u16);

impl Ops {
    pub const R: Ops = Ops(0x1000);
    pub const W: Ops = Ops(0x2000);
    pub const N: Ops = Ops(0x4000);
    pub const RW: Ops = Ops(0x1000 | 0x2000);
    pub const RN: Ops = Ops(0x1000 | 0x4000);
    pub const WN: Ops = Ops(0x2000 | 0x4000);
    pub const RWN: Ops = Ops(0x1000 | 0x2000 | 0x4000);

    const MASK: u16 = 0x7000;

    /// The wire encoding, suitable for OR-ing with a 12-bit attribute ID.
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parses capability bits received off the wire.
    pub fn from_bits(bits: u16) -> Result<Ops, Error> {
        if bits == 0 || bits & !Self::MASK != 0 {
            return Err(Error::InvalidOps(bits));
        }
        Ok(Ops(bits))
    }
}

/// The two-byte application header: `(op << 12) | attribute_id`,
/// little-endian on the wire.
///
/// # Test
///
/// ```
/// use sonar_codec::{AttributeHeader, Opcode};
///
/// let header = AttributeHeader { op: Opcode::Read, id: 0xFFF };
/// assert_eq!(header.encode(), [0xFF, 0x1F]);
///
/// let decoded = AttributeHeader::decode(&[0xFF, 0x2F]).unwrap();
/// assert_eq!(decoded.op, Opcode::Write);
/// assert_eq!(decoded.id, 0xFFF);
///
/// assert!(AttributeHeader::decode(&[0xFF]).is_err());
/// assert!(AttributeHeader::decode(&[0x00, 0x90]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeHeader {
    pub op: Opcode,
    pub id: u16,
}

impl AttributeHeader {
    pub fn encode(&self) -> [u8; 2] {
        let value = ((u8::from(self.op) as u16) << 12) | (self.id & ATTRIBUTE_ID_MASK);
        value.to_le_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 2 {
            return Err(Error::Truncated);
        }
        let value = u16::from_le_bytes([bytes[0], bytes[1]]);
        let op = Opcode::try_from((value >> 12) as u8)
            .map_err(|_| Error::UnknownOpcode(value >> 12))?;
        Ok(Self {
            op,
            id: value & ATTRIBUTE_ID_MASK,
        })
    }
}
