//! Action and instruction model
//!
//! Tagged variants describing the mutations a flow may perform on a packet
//! context and the control transfers a flow handler may request. Actions are
//! either applied immediately or written to the context's deferred list and
//! replayed at egress.
//!
//! Both [`Action`] and [`Instruction`] have a compact byte encoding (one
//! discriminant byte followed by the variant payload) so that flow programs
//! can be carried over control channels and compared bit-for-bit.

use crate::error::{Error, Result};

/// Address spaces a field may refer to.
///
/// Packet memory is the raw frame; metadata is the per-packet scratch region
/// addressed in parallel with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressSpace {
    /// Raw packet bytes
    Packet = 0,
    /// Per-packet metadata region
    Metadata = 1,
}

impl AddressSpace {
    /// The opposite address space
    #[inline(always)]
    pub const fn other(self) -> Self {
        match self {
            AddressSpace::Packet => AddressSpace::Metadata,
            AddressSpace::Metadata => AddressSpace::Packet,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(AddressSpace::Packet),
            1 => Ok(AddressSpace::Metadata),
            other => Err(Error::UnknownDiscriminant(other)),
        }
    }
}

/// A byte range within one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
    /// Which memory the range addresses
    pub space: AddressSpace,
    /// Absolute byte offset within the space
    pub offset: u16,
    /// Range length in bytes
    pub length: u16,
}

impl Field {
    /// Field in packet memory
    #[inline(always)]
    pub const fn packet(offset: u16, length: u16) -> Self {
        Self {
            space: AddressSpace::Packet,
            offset,
            length,
        }
    }

    /// Field in metadata memory
    #[inline(always)]
    pub const fn metadata(offset: u16, length: u16) -> Self {
        Self {
            space: AddressSpace::Metadata,
            offset,
            length,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.space as u8);
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 5 {
            return Err(Error::TruncatedEncoding);
        }
        let space = AddressSpace::from_code(buf[0])?;
        let offset = u16::from_be_bytes([buf[1], buf[2]]);
        let length = u16::from_be_bytes([buf[3], buf[4]]);
        Ok((
            Self {
                space,
                offset,
                length,
            },
            5,
        ))
    }
}

/// A packet mutation or forwarding decision
///
/// ```text
/// action ::= getfield <field>
///            setfield <field> <value>
///            copyfield <field> <offset>
///            output <port>
///            queue <queue>
///            group <group>
///            drop
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Observe the value of a field
    GetField(Field),
    /// Copy `value` into the field's range; the value length must equal the
    /// field length, partial writes are forbidden
    SetField {
        /// Destination range
        field: Field,
        /// Bytes written, exactly `field.length` of them
        value: Vec<u8>,
    },
    /// Copy the field's bytes into the *other* address space at `dst_offset`
    CopyField {
        /// Source range
        field: Field,
        /// Destination offset in the opposite space
        dst_offset: u16,
    },
    /// Set the egress port
    Output(u32),
    /// Set the egress queue
    Queue(u32),
    /// Set the group
    Group(u32),
    /// Stop forwarding this packet
    Drop,
}

const ACT_GET: u8 = 0;
const ACT_SET: u8 = 1;
const ACT_COPY: u8 = 2;
const ACT_OUTPUT: u8 = 3;
const ACT_QUEUE: u8 = 4;
const ACT_GROUP: u8 = 5;
const ACT_DROP: u8 = 6;

impl Action {
    /// Build a `SetField` from a value slice
    pub fn set_field(field: Field, value: &[u8]) -> Self {
        Action::SetField {
            field,
            value: value.to_vec(),
        }
    }

    /// Append the byte encoding of this action to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Action::GetField(f) => {
                out.push(ACT_GET);
                f.encode(out);
            }
            Action::SetField { field, value } => {
                out.push(ACT_SET);
                field.encode(out);
                out.extend_from_slice(value);
            }
            Action::CopyField { field, dst_offset } => {
                out.push(ACT_COPY);
                field.encode(out);
                out.extend_from_slice(&dst_offset.to_be_bytes());
            }
            Action::Output(p) => {
                out.push(ACT_OUTPUT);
                out.extend_from_slice(&p.to_be_bytes());
            }
            Action::Queue(q) => {
                out.push(ACT_QUEUE);
                out.extend_from_slice(&q.to_be_bytes());
            }
            Action::Group(g) => {
                out.push(ACT_GROUP);
                out.extend_from_slice(&g.to_be_bytes());
            }
            Action::Drop => out.push(ACT_DROP),
        }
    }

    /// Decode one action from the front of `buf`, returning it and the
    /// number of bytes consumed
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (&tag, rest) = buf.split_first().ok_or(Error::TruncatedEncoding)?;
        match tag {
            ACT_GET => {
                let (field, n) = Field::decode(rest)?;
                Ok((Action::GetField(field), 1 + n))
            }
            ACT_SET => {
                let (field, n) = Field::decode(rest)?;
                let len = field.length as usize;
                let value = rest
                    .get(n..n + len)
                    .ok_or(Error::TruncatedEncoding)?
                    .to_vec();
                Ok((Action::SetField { field, value }, 1 + n + len))
            }
            ACT_COPY => {
                let (field, n) = Field::decode(rest)?;
                let off = rest.get(n..n + 2).ok_or(Error::TruncatedEncoding)?;
                let dst_offset = u16::from_be_bytes([off[0], off[1]]);
                Ok((Action::CopyField { field, dst_offset }, 1 + n + 2))
            }
            ACT_OUTPUT => Ok((Action::Output(decode_u32(rest)?), 5)),
            ACT_QUEUE => Ok((Action::Queue(decode_u32(rest)?), 5)),
            ACT_GROUP => Ok((Action::Group(decode_u32(rest)?), 5)),
            ACT_DROP => Ok((Action::Drop, 1)),
            other => Err(Error::UnknownDiscriminant(other)),
        }
    }
}

/// A control directive executed by a flow handler
///
/// ```text
/// insn ::= apply <action>
///          write <action>
///          clear
///          goto <table>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Apply the action immediately
    Apply(Action),
    /// Append the action to the deferred list
    Write(Action),
    /// Empty the deferred list
    Clear,
    /// Transfer control to the table with this id
    Goto(u32),
}

const INS_APPLY: u8 = 0;
const INS_WRITE: u8 = 1;
const INS_CLEAR: u8 = 2;
const INS_GOTO: u8 = 3;

impl Instruction {
    /// Append the byte encoding of this instruction to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::Apply(a) => {
                out.push(INS_APPLY);
                a.encode(out);
            }
            Instruction::Write(a) => {
                out.push(INS_WRITE);
                a.encode(out);
            }
            Instruction::Clear => out.push(INS_CLEAR),
            Instruction::Goto(t) => {
                out.push(INS_GOTO);
                out.extend_from_slice(&t.to_be_bytes());
            }
        }
    }

    /// Decode one instruction from the front of `buf`
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (&tag, rest) = buf.split_first().ok_or(Error::TruncatedEncoding)?;
        match tag {
            INS_APPLY => {
                let (a, n) = Action::decode(rest)?;
                Ok((Instruction::Apply(a), 1 + n))
            }
            INS_WRITE => {
                let (a, n) = Action::decode(rest)?;
                Ok((Instruction::Write(a), 1 + n))
            }
            INS_CLEAR => Ok((Instruction::Clear, 1)),
            INS_GOTO => Ok((Instruction::Goto(decode_u32(rest)?), 5)),
            other => Err(Error::UnknownDiscriminant(other)),
        }
    }
}

fn decode_u32(buf: &[u8]) -> Result<u32> {
    let b = buf.get(..4).ok_or(Error::TruncatedEncoding)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}
