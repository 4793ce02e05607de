//! The opcode table: one byte of packet type, one fixed size per type.
//!
//! The size table is the single source of truth for framing. There is no
//! length prefix on the wire; a reader learns how many bytes to consume
//! from the opcode alone.

use crate::error::ProtocolError;

/// Packet type identifiers for wire version 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Handshake = 0x00,
    Ping = 0x01,
    MapBegin = 0x02,
    MapChunk = 0x03,
    MapEnd = 0x04,
    SetBlockClient = 0x05,
    SetBlockServer = 0x06,
    AddEntity = 0x07,
    Teleport = 0x08,
    MoveRotate = 0x09,
    Move = 0x0a,
    Rotate = 0x0b,
    RemoveEntity = 0x0c,
    Message = 0x0d,
    Kick = 0x0e,
    SetPermission = 0x0f,
    ExtInfo = 0x10,
    ExtEntry = 0x11,
}

impl OpCode {
    /// Every opcode in the canonical table, in wire order.
    pub const ALL: [OpCode; 18] = [
        OpCode::Handshake,
        OpCode::Ping,
        OpCode::MapBegin,
        OpCode::MapChunk,
        OpCode::MapEnd,
        OpCode::SetBlockClient,
        OpCode::SetBlockServer,
        OpCode::AddEntity,
        OpCode::Teleport,
        OpCode::MoveRotate,
        OpCode::Move,
        OpCode::Rotate,
        OpCode::RemoveEntity,
        OpCode::Message,
        OpCode::Kick,
        OpCode::SetPermission,
        OpCode::ExtInfo,
        OpCode::ExtEntry,
    ];

    /// Total packet length in bytes, including the opcode byte itself.
    pub const fn packet_size(self) -> usize {
        match self {
            OpCode::Handshake => 131,
            OpCode::Ping => 1,
            OpCode::MapBegin => 1,
            OpCode::MapChunk => 1028,
            OpCode::MapEnd => 7,
            OpCode::SetBlockClient => 9,
            OpCode::SetBlockServer => 8,
            OpCode::AddEntity => 74,
            OpCode::Teleport => 10,
            OpCode::MoveRotate => 7,
            OpCode::Move => 5,
            OpCode::Rotate => 4,
            OpCode::RemoveEntity => 2,
            OpCode::Message => 66,
            OpCode::Kick => 65,
            OpCode::SetPermission => 2,
            OpCode::ExtInfo => 67,
            OpCode::ExtEntry => 69,
        }
    }

    /// Whether a client may originate this packet type. Handshake and
    /// Teleport are bidirectional; Message doubles as outbound chat.
    pub const fn is_client_origin(self) -> bool {
        matches!(
            self,
            OpCode::Handshake
                | OpCode::SetBlockClient
                | OpCode::Teleport
                | OpCode::Message
                | OpCode::ExtInfo
                | OpCode::ExtEntry
        )
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(OpCode::Handshake),
            0x01 => Ok(OpCode::Ping),
            0x02 => Ok(OpCode::MapBegin),
            0x03 => Ok(OpCode::MapChunk),
            0x04 => Ok(OpCode::MapEnd),
            0x05 => Ok(OpCode::SetBlockClient),
            0x06 => Ok(OpCode::SetBlockServer),
            0x07 => Ok(OpCode::AddEntity),
            0x08 => Ok(OpCode::Teleport),
            0x09 => Ok(OpCode::MoveRotate),
            0x0a => Ok(OpCode::Move),
            0x0b => Ok(OpCode::Rotate),
            0x0c => Ok(OpCode::RemoveEntity),
            0x0d => Ok(OpCode::Message),
            0x0e => Ok(OpCode::Kick),
            0x0f => Ok(OpCode::SetPermission),
            0x10 => Ok(OpCode::ExtInfo),
            0x11 => Ok(OpCode::ExtEntry),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}
