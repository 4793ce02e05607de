//! Packet codec: typed packets in, exact fixed-size wire bytes out.
//!
//! Every multi-byte integer is big-endian and every protocol string is
//! ASCII, right-padded with spaces to exactly 64 bytes. Display fields
//! (chat lines, MOTD, kick reasons, entity display names) truncate to the
//! field width; identity fields (the handshake username and verification
//! key) refuse to encode oversize input instead, since truncating an
//! identity silently would let two distinct names collide on the wire.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::opcode::OpCode;
use crate::position::Position;

/// The wire version this codec speaks.
pub const PROTOCOL_VERSION: u8 = 0x07;

/// Fixed width of every protocol string field.
pub const STRING_LEN: usize = 64;

/// Payload bytes carried by one MapChunk packet.
pub const MAP_CHUNK_SIZE: usize = 1024;

/// Entity ID addressing the receiving player itself. Valid in encode and
/// decode without occupying a registry slot.
pub const SELF_ID: i8 = -1;

/// An immutable, wire-ready packet: an opcode plus exactly the bytes the
/// size table prescribes for it. Byte 0 is always the opcode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: OpCode,
    bytes: Bytes,
}

impl Packet {
    fn from_buf(opcode: OpCode, buf: BytesMut) -> Self {
        debug_assert_eq!(buf.len(), opcode.packet_size());
        Self {
            opcode,
            bytes: buf.freeze(),
        }
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Build a chat Message packet directly. Infallible: the text is a
    /// display field and truncates at the field width.
    pub fn message(sender: i8, text: &str) -> Packet {
        let mut buf = new_buf(OpCode::Message);
        buf.put_i8(sender);
        put_str_padded(&mut buf, text);
        Packet::from_buf(OpCode::Message, buf)
    }
}

fn new_buf(opcode: OpCode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(opcode.packet_size());
    buf.put_u8(opcode as u8);
    buf
}

fn wire_byte(ch: char) -> u8 {
    if ch.is_ascii() && !ch.is_ascii_control() {
        ch as u8
    } else {
        b'?'
    }
}

/// Write a display string: truncate to the field width, pad with spaces.
fn put_str_padded(buf: &mut BytesMut, text: &str) {
    let mut written = 0;
    for ch in text.chars().take(STRING_LEN) {
        buf.put_u8(wire_byte(ch));
        written += 1;
    }
    for _ in written..STRING_LEN {
        buf.put_u8(b' ');
    }
}

/// Write an identity string: oversize input is an error, never truncated.
fn put_str_exact(
    buf: &mut BytesMut,
    field: &'static str,
    text: &str,
) -> Result<(), ProtocolError> {
    if text.chars().count() > STRING_LEN {
        return Err(ProtocolError::FieldEncoding {
            field,
            limit: STRING_LEN,
        });
    }
    put_str_padded(buf, text);
    Ok(())
}

/// Read a 64-byte string field, trimming the trailing space padding.
/// Bytes outside printable ASCII decode as `?` rather than faulting;
/// framing integrity depends only on sizes, not on string contents.
fn get_str(buf: &mut &[u8]) -> String {
    let mut raw = [0u8; STRING_LEN];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    raw[..end]
        .iter()
        .map(|&b| {
            if (0x20..=0x7e).contains(&b) {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

fn put_coords(buf: &mut BytesMut, x: i16, y: i16, z: i16) {
    // Wire order is x, z, y: the second short is the height.
    buf.put_i16(x);
    buf.put_i16(z);
    buf.put_i16(y);
}

fn get_coords(buf: &mut &[u8]) -> (i16, i16, i16) {
    let x = buf.get_i16();
    let z = buf.get_i16();
    let y = buf.get_i16();
    (x, y, z)
}

fn put_position(buf: &mut BytesMut, pos: &Position) {
    put_coords(buf, pos.x, pos.y, pos.z);
    buf.put_u8(pos.yaw);
    buf.put_u8(pos.pitch);
}

fn get_position(buf: &mut &[u8]) -> Position {
    let (x, y, z) = get_coords(buf);
    let yaw = buf.get_u8();
    let pitch = buf.get_u8();
    Position::new(x, y, z, yaw, pitch)
}

/// Validate the frame and return its opcode.
fn check_frame(bytes: &[u8]) -> Result<OpCode, ProtocolError> {
    let first = *bytes.first().ok_or(ProtocolError::Framing {
        opcode: 0,
        expected: 1,
        actual: 0,
    })?;
    let opcode = OpCode::try_from(first)?;
    if bytes.len() != opcode.packet_size() {
        return Err(ProtocolError::Framing {
            opcode: first,
            expected: opcode.packet_size(),
            actual: bytes.len(),
        });
    }
    Ok(opcode)
}

/// Whether a block-change packet places or removes a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Destroy,
    Place,
}

impl From<u8> for BlockMode {
    fn from(value: u8) -> Self {
        // Anything but an explicit place request is treated as removal.
        if value == 0x01 {
            BlockMode::Place
        } else {
            BlockMode::Destroy
        }
    }
}

impl From<BlockMode> for u8 {
    fn from(mode: BlockMode) -> u8 {
        match mode {
            BlockMode::Destroy => 0x00,
            BlockMode::Place => 0x01,
        }
    }
}

/// Packets a client may send to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Handshake {
        protocol_version: u8,
        username: String,
        verification_key: String,
        padding: u8,
    },
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        mode: BlockMode,
        block: u8,
    },
    /// The client's own position report; arrives on the Teleport opcode
    /// with the self sentinel as entity ID.
    Position { entity_id: i8, position: Position },
    Message { entity_id: i8, text: String },
    ExtInfo {
        app_name: String,
        extension_count: i16,
    },
    ExtEntry { name: String, version: i32 },
}

impl ClientPacket {
    pub fn opcode(&self) -> OpCode {
        match self {
            ClientPacket::Handshake { .. } => OpCode::Handshake,
            ClientPacket::SetBlock { .. } => OpCode::SetBlockClient,
            ClientPacket::Position { .. } => OpCode::Teleport,
            ClientPacket::Message { .. } => OpCode::Message,
            ClientPacket::ExtInfo { .. } => OpCode::ExtInfo,
            ClientPacket::ExtEntry { .. } => OpCode::ExtEntry,
        }
    }

    /// Parse a complete frame of exactly the size the opcode prescribes.
    pub fn decode(bytes: &[u8]) -> Result<ClientPacket, ProtocolError> {
        let opcode = check_frame(bytes)?;
        if !opcode.is_client_origin() {
            return Err(ProtocolError::ProtocolOrder(
                "packet type is not valid from a client",
            ));
        }
        let mut buf = &bytes[1..];
        let packet = match opcode {
            OpCode::Handshake => ClientPacket::Handshake {
                protocol_version: buf.get_u8(),
                username: get_str(&mut buf),
                verification_key: get_str(&mut buf),
                padding: buf.get_u8(),
            },
            OpCode::SetBlockClient => {
                let (x, y, z) = get_coords(&mut buf);
                ClientPacket::SetBlock {
                    x,
                    y,
                    z,
                    mode: BlockMode::from(buf.get_u8()),
                    block: buf.get_u8(),
                }
            }
            OpCode::Teleport => ClientPacket::Position {
                entity_id: buf.get_i8(),
                position: get_position(&mut buf),
            },
            OpCode::Message => ClientPacket::Message {
                entity_id: buf.get_i8(),
                text: get_str(&mut buf),
            },
            OpCode::ExtInfo => ClientPacket::ExtInfo {
                app_name: get_str(&mut buf),
                extension_count: buf.get_i16(),
            },
            OpCode::ExtEntry => ClientPacket::ExtEntry {
                name: get_str(&mut buf),
                version: buf.get_i32(),
            },
            _ => unreachable!("origin check covers the remaining opcodes"),
        };
        Ok(packet)
    }

    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let opcode = self.opcode();
        let mut buf = new_buf(opcode);
        match self {
            ClientPacket::Handshake {
                protocol_version,
                username,
                verification_key,
                padding,
            } => {
                buf.put_u8(*protocol_version);
                put_str_exact(&mut buf, "username", username)?;
                put_str_exact(&mut buf, "verification_key", verification_key)?;
                buf.put_u8(*padding);
            }
            ClientPacket::SetBlock {
                x,
                y,
                z,
                mode,
                block,
            } => {
                put_coords(&mut buf, *x, *y, *z);
                buf.put_u8(u8::from(*mode));
                buf.put_u8(*block);
            }
            ClientPacket::Position {
                entity_id,
                position,
            } => {
                buf.put_i8(*entity_id);
                put_position(&mut buf, position);
            }
            ClientPacket::Message { entity_id, text } => {
                buf.put_i8(*entity_id);
                put_str_padded(&mut buf, text);
            }
            ClientPacket::ExtInfo {
                app_name,
                extension_count,
            } => {
                put_str_padded(&mut buf, app_name);
                buf.put_i16(*extension_count);
            }
            ClientPacket::ExtEntry { name, version } => {
                put_str_padded(&mut buf, name);
                buf.put_i32(*version);
            }
        }
        Ok(Packet::from_buf(opcode, buf))
    }
}

/// Packets the server may send to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Handshake {
        protocol_version: u8,
        server_name: String,
        motd: String,
        permission: u8,
    },
    Ping,
    MapBegin,
    /// Up to [`MAP_CHUNK_SIZE`] bytes of the level payload; shorter chunks
    /// are zero-padded on the wire and the length prefix says how much is
    /// real.
    MapChunk { data: Vec<u8>, percent: u8 },
    MapEnd {
        width: i16,
        height: i16,
        length: i16,
    },
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        block: u8,
    },
    AddEntity {
        entity_id: i8,
        name: String,
        position: Position,
    },
    Teleport { entity_id: i8, position: Position },
    MoveRotate {
        entity_id: i8,
        dx: i8,
        dy: i8,
        dz: i8,
        yaw: u8,
        pitch: u8,
    },
    Move {
        entity_id: i8,
        dx: i8,
        dy: i8,
        dz: i8,
    },
    Rotate { entity_id: i8, yaw: u8, pitch: u8 },
    RemoveEntity { entity_id: i8 },
    Message { entity_id: i8, text: String },
    Kick { reason: String },
    SetPermission { permission: u8 },
    ExtInfo {
        app_name: String,
        extension_count: i16,
    },
    ExtEntry { name: String, version: i32 },
}

impl ServerPacket {
    pub fn opcode(&self) -> OpCode {
        match self {
            ServerPacket::Handshake { .. } => OpCode::Handshake,
            ServerPacket::Ping => OpCode::Ping,
            ServerPacket::MapBegin => OpCode::MapBegin,
            ServerPacket::MapChunk { .. } => OpCode::MapChunk,
            ServerPacket::MapEnd { .. } => OpCode::MapEnd,
            ServerPacket::SetBlock { .. } => OpCode::SetBlockServer,
            ServerPacket::AddEntity { .. } => OpCode::AddEntity,
            ServerPacket::Teleport { .. } => OpCode::Teleport,
            ServerPacket::MoveRotate { .. } => OpCode::MoveRotate,
            ServerPacket::Move { .. } => OpCode::Move,
            ServerPacket::Rotate { .. } => OpCode::Rotate,
            ServerPacket::RemoveEntity { .. } => OpCode::RemoveEntity,
            ServerPacket::Message { .. } => OpCode::Message,
            ServerPacket::Kick { .. } => OpCode::Kick,
            ServerPacket::SetPermission { .. } => OpCode::SetPermission,
            ServerPacket::ExtInfo { .. } => OpCode::ExtInfo,
            ServerPacket::ExtEntry { .. } => OpCode::ExtEntry,
        }
    }

    pub fn encode(&self) -> Result<Packet, ProtocolError> {
        let opcode = self.opcode();
        let mut buf = new_buf(opcode);
        match self {
            ServerPacket::Handshake {
                protocol_version,
                server_name,
                motd,
                permission,
            } => {
                buf.put_u8(*protocol_version);
                put_str_padded(&mut buf, server_name);
                put_str_padded(&mut buf, motd);
                buf.put_u8(*permission);
            }
            ServerPacket::Ping | ServerPacket::MapBegin => {}
            ServerPacket::MapChunk { data, percent } => {
                if data.len() > MAP_CHUNK_SIZE {
                    return Err(ProtocolError::FieldEncoding {
                        field: "map_chunk",
                        limit: MAP_CHUNK_SIZE,
                    });
                }
                buf.put_i16(data.len() as i16);
                buf.put_slice(data);
                buf.put_bytes(0, MAP_CHUNK_SIZE - data.len());
                buf.put_u8(*percent);
            }
            ServerPacket::MapEnd {
                width,
                height,
                length,
            } => {
                put_coords(&mut buf, *width, *length, *height);
            }
            ServerPacket::SetBlock { x, y, z, block } => {
                put_coords(&mut buf, *x, *y, *z);
                buf.put_u8(*block);
            }
            ServerPacket::AddEntity {
                entity_id,
                name,
                position,
            } => {
                buf.put_i8(*entity_id);
                put_str_padded(&mut buf, name);
                put_position(&mut buf, position);
            }
            ServerPacket::Teleport {
                entity_id,
                position,
            } => {
                buf.put_i8(*entity_id);
                put_position(&mut buf, position);
            }
            ServerPacket::MoveRotate {
                entity_id,
                dx,
                dy,
                dz,
                yaw,
                pitch,
            } => {
                buf.put_i8(*entity_id);
                buf.put_i8(*dx);
                buf.put_i8(*dz);
                buf.put_i8(*dy);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ServerPacket::Move {
                entity_id,
                dx,
                dy,
                dz,
            } => {
                buf.put_i8(*entity_id);
                buf.put_i8(*dx);
                buf.put_i8(*dz);
                buf.put_i8(*dy);
            }
            ServerPacket::Rotate {
                entity_id,
                yaw,
                pitch,
            } => {
                buf.put_i8(*entity_id);
                buf.put_u8(*yaw);
                buf.put_u8(*pitch);
            }
            ServerPacket::RemoveEntity { entity_id } => {
                buf.put_i8(*entity_id);
            }
            ServerPacket::Message { entity_id, text } => {
                buf.put_i8(*entity_id);
                put_str_padded(&mut buf, text);
            }
            ServerPacket::Kick { reason } => {
                put_str_padded(&mut buf, reason);
            }
            ServerPacket::SetPermission { permission } => {
                buf.put_u8(*permission);
            }
            ServerPacket::ExtInfo {
                app_name,
                extension_count,
            } => {
                put_str_padded(&mut buf, app_name);
                buf.put_i16(*extension_count);
            }
            ServerPacket::ExtEntry { name, version } => {
                put_str_padded(&mut buf, name);
                buf.put_i32(*version);
            }
        }
        Ok(Packet::from_buf(opcode, buf))
    }

    /// Parse a complete server-to-client frame. Exists for symmetry and
    /// testing; the server itself only decodes client packets.
    pub fn decode(bytes: &[u8]) -> Result<ServerPacket, ProtocolError> {
        let opcode = check_frame(bytes)?;
        let mut buf = &bytes[1..];
        let packet = match opcode {
            OpCode::Handshake => ServerPacket::Handshake {
                protocol_version: buf.get_u8(),
                server_name: get_str(&mut buf),
                motd: get_str(&mut buf),
                permission: buf.get_u8(),
            },
            OpCode::Ping => ServerPacket::Ping,
            OpCode::MapBegin => ServerPacket::MapBegin,
            OpCode::MapChunk => {
                let length = buf.get_i16();
                let used = length.clamp(0, MAP_CHUNK_SIZE as i16) as usize;
                let mut data = vec![0u8; MAP_CHUNK_SIZE];
                buf.copy_to_slice(&mut data);
                data.truncate(used);
                let percent = buf.get_u8();
                ServerPacket::MapChunk { data, percent }
            }
            OpCode::MapEnd => {
                let (width, length, height) = get_coords(&mut buf);
                ServerPacket::MapEnd {
                    width,
                    height,
                    length,
                }
            }
            OpCode::SetBlockServer => {
                let (x, y, z) = get_coords(&mut buf);
                ServerPacket::SetBlock {
                    x,
                    y,
                    z,
                    block: buf.get_u8(),
                }
            }
            OpCode::AddEntity => ServerPacket::AddEntity {
                entity_id: buf.get_i8(),
                name: get_str(&mut buf),
                position: get_position(&mut buf),
            },
            OpCode::Teleport => ServerPacket::Teleport {
                entity_id: buf.get_i8(),
                position: get_position(&mut buf),
            },
            OpCode::MoveRotate => {
                let entity_id = buf.get_i8();
                let dx = buf.get_i8();
                let dz = buf.get_i8();
                let dy = buf.get_i8();
                ServerPacket::MoveRotate {
                    entity_id,
                    dx,
                    dy,
                    dz,
                    yaw: buf.get_u8(),
                    pitch: buf.get_u8(),
                }
            }
            OpCode::Move => {
                let entity_id = buf.get_i8();
                let dx = buf.get_i8();
                let dz = buf.get_i8();
                let dy = buf.get_i8();
                ServerPacket::Move {
                    entity_id,
                    dx,
                    dy,
                    dz,
                }
            }
            OpCode::Rotate => ServerPacket::Rotate {
                entity_id: buf.get_i8(),
                yaw: buf.get_u8(),
                pitch: buf.get_u8(),
            },
            OpCode::RemoveEntity => ServerPacket::RemoveEntity {
                entity_id: buf.get_i8(),
            },
            OpCode::Message => ServerPacket::Message {
                entity_id: buf.get_i8(),
                text: get_str(&mut buf),
            },
            OpCode::Kick => ServerPacket::Kick {
                reason: get_str(&mut buf),
            },
            OpCode::SetPermission => ServerPacket::SetPermission {
                permission: buf.get_u8(),
            },
            OpCode::ExtInfo => ServerPacket::ExtInfo {
                app_name: get_str(&mut buf),
                extension_count: buf.get_i16(),
            },
            OpCode::ExtEntry => ServerPacket::ExtEntry {
                name: get_str(&mut buf),
                version: buf.get_i32(),
            },
            OpCode::SetBlockClient => {
                return Err(ProtocolError::ProtocolOrder(
                    "packet type is not valid from a server",
                ))
            }
        };
        Ok(packet)
    }
}
