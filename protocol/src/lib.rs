//! Wire protocol for the classic block-world server.
//!
//! This crate is the pure half of the system: the opcode/size table that
//! drives framing, encode/decode for every packet kind, fixed-point
//! positions with the per-tick movement update policy, and the chat line
//! wrapper. It performs no I/O; the `server` crate feeds it bytes from
//! sockets and writes out the packets it produces.

pub mod color;
pub mod error;
pub mod opcode;
pub mod packet;
pub mod position;
pub mod wrap;

pub use color::{ColorCodes, SharedColors, COLOR_ESCAPE};
pub use error::ProtocolError;
pub use opcode::OpCode;
pub use packet::{
    BlockMode, ClientPacket, Packet, ServerPacket, MAP_CHUNK_SIZE, PROTOCOL_VERSION, SELF_ID,
    STRING_LEN,
};
pub use position::{plan_movement, MovementUpdate, Position, UNITS_PER_BLOCK};
pub use wrap::LineWrapper;
