//! Per-tick entity update fan-out.
//!
//! Each tick, every player's current position is diffed against the last
//! one broadcast for them and the cheapest sufficient packet goes out:
//! relative moves where the delta fits a signed byte, an absolute
//! Teleport where it does not.

use log::error;
use protocol::{MovementUpdate, ServerPacket};

use crate::registry::SessionRegistry;

/// The wire packet for one planned movement update.
pub fn movement_packet(entity_id: i8, update: MovementUpdate) -> ServerPacket {
    match update {
        MovementUpdate::Teleport(position) => ServerPacket::Teleport {
            entity_id,
            position,
        },
        MovementUpdate::MoveRotate {
            dx,
            dy,
            dz,
            yaw,
            pitch,
        } => ServerPacket::MoveRotate {
            entity_id,
            dx,
            dy,
            dz,
            yaw,
            pitch,
        },
        MovementUpdate::Move { dx, dy, dz } => ServerPacket::Move {
            entity_id,
            dx,
            dy,
            dz,
        },
        MovementUpdate::Rotate { yaw, pitch } => ServerPacket::Rotate {
            entity_id,
            yaw,
            pitch,
        },
    }
}

/// Broadcast one tick's worth of entity updates. Movers are excluded from
/// their own updates; a client tracks its own position locally.
pub async fn broadcast_entity_updates(registry: &SessionRegistry, relay_all: bool) {
    for (entity_id, update) in registry.take_movements(relay_all).await {
        match movement_packet(entity_id, update).encode() {
            Ok(packet) => registry.broadcast(&packet, &[entity_id]).await,
            Err(e) => error!("entity {} movement update failed to encode: {}", entity_id, e),
        }
    }
}
