//! The game loop: drains session events, applies world rules, and drives
//! the per-tick entity update and keepalive broadcasts.
//!
//! Sessions never touch world state themselves; everything funnels
//! through this loop's event channel, which also serializes block
//! authorization against the map.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use protocol::{
    BlockMode, LineWrapper, Packet, ServerPacket, SharedColors,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

use crate::entity;
use crate::registry::SessionRegistry;
use crate::session::GameEvent;
use crate::world::{BlockRules, MapProvider, BLOCK_AIR, MAX_BLOCK_ID};

/// Ticks between keepalive Ping broadcasts.
const KEEPALIVE_TICKS: u64 = 40;

fn encode_or_log(packet: &ServerPacket) -> Option<Packet> {
    match packet.encode() {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            error!("failed to encode {:?} packet: {}", packet.opcode(), e);
            None
        }
    }
}

/// Owns the shared world collaborators and runs the event/tick loop.
pub struct GameLoop {
    pub registry: Arc<SessionRegistry>,
    pub colors: Arc<SharedColors>,
    pub rules: Arc<dyn BlockRules>,
    pub map: Arc<dyn MapProvider>,
    /// Broadcast a full position update for every entity every tick,
    /// instead of only deltas.
    pub relay_all: bool,
}

impl GameLoop {
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<GameEvent>,
        tick: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count: u64 = 0;

        info!("game loop running at {:?} per tick", tick);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    entity::broadcast_entity_updates(&self.registry, self.relay_all).await;
                    tick_count += 1;
                    if tick_count % KEEPALIVE_TICKS == 0 {
                        if let Some(ping) = encode_or_log(&ServerPacket::Ping) {
                            self.registry.broadcast(&ping, &[]).await;
                        }
                    }
                }
            }
        }
        info!("game loop stopped");
    }

    /// Wrap a message and queue it for everyone.
    async fn broadcast_chat(&self, prefix: &str, text: &str, sender: i8) {
        let colors = self.colors.load();
        for packet in LineWrapper::new(prefix, text, &colors).from_sender(sender) {
            self.registry.broadcast(&packet, &[]).await;
        }
    }

    async fn handle_event(&self, event: GameEvent) {
        match event {
            GameEvent::Joined { entity_id } => self.handle_joined(entity_id).await,
            GameEvent::Chat {
                entity_id,
                name,
                text,
            } => {
                info!("[chat] {}: {}", name, text);
                self.broadcast_chat(&format!("{}: ", name), &text, entity_id)
                    .await;
            }
            GameEvent::BlockChange {
                entity_id,
                x,
                y,
                z,
                mode,
                block,
                permission,
            } => {
                self.handle_block_change(entity_id, x, y, z, mode, block, permission)
                    .await;
            }
            GameEvent::Moved {
                entity_id,
                position,
            } => {
                self.registry.update_position(entity_id, position).await;
            }
            GameEvent::Left { entity_id, name } => {
                if let Some(packet) = encode_or_log(&ServerPacket::RemoveEntity { entity_id }) {
                    self.registry.broadcast(&packet, &[]).await;
                }
                self.broadcast_chat("", &format!("&S{} left the game", name), 0)
                    .await;
                info!("{} left (entity {})", name, entity_id);
            }
        }
    }

    /// Introduce a newcomer and the existing population to each other.
    async fn handle_joined(&self, entity_id: i8) {
        let entities = self.registry.entity_snapshot().await;
        let newcomer = entities.iter().find(|(id, _, _)| *id == entity_id).cloned();
        let (_, name, position) = match newcomer {
            Some(entry) => entry,
            None => {
                // Already gone again; nothing to announce.
                debug!("entity {} vanished before join fan-out", entity_id);
                return;
            }
        };

        for (other_id, other_name, other_position) in entities {
            if other_id == entity_id {
                continue;
            }
            let packet = ServerPacket::AddEntity {
                entity_id: other_id,
                name: other_name,
                position: other_position,
            };
            if let Some(encoded) = encode_or_log(&packet) {
                self.registry.send_to(entity_id, encoded).await;
            }
        }

        let spawn = ServerPacket::AddEntity {
            entity_id,
            name: name.clone(),
            position,
        };
        if let Some(encoded) = encode_or_log(&spawn) {
            self.registry.broadcast(&encoded, &[entity_id]).await;
        }

        self.broadcast_chat("", &format!("&S{} joined the game", name), 0)
            .await;
        info!("{} joined (entity {})", name, entity_id);
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_block_change(
        &self,
        entity_id: i8,
        x: i16,
        y: i16,
        z: i16,
        mode: BlockMode,
        block: u8,
        permission: u8,
    ) {
        if !self.map.contains(x, y, z) {
            warn!(
                "entity {} touched out-of-bounds block ({}, {}, {})",
                entity_id, x, y, z
            );
            return;
        }

        let place = mode == BlockMode::Place;
        let allowed =
            block <= MAX_BLOCK_ID && self.rules.allows(x, y, z, block, place, permission);
        if allowed {
            let placed = if place { block } else { BLOCK_AIR };
            self.map.set_block(x, y, z, placed);
            let packet = ServerPacket::SetBlock {
                x,
                y,
                z,
                block: placed,
            };
            if let Some(encoded) = encode_or_log(&packet) {
                self.registry.broadcast(&encoded, &[entity_id]).await;
            }
        } else {
            // Resync the client that tried: put the authoritative block
            // back on their screen.
            let revert = ServerPacket::SetBlock {
                x,
                y,
                z,
                block: self.map.block_at(x, y, z),
            };
            if let Some(encoded) = encode_or_log(&revert) {
                self.registry.send_to(entity_id, encoded).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{FlatMap, OpenBuild, BLOCK_GRASS, BLOCK_STONE, PERMISSION_NORMAL};
    use protocol::{ColorCodes, Position};
    use tokio::sync::mpsc::Receiver;

    struct DenyAll;

    impl BlockRules for DenyAll {
        fn allows(&self, _: i16, _: i16, _: i16, _: u8, _: bool, _: u8) -> bool {
            false
        }
    }

    fn game_loop(rules: Arc<dyn BlockRules>, map: Arc<FlatMap>) -> GameLoop {
        GameLoop {
            registry: Arc::new(SessionRegistry::new(8)),
            colors: Arc::new(SharedColors::new(ColorCodes::default())),
            rules,
            map,
            relay_all: false,
        }
    }

    async fn join(game: &GameLoop, name: &str) -> (i8, Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(64);
        let id = game
            .registry
            .register(name, PERMISSION_NORMAL, Position::at_block_center(4, 4, 4), tx)
            .await
            .unwrap();
        (id, rx)
    }

    fn drain(rx: &mut Receiver<Packet>) -> Vec<ServerPacket> {
        let mut out = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            out.push(ServerPacket::decode(packet.bytes()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn join_fan_out_introduces_both_sides() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let game = game_loop(Arc::new(OpenBuild), map);
        let (veteran, mut veteran_rx) = join(&game, "veteran").await;
        let (newcomer, mut newcomer_rx) = join(&game, "newcomer").await;

        game.handle_event(GameEvent::Joined {
            entity_id: newcomer,
        })
        .await;

        let to_newcomer = drain(&mut newcomer_rx);
        assert!(to_newcomer.iter().any(|p| matches!(
            p,
            ServerPacket::AddEntity { entity_id, name, .. }
                if *entity_id == veteran && name == "veteran"
        )));
        // The newcomer hears the announcement but not their own spawn.
        assert!(to_newcomer
            .iter()
            .any(|p| matches!(p, ServerPacket::Message { .. })));
        assert!(!to_newcomer.iter().any(|p| matches!(
            p,
            ServerPacket::AddEntity { entity_id, .. } if *entity_id == newcomer
        )));

        let to_veteran = drain(&mut veteran_rx);
        assert!(to_veteran.iter().any(|p| matches!(
            p,
            ServerPacket::AddEntity { entity_id, name, .. }
                if *entity_id == newcomer && name == "newcomer"
        )));
    }

    #[tokio::test]
    async fn chat_is_wrapped_and_broadcast_to_everyone() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let game = game_loop(Arc::new(OpenBuild), map);
        let (speaker, mut speaker_rx) = join(&game, "speaker").await;
        let (_listener, mut listener_rx) = join(&game, "listener").await;

        game.handle_event(GameEvent::Chat {
            entity_id: speaker,
            name: "speaker".to_string(),
            text: "hello everyone".to_string(),
        })
        .await;

        for rx in [&mut speaker_rx, &mut listener_rx] {
            let packets = drain(rx);
            assert_eq!(
                packets,
                vec![ServerPacket::Message {
                    entity_id: speaker,
                    text: "speaker: hello everyone".to_string()
                }]
            );
        }
    }

    #[tokio::test]
    async fn allowed_block_change_mutates_and_broadcasts() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let game = game_loop(Arc::new(OpenBuild), Arc::clone(&map));
        let (builder, mut builder_rx) = join(&game, "builder").await;
        let (_other, mut other_rx) = join(&game, "other").await;

        game.handle_event(GameEvent::BlockChange {
            entity_id: builder,
            x: 1,
            y: 2,
            z: 5,
            mode: BlockMode::Place,
            block: BLOCK_STONE,
            permission: PERMISSION_NORMAL,
        })
        .await;

        assert_eq!(map.block_at(1, 2, 5), BLOCK_STONE);
        // The builder's own client already shows the block.
        assert!(drain(&mut builder_rx).is_empty());
        assert_eq!(
            drain(&mut other_rx),
            vec![ServerPacket::SetBlock {
                x: 1,
                y: 2,
                z: 5,
                block: BLOCK_STONE
            }]
        );
    }

    #[tokio::test]
    async fn denied_block_change_reverts_on_the_initiator_only() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let surface = 8 / 2 - 1;
        let game = game_loop(Arc::new(DenyAll), Arc::clone(&map));
        let (vandal, mut vandal_rx) = join(&game, "vandal").await;
        let (_witness, mut witness_rx) = join(&game, "witness").await;

        game.handle_event(GameEvent::BlockChange {
            entity_id: vandal,
            x: 3,
            y: 3,
            z: surface,
            mode: BlockMode::Destroy,
            block: BLOCK_AIR,
            permission: PERMISSION_NORMAL,
        })
        .await;

        // World unchanged, vandal resynced, nobody else bothered.
        assert_eq!(map.block_at(3, 3, surface), BLOCK_GRASS);
        assert_eq!(
            drain(&mut vandal_rx),
            vec![ServerPacket::SetBlock {
                x: 3,
                y: 3,
                z: surface,
                block: BLOCK_GRASS
            }]
        );
        assert!(drain(&mut witness_rx).is_empty());
    }

    #[tokio::test]
    async fn out_of_bounds_block_change_is_ignored() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let game = game_loop(Arc::new(OpenBuild), Arc::clone(&map));
        let (digger, mut digger_rx) = join(&game, "digger").await;

        game.handle_event(GameEvent::BlockChange {
            entity_id: digger,
            x: 50,
            y: 0,
            z: 0,
            mode: BlockMode::Place,
            block: BLOCK_STONE,
            permission: PERMISSION_NORMAL,
        })
        .await;

        assert!(drain(&mut digger_rx).is_empty());
    }

    #[tokio::test]
    async fn departure_removes_the_entity_and_announces() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let game = game_loop(Arc::new(OpenBuild), map);
        let (_stayer, mut stayer_rx) = join(&game, "stayer").await;

        game.handle_event(GameEvent::Left {
            entity_id: 5,
            name: "leaver".to_string(),
        })
        .await;

        let packets = drain(&mut stayer_rx);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], ServerPacket::RemoveEntity { entity_id: 5 });
        assert!(matches!(
            &packets[1],
            ServerPacket::Message { text, .. } if text.contains("leaver left")
        ));
    }

    #[tokio::test]
    async fn system_announcements_use_the_configured_color() {
        let map = Arc::new(FlatMap::new(8, 8, 8));
        let mut game = game_loop(Arc::new(OpenBuild), map);
        game.colors = Arc::new(SharedColors::new(ColorCodes {
            system: '9',
            ..ColorCodes::default()
        }));
        let (_watcher, mut watcher_rx) = join(&game, "watcher").await;

        game.handle_event(GameEvent::Left {
            entity_id: 5,
            name: "leaver".to_string(),
        })
        .await;

        let packets = drain(&mut watcher_rx);
        assert!(matches!(
            &packets[1],
            ServerPacket::Message { text, .. } if text.starts_with("&9")
        ));
    }
}
