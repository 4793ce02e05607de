//! The session registry: entity slot allocation, per-player state shared
//! between the session tasks and the tick driver, and packet fan-out.
//!
//! The registry is owned by the composition root and handed to sessions
//! and the game loop as an `Arc`; nothing in the server reaches for
//! global state.

use std::collections::HashMap;

use log::warn;
use protocol::{plan_movement, MovementUpdate, Packet, Position};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Entity IDs are a signed byte with -1 reserved for "self", leaving
/// slots 0..=127.
pub const MAX_ENTITY_SLOTS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("server is full")]
    Full,
    #[error("a player with that name is already connected")]
    NameTaken,
}

/// One registered player: identity, permission, and the position pair the
/// tick driver diffs to decide what to broadcast.
#[derive(Debug)]
pub struct PlayerEntry {
    pub entity_id: i8,
    pub name: String,
    pub permission: u8,
    pub current: Position,
    pub last_broadcast: Option<Position>,
    outbound: mpsc::Sender<Packet>,
}

#[derive(Debug)]
struct Inner {
    players: HashMap<i8, PlayerEntry>,
    max_players: usize,
}

#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                players: HashMap::new(),
                max_players: max_players.min(MAX_ENTITY_SLOTS),
            }),
        }
    }

    /// Claim the lowest free entity slot for a freshly authenticated
    /// player.
    pub async fn register(
        &self,
        name: &str,
        permission: u8,
        spawn: Position,
        outbound: mpsc::Sender<Packet>,
    ) -> Result<i8, RegisterError> {
        let mut inner = self.inner.write().await;
        if inner
            .players
            .values()
            .any(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Err(RegisterError::NameTaken);
        }
        let max = inner.max_players;
        let entity_id = (0..max)
            .map(|slot| slot as i8)
            .find(|id| !inner.players.contains_key(id))
            .ok_or(RegisterError::Full)?;
        inner.players.insert(
            entity_id,
            PlayerEntry {
                entity_id,
                name: name.to_string(),
                permission,
                current: spawn,
                last_broadcast: None,
                outbound,
            },
        );
        Ok(entity_id)
    }

    /// Release a slot. Returns the removed entry so the caller can
    /// announce the departure.
    pub async fn remove(&self, entity_id: i8) -> Option<PlayerEntry> {
        self.inner.write().await.players.remove(&entity_id)
    }

    pub async fn update_position(&self, entity_id: i8, position: Position) {
        if let Some(entry) = self.inner.write().await.players.get_mut(&entity_id) {
            entry.current = position;
        }
    }

    pub async fn player_count(&self) -> usize {
        self.inner.read().await.players.len()
    }

    /// Queue a packet for one player. Returns false if the player is gone
    /// or their queue is full.
    pub async fn send_to(&self, entity_id: i8, packet: Packet) -> bool {
        let inner = self.inner.read().await;
        match inner.players.get(&entity_id) {
            Some(entry) => entry.outbound.try_send(packet).is_ok(),
            None => false,
        }
    }

    /// Queue a packet for every player not in `exclude`. A full queue
    /// drops the packet for that recipient only; a stalled client is torn
    /// down by its own session's write timeout, not by its peers.
    pub async fn broadcast(&self, packet: &Packet, exclude: &[i8]) {
        let inner = self.inner.read().await;
        for (id, entry) in &inner.players {
            if exclude.contains(id) {
                continue;
            }
            if entry.outbound.try_send(packet.clone()).is_err() {
                warn!(
                    "outbound queue overflow for {} (entity {}), dropping packet",
                    entry.name, id
                );
            }
        }
    }

    /// Snapshot of everyone currently registered, for spawning existing
    /// entities at a newcomer.
    pub async fn entity_snapshot(&self) -> Vec<(i8, String, Position)> {
        let inner = self.inner.read().await;
        let mut entities: Vec<_> = inner
            .players
            .values()
            .map(|p| (p.entity_id, p.name.clone(), p.current))
            .collect();
        entities.sort_by_key(|(id, _, _)| *id);
        entities
    }

    /// Diff every player's current position against their last broadcast
    /// one, committing the new baseline wherever an update is due.
    pub async fn take_movements(&self, relay_all: bool) -> Vec<(i8, MovementUpdate)> {
        let mut inner = self.inner.write().await;
        let mut updates = Vec::new();
        let mut ids: Vec<i8> = inner.players.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(entry) = inner.players.get_mut(&id) {
                if let Some(update) = plan_movement(entry.last_broadcast, entry.current, relay_all)
                {
                    entry.last_broadcast = Some(entry.current);
                    updates.push((id, update));
                }
            }
        }
        updates
    }
}
