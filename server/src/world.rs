//! Collaborator seams between the protocol core and the rest of the game.
//!
//! The session and game loops only ever talk to these traits: who may log
//! in and with what permission, whether a block change is allowed, and
//! where the level payload comes from. Real deployments plug in their own
//! implementations; the built-ins below are enough to run a stand-alone
//! server and to test against.

use std::io::{self, Write};
use std::sync::{PoisonError, RwLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use protocol::Position;

/// Highest block ID a version-7 client understands.
pub const MAX_BLOCK_ID: u8 = 49;

pub const BLOCK_AIR: u8 = 0x00;
pub const BLOCK_STONE: u8 = 0x01;
pub const BLOCK_GRASS: u8 = 0x02;
pub const BLOCK_DIRT: u8 = 0x03;

/// Permission byte for a regular player.
pub const PERMISSION_NORMAL: u8 = 0x00;
/// Permission byte for an operator.
pub const PERMISSION_OP: u8 = 0x64;

/// Decides whether a handshake identity may join, and with what
/// permission byte. Name syntax is validated by the session before this
/// is consulted; this hook covers bans, verification and rank lookup.
pub trait LoginPolicy: Send + Sync {
    /// Returns the permission byte, or a kick reason.
    fn authorize(&self, username: &str, verification_key: &str) -> Result<u8, String>;
}

/// Decides whether a block change is permitted.
pub trait BlockRules: Send + Sync {
    fn allows(&self, x: i16, y: i16, z: i16, block: u8, place: bool, permission: u8) -> bool;
}

/// Source of the level: dimensions, spawn point, the serialized payload
/// streamed during join, and a sink for authorized block mutations.
pub trait MapProvider: Send + Sync {
    /// (width, height, length): x extent, vertical extent, y extent.
    fn dimensions(&self) -> (i16, i16, i16);

    fn spawn(&self) -> Position;

    /// The gzip level payload framed into MapChunk packets during join.
    fn level_data(&self) -> io::Result<Vec<u8>>;

    fn block_at(&self, x: i16, y: i16, z: i16) -> u8;

    fn set_block(&self, x: i16, y: i16, z: i16, block: u8);

    fn contains(&self, x: i16, y: i16, z: i16) -> bool {
        let (width, height, length) = self.dimensions();
        (0..width).contains(&x) && (0..length).contains(&y) && (0..height).contains(&z)
    }
}

/// Accepts every login. Names listed as operators get the op permission
/// byte; everyone else is a regular player.
#[derive(Debug, Default)]
pub struct OpenLogin {
    pub operators: Vec<String>,
}

impl LoginPolicy for OpenLogin {
    fn authorize(&self, username: &str, _verification_key: &str) -> Result<u8, String> {
        if self.operators.iter().any(|op| op.eq_ignore_ascii_case(username)) {
            Ok(PERMISSION_OP)
        } else {
            Ok(PERMISSION_NORMAL)
        }
    }
}

/// Lets anyone build anywhere.
#[derive(Debug, Default)]
pub struct OpenBuild;

impl BlockRules for OpenBuild {
    fn allows(&self, _x: i16, _y: i16, _z: i16, _block: u8, _place: bool, _permission: u8) -> bool {
        true
    }
}

/// In-memory flat world: grass surface at half height, dirt below, air
/// above. Block storage is x-fastest, then depth, then height, matching
/// the serialized payload order the client expects.
pub struct FlatMap {
    width: i16,
    height: i16,
    length: i16,
    blocks: RwLock<Vec<u8>>,
}

impl FlatMap {
    pub fn new(width: i16, height: i16, length: i16) -> Self {
        let (w, h, l) = (width as usize, height as usize, length as usize);
        let surface = height / 2 - 1;
        let mut blocks = vec![BLOCK_AIR; w * h * l];
        for z in 0..h as i16 {
            let layer = match z {
                _ if z == surface => Some(BLOCK_GRASS),
                _ if z < surface => Some(BLOCK_DIRT),
                _ => None,
            };
            if let Some(block) = layer {
                let from = z as usize * w * l;
                blocks[from..from + w * l].fill(block);
            }
        }
        Self {
            width,
            height,
            length,
            blocks: RwLock::new(blocks),
        }
    }

    fn index(&self, x: i16, y: i16, z: i16) -> usize {
        (z as usize * self.length as usize + y as usize) * self.width as usize + x as usize
    }
}

impl MapProvider for FlatMap {
    fn dimensions(&self) -> (i16, i16, i16) {
        (self.width, self.height, self.length)
    }

    fn spawn(&self) -> Position {
        Position::at_block_center(self.width / 2, self.length / 2, self.height / 2 + 1)
    }

    fn level_data(&self) -> io::Result<Vec<u8>> {
        let blocks = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&(blocks.len() as u32).to_be_bytes())?;
        encoder.write_all(&blocks)?;
        encoder.finish()
    }

    fn block_at(&self, x: i16, y: i16, z: i16) -> u8 {
        if !self.contains(x, y, z) {
            return BLOCK_AIR;
        }
        let index = self.index(x, y, z);
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)[index]
    }

    fn set_block(&self, x: i16, y: i16, z: i16, block: u8) {
        if !self.contains(x, y, z) {
            return;
        }
        let index = self.index(x, y, z);
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)[index] = block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn flat_map_layers_grass_over_dirt() {
        let map = FlatMap::new(16, 8, 16);
        let surface = 8 / 2 - 1;
        assert_eq!(map.block_at(4, 4, surface), BLOCK_GRASS);
        assert_eq!(map.block_at(4, 4, surface - 1), BLOCK_DIRT);
        assert_eq!(map.block_at(4, 4, surface + 1), BLOCK_AIR);
    }

    #[test]
    fn out_of_bounds_reads_are_air_and_writes_are_ignored() {
        let map = FlatMap::new(4, 4, 4);
        assert_eq!(map.block_at(-1, 0, 0), BLOCK_AIR);
        assert_eq!(map.block_at(4, 0, 0), BLOCK_AIR);
        map.set_block(99, 0, 0, BLOCK_STONE);
        assert!(!map.contains(99, 0, 0));
    }

    #[test]
    fn block_mutations_round_trip() {
        let map = FlatMap::new(8, 8, 8);
        map.set_block(1, 2, 3, BLOCK_STONE);
        assert_eq!(map.block_at(1, 2, 3), BLOCK_STONE);
    }

    #[test]
    fn level_data_is_gzip_with_length_prefix() {
        let map = FlatMap::new(4, 4, 4);
        let payload = map.level_data().unwrap();

        let mut decoded = Vec::new();
        GzDecoder::new(payload.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();

        let count = u32::from_be_bytes(decoded[..4].try_into().unwrap());
        assert_eq!(count as usize, 4 * 4 * 4);
        assert_eq!(decoded.len(), 4 + 64);
    }

    #[test]
    fn spawn_is_inside_the_map() {
        let map = FlatMap::new(64, 32, 64);
        let (x, y, z) = map.spawn().block_coords();
        assert!(map.contains(x, y, z));
        // Standing above the surface, not inside it.
        assert!(z > 32 / 2 - 1);
    }

    #[test]
    fn open_login_grants_op_to_listed_names() {
        let policy = OpenLogin {
            operators: vec!["Admin".to_string()],
        };
        assert_eq!(policy.authorize("admin", ""), Ok(PERMISSION_OP));
        assert_eq!(policy.authorize("guest", ""), Ok(PERMISSION_NORMAL));
    }
}
