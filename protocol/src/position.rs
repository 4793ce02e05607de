//! Fixed-point entity positions and the per-tick movement update policy.
//!
//! Coordinates are stored in 1/32-block units. `x` and `y` are the
//! horizontal axes and `z` is the vertical axis; the codec writes every
//! wire triple in the order x, z, y so that the second short on the wire
//! is the height, which is what a version-7 client expects.

/// An immutable entity position: three signed fixed-point coordinates plus
/// yaw (`r`) and pitch (`l`) rotation bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    /// Vertical coordinate (height).
    pub z: i16,
    pub yaw: u8,
    pub pitch: u8,
}

/// One block expressed in fixed-point units.
pub const UNITS_PER_BLOCK: i16 = 32;

impl Position {
    pub fn new(x: i16, y: i16, z: i16, yaw: u8, pitch: u8) -> Self {
        Self { x, y, z, yaw, pitch }
    }

    /// Position at the center of the given block column, standing on top
    /// of block level `z`.
    pub fn at_block_center(x: i16, y: i16, z: i16) -> Self {
        Self {
            x: x * UNITS_PER_BLOCK + UNITS_PER_BLOCK / 2,
            y: y * UNITS_PER_BLOCK + UNITS_PER_BLOCK / 2,
            z: z * UNITS_PER_BLOCK + UNITS_PER_BLOCK / 2,
            yaw: 0,
            pitch: 0,
        }
    }

    /// Block coordinates containing this position.
    pub fn block_coords(&self) -> (i16, i16, i16) {
        (
            self.x / UNITS_PER_BLOCK,
            self.y / UNITS_PER_BLOCK,
            self.z / UNITS_PER_BLOCK,
        )
    }

    /// Coordinate delta from `earlier` to `self`, widened so that i16
    /// extremes cannot wrap.
    pub fn delta_from(&self, earlier: &Position) -> (i32, i32, i32) {
        (
            i32::from(self.x) - i32::from(earlier.x),
            i32::from(self.y) - i32::from(earlier.y),
            i32::from(self.z) - i32::from(earlier.z),
        )
    }

    pub fn same_coords(&self, other: &Position) -> bool {
        self.x == other.x && self.y == other.y && self.z == other.z
    }

    pub fn same_rotation(&self, other: &Position) -> bool {
        self.yaw == other.yaw && self.pitch == other.pitch
    }
}

/// The packet-shaped outcome of comparing an entity's current position to
/// its last broadcast one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementUpdate {
    /// Absolute position; the always-correct fallback.
    Teleport(Position),
    /// Relative coordinates plus absolute rotation.
    MoveRotate {
        dx: i8,
        dy: i8,
        dz: i8,
        yaw: u8,
        pitch: u8,
    },
    /// Relative coordinates only.
    Move { dx: i8, dy: i8, dz: i8 },
    /// Absolute rotation only.
    Rotate { yaw: u8, pitch: u8 },
}

fn fits_relative(delta: (i32, i32, i32)) -> bool {
    let in_range = |v: i32| (i32::from(i8::MIN)..=i32::from(i8::MAX)).contains(&v);
    in_range(delta.0) && in_range(delta.1) && in_range(delta.2)
}

/// Decide which update packet, if any, to broadcast for one entity this
/// tick.
///
/// Relative packets are smaller but limited to single-byte deltas, so any
/// larger move falls back to an absolute Teleport. With `relay_all` set,
/// a full MoveRotate goes out every tick regardless of deltas.
pub fn plan_movement(
    last: Option<Position>,
    current: Position,
    relay_all: bool,
) -> Option<MovementUpdate> {
    let last = match last {
        Some(last) => last,
        None => return Some(MovementUpdate::Teleport(current)),
    };

    let delta = current.delta_from(&last);
    if !fits_relative(delta) {
        return Some(MovementUpdate::Teleport(current));
    }

    let moved = !current.same_coords(&last);
    let rotated = !current.same_rotation(&last);
    let (dx, dy, dz) = (delta.0 as i8, delta.1 as i8, delta.2 as i8);

    if relay_all || (moved && rotated) {
        Some(MovementUpdate::MoveRotate {
            dx,
            dy,
            dz,
            yaw: current.yaw,
            pitch: current.pitch,
        })
    } else if moved {
        Some(MovementUpdate::Move { dx, dy, dz })
    } else if rotated {
        Some(MovementUpdate::Rotate {
            yaw: current.yaw,
            pitch: current.pitch,
        })
    } else {
        None
    }
}
