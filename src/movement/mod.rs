//! NPC movement controllers.
//!
//! Each behavior kind (roam, patrol, chase, root) owns a registry of
//! active NPCs and runs one concurrently scheduled state-machine task per
//! NPC. Tasks tick on a fixed simulated frame, query the navigation
//! surfaces, and write transform fields back to the entity. Cancellation
//! is cooperative: a per-NPC flag checked every frame, with the visible
//! movement state reset before the task exits.

mod chase;
mod patrol;
mod roam;
mod root;

pub use chase::ChaseController;
pub use patrol::PatrolController;
pub use roam::RoamController;
pub use root::RootController;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::navigation::{NavMeshManager, Vec3};
use crate::world::PatrolRouteSource;

/// Simulated frame duration (~60 fps)
pub(crate) const FRAME: Duration = Duration::from_millis(16);

/// Animation codes in the entity transform format
pub const ANIM_IDLE: u8 = 0;
pub const ANIM_WALK: u8 = 1;
pub const ANIM_RUN: u8 = 3;

/// Speed ceiling used to normalize velocities into their byte encoding
const MAX_SPEED: f32 = 20.0;

/// Compute the facing byte for an entity at `start` looking at `end`.
///
/// Heading is the arctangent of the x/z deltas converted to degrees,
/// flipped to the clockwise convention of the transform format, then
/// rescaled so a full rotation spans one byte with a fixed offset of 64.
/// The exact arithmetic is part of the wire representation; keep it.
pub fn facing_between(start: Vec3, end: Vec3) -> u8 {
    let delta_x = (end.x - start.x) as f64;
    let delta_z = (end.z - start.z) as f64;

    let mut degrees = delta_z.atan2(delta_x).to_degrees();
    degrees = (degrees + 360.0) % 360.0;
    degrees = 360.0 - degrees;

    let mut scaled = degrees / 360.0 * 256.0;
    scaled += 64.0;
    scaled %= 256.0;

    scaled as u8
}

/// Per-axis `i8` velocity components for a unit direction at `speed`
pub(crate) fn encode_velocity(direction: Vec3, speed: f32) -> [i8; 3] {
    let normalized = (speed / MAX_SPEED).clamp(0.0, 1.0);
    let scale = normalized * i8::MAX as f32;
    [
        (direction.x * scale) as i8,
        (direction.y * scale) as i8,
        (direction.z * scale) as i8,
    ]
}

/// Step a path cursor one waypoint in the traversal direction, flipping
/// the direction at either end so the cursor stays inside `[0, len - 1]`.
pub(crate) fn advance_cursor(cursor: usize, len: usize, sign: i32) -> (usize, i32) {
    if len < 2 {
        return (0, sign);
    }
    let sign = if cursor + 1 >= len {
        -1
    } else if cursor == 0 {
        1
    } else {
        sign
    };
    let next = if sign > 0 { cursor + 1 } else { cursor - 1 };
    (next, sign)
}

/// Sleep through a pause while staying responsive to cancellation.
/// Returns `false` if the pause was cancelled.
pub(crate) async fn pause_for(millis: u64, cancel: &AtomicBool) -> bool {
    let mut remaining = Duration::from_millis(millis);
    while !remaining.is_zero() {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(FRAME);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !cancel.load(Ordering::Relaxed)
}

/// The shared controller instances one world server runs
pub struct MovementControllers {
    pub roam: RoamController,
    pub patrol: PatrolController,
    pub chase: ChaseController,
    pub root: RootController,
}

impl MovementControllers {
    pub fn new(surfaces: Arc<NavMeshManager>, routes: Arc<PatrolRouteSource>) -> Self {
        Self {
            roam: RoamController::new(surfaces.clone()),
            patrol: PatrolController::new(surfaces.clone(), routes),
            chase: ChaseController::new(surfaces),
            root: RootController::new(),
        }
    }

    /// Stop and evict every movement task for one zone, across all
    /// behavior kinds. Runs before the zone's surface is unloaded.
    pub async fn remove_zone(&self, world: u32, zone: u32) {
        self.roam.remove_npcs_in_zone(world, zone).await;
        self.patrol.remove_npcs_in_zone(world, zone).await;
        self.chase.remove_npcs_in_zone(world, zone).await;
        self.root.remove_npcs_in_zone(world, zone).await;
    }
}
