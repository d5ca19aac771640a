//! Fixed-route behavior: each patroller walks a configured waypoint list
//! end to end and back, pausing where the route says to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::entities::Entity;
use crate::navigation::{NavMeshManager, Vec3};
use crate::world::{PatrolRoute, PatrolRouteSource};

use super::{advance_cursor, encode_velocity, facing_between, pause_for, ANIM_IDLE, ANIM_WALK, FRAME};

const PATROL_SPEED: f32 = 3.0;

const ARRIVAL_THRESHOLD: f32 = 0.1;

struct ActivePatroller {
    npc: Arc<Entity>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    origin_position: Vec3,
    origin_facing: u8,
}

/// Registry of patrolling NPCs; one state-machine task per entry
pub struct PatrolController {
    surfaces: Arc<NavMeshManager>,
    routes: Arc<PatrolRouteSource>,
    tasks: Mutex<HashMap<u64, ActivePatroller>>,
}

impl PatrolController {
    pub fn new(surfaces: Arc<NavMeshManager>, routes: Arc<PatrolRouteSource>) -> Self {
        Self {
            surfaces,
            routes,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Admit an NPC and start its patrol task. The route is resolved by
    /// display name; a missing or malformed route keeps this one NPC from
    /// patrolling and nothing else.
    pub async fn add_npc(&self, world: u32, zone: u32, npc: Arc<Entity>) {
        let Some(route) = self.routes.route_for(&npc.name) else {
            warn!("No usable patrol route for {}; patrol not started", npc.name);
            return;
        };

        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&npc.id) {
            if !existing.handle.is_finished() {
                debug!("{} is already patrolling", npc.name);
                return;
            }
        }

        let origin_position = npc.position();
        let origin_facing = npc.facing();
        let cancel = Arc::new(AtomicBool::new(false));
        npc.is_patrolling.store(true, Ordering::Relaxed);

        let handle = tokio::spawn(patrol_task(
            world,
            zone,
            npc.clone(),
            route,
            self.surfaces.clone(),
            cancel.clone(),
        ));
        tasks.insert(npc.id, ActivePatroller {
            npc,
            cancel,
            handle,
            origin_position,
            origin_facing,
        });
    }

    /// Cancel the NPC's task, reset its visible movement state, and put it
    /// back where the patrol picked it up. Safe to call while the task is
    /// mid-frame: the task is cancelled and drained before the restore.
    pub async fn remove_npc(&self, npc: &Entity) {
        let active = self.tasks.lock().await.remove(&npc.id);
        if let Some(active) = active {
            active.cancel.store(true, Ordering::Relaxed);
            let _ = active.handle.await;
            npc.set_position(active.origin_position);
            npc.set_facing(active.origin_facing);
        }
        npc.is_patrolling.store(false, Ordering::Relaxed);
        npc.reset_movement_state();
    }

    /// Cancel every patrol task for one zone
    pub async fn remove_npcs_in_zone(&self, world: u32, zone: u32) {
        let removed: Vec<ActivePatroller> = {
            let mut tasks = self.tasks.lock().await;
            let ids: Vec<u64> = tasks
                .iter()
                .filter(|(_, t)| t.npc.world == world && t.npc.zone == zone)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };

        let count = removed.len();
        for active in removed {
            active.cancel.store(true, Ordering::Relaxed);
            let _ = active.handle.await;
            active.npc.set_position(active.origin_position);
            active.npc.set_facing(active.origin_facing);
            active.npc.is_patrolling.store(false, Ordering::Relaxed);
            active.npc.reset_movement_state();
        }

        if count > 0 {
            info!("Stopped {} patrollers in world {} zone {}", count, world, zone);
        }
    }

    pub async fn is_active(&self, id: u64) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

/// Stitch the configured waypoints into one walkable path, pausing only at
/// the original waypoints. Returns empty vectors when any leg of the route
/// has no path (surface missing or waypoint unreachable).
fn stitch_route(
    surfaces: &NavMeshManager,
    world: u32,
    zone: u32,
    route: &PatrolRoute,
) -> (Vec<Vec3>, Vec<u64>) {
    let mut path = Vec::new();
    let mut pauses = Vec::new();

    for i in 0..route.waypoints.len() - 1 {
        let segment =
            surfaces.find_smooth_path(world, zone, route.waypoints[i], route.waypoints[i + 1]);
        if segment.is_empty() {
            return (Vec::new(), Vec::new());
        }

        for (j, point) in segment.iter().enumerate() {
            path.push(*point);
            pauses.push(if j == 0 { route.pauses[i] } else { 0 });
        }
    }

    // The route's final waypoint keeps its own pause
    if let (Some(last_pause), Some(&route_last)) = (pauses.last_mut(), route.pauses.last()) {
        *last_pause = route_last;
    }

    (path, pauses)
}

async fn patrol_task(
    world: u32,
    zone: u32,
    npc: Arc<Entity>,
    route: PatrolRoute,
    surfaces: Arc<NavMeshManager>,
    cancel: Arc<AtomicBool>,
) {
    let (path, pauses) = stitch_route(&surfaces, world, zone, &route);

    if path.len() < 2 {
        debug!("No walkable patrol path for {}; stopping", npc.name);
        npc.reset_movement_state();
        npc.is_patrolling.store(false, Ordering::Relaxed);
        return;
    }

    // Face down the route and honor the starting pause before moving
    npc.set_facing(facing_between(npc.position(), path[1]));
    let mut parked = pauses[0] > 0 && !pause_for(pauses[0], &cancel).await;

    let mut cursor = 1usize;
    let mut sign = 1i32;
    let mut last_update = Instant::now();

    while !parked && !cancel.load(Ordering::Relaxed) {
        npc.set_animation(ANIM_WALK);

        tokio::time::sleep(FRAME).await;
        let elapsed = last_update.elapsed().as_secs_f32();
        last_update = Instant::now();

        let target = path[cursor];
        let position = npc.position();
        let to_target = target - position;

        if let Some(direction) = to_target.normalized() {
            npc.set_facing(facing_between(position, target));
            let step = (PATROL_SPEED * elapsed).min(to_target.length());
            let next = position + direction * step;
            if next.is_finite() {
                npc.set_position(next);
                npc.set_velocity(encode_velocity(direction, PATROL_SPEED));
            }
        }

        if npc.position().distance_to(target) < ARRIVAL_THRESHOLD {
            if pauses[cursor] > 0 {
                npc.set_animation(ANIM_IDLE);
                npc.set_velocity([0; 3]);
                if !pause_for(pauses[cursor], &cancel).await {
                    parked = true;
                    continue;
                }
                last_update = Instant::now();
            }

            let (next, next_sign) = advance_cursor(cursor, path.len(), sign);
            cursor = next;
            sign = next_sign;
        }
    }

    npc.reset_movement_state();
    npc.is_patrolling.store(false, Ordering::Relaxed);
}
