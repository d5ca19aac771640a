//! Pursuit behavior: an NPC runs down a live target, refreshing its path
//! on a throttled timer, and gives up and runs home once it strays too
//! far from where the chase began.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::entities::Entity;
use crate::navigation::{NavMeshManager, Vec3};

use super::{facing_between, ANIM_RUN, FRAME};

const CHASE_SPEED: f32 = 10.0;
const RETURN_SPEED: f32 = 20.0;

/// Straying farther than this from the chase origin breaks the pursuit
const LEASH_DISTANCE: f32 = 100.0;

const ARRIVAL_THRESHOLD: f32 = 1.0;

/// How often the path to the moving target is recomputed
const PATH_REFRESH: Duration = Duration::from_millis(500);

struct ActiveChaser {
    npc: Arc<Entity>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Registry of chasing NPCs; one state-machine task per entry
pub struct ChaseController {
    surfaces: Arc<NavMeshManager>,
    tasks: Arc<Mutex<HashMap<u64, ActiveChaser>>>,
}

impl ChaseController {
    pub fn new(surfaces: Arc<NavMeshManager>) -> Self {
        Self {
            surfaces,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit an NPC and start pursuing `target`. A second call while the
    /// task is live is a no-op.
    pub async fn add_npc(&self, world: u32, zone: u32, npc: Arc<Entity>, target: Arc<Entity>) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&npc.id) {
            if !existing.handle.is_finished() {
                debug!("{} is already chasing", npc.name);
                return;
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        npc.is_chasing.store(true, Ordering::Relaxed);

        let handle = tokio::spawn(chase_task(
            world,
            zone,
            npc.clone(),
            target,
            self.surfaces.clone(),
            cancel.clone(),
            self.tasks.clone(),
        ));
        tasks.insert(npc.id, ActiveChaser { npc, cancel, handle });
    }

    /// Cancel the NPC's task and reset its visible movement state. The
    /// entry leaves the registry before the handle is drained so the
    /// task's own eviction pass finds nothing to do.
    pub async fn remove_npc(&self, npc: &Entity) {
        let active = self.tasks.lock().await.remove(&npc.id);
        if let Some(active) = active {
            active.cancel.store(true, Ordering::Relaxed);
            let _ = active.handle.await;
        }
        npc.is_chasing.store(false, Ordering::Relaxed);
        npc.reset_movement_state();
    }

    /// Cancel every chase task for one zone
    pub async fn remove_npcs_in_zone(&self, world: u32, zone: u32) {
        let removed: Vec<ActiveChaser> = {
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
            active.npc.is_chasing.store(false, Ordering::Relaxed);
            active.npc.reset_movement_state();
        }

        if count > 0 {
            info!("Stopped {} chasers in world {} zone {}", count, world, zone);
        }
    }

    pub async fn is_active(&self, id: u64) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

enum ChaseState {
    Pursue,
    /// Leash broke: plan the run home
    PlanReturn,
    Return,
    Stopped,
}

#[allow(clippy::too_many_arguments)]
async fn chase_task(
    world: u32,
    zone: u32,
    npc: Arc<Entity>,
    target: Arc<Entity>,
    surfaces: Arc<NavMeshManager>,
    cancel: Arc<AtomicBool>,
    tasks: Arc<Mutex<HashMap<u64, ActiveChaser>>>,
) {
    let origin = npc.position();
    let origin_facing = npc.facing();

    let mut path = surfaces.find_path(world, zone, npc.position(), target.position());
    let mut cursor = 0usize;
    let mut last_refresh = Instant::now();
    let mut last_update = Instant::now();

    let mut state = if path.is_empty() {
        debug!("No path to target for {}; chase not possible", npc.name);
        ChaseState::Stopped
    } else {
        npc.set_animation(ANIM_RUN);
        ChaseState::Pursue
    };

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        match state {
            ChaseState::Pursue => {
                tokio::time::sleep(FRAME).await;
                let elapsed = last_update.elapsed().as_secs_f32();
                last_update = Instant::now();

                // Recompute toward the target's live position on the
                // refresh timer, not every frame
                if last_refresh.elapsed() >= PATH_REFRESH {
                    last_refresh = Instant::now();
                    let fresh = surfaces.find_path(world, zone, npc.position(), target.position());
                    if fresh.is_empty() {
                        // Target left the surface (or the surface left us)
                        npc.set_position(origin);
                        npc.set_facing(origin_facing);
                        state = ChaseState::Stopped;
                        continue;
                    }
                    path = fresh;
                    cursor = 0;
                }

                if cursor >= path.len() {
                    // Caught up with the end of the path
                    state = ChaseState::Stopped;
                    continue;
                }

                if npc.position().distance_to(origin) > LEASH_DISTANCE {
                    state = ChaseState::PlanReturn;
                    continue;
                }

                let waypoint = path[cursor];
                let position = npc.position();
                let to_waypoint = waypoint - position;

                if let Some(direction) = to_waypoint.normalized() {
                    // Eyes on the target while pursuing
                    npc.set_facing(facing_between(position, target.position()));
                    let step = (CHASE_SPEED * elapsed).min(to_waypoint.length());
                    let next = position + direction * step;
                    if next.is_finite() {
                        npc.set_position(next);
                    }
                }

                if npc.position().distance_to(waypoint) < ARRIVAL_THRESHOLD {
                    cursor += 1;
                }
            }
            ChaseState::PlanReturn => {
                let home = surfaces.find_smooth_path(world, zone, npc.position(), origin);
                if home.len() < 2 {
                    // Nowhere to walk; snap home and stand down
                    npc.set_position(origin);
                    npc.set_facing(origin_facing);
                    state = ChaseState::Stopped;
                    continue;
                }
                path = home;
                cursor = 0;
                npc.set_animation(ANIM_RUN);
                last_update = Instant::now();
                state = ChaseState::Return;
            }
            ChaseState::Return => {
                tokio::time::sleep(FRAME).await;
                let elapsed = last_update.elapsed().as_secs_f32();
                last_update = Instant::now();

                if cursor >= path.len() {
                    // Home again; stand as before the chase
                    npc.set_facing(origin_facing);
                    state = ChaseState::Stopped;
                    continue;
                }

                let waypoint = path[cursor];
                let position = npc.position();
                let to_waypoint = waypoint - position;

                if let Some(direction) = to_waypoint.normalized() {
                    npc.set_facing(facing_between(position, waypoint));
                    let step = (RETURN_SPEED * elapsed).min(to_waypoint.length());
                    let next = position + direction * step;
                    if next.is_finite() {
                        npc.set_position(next);
                    }
                }

                if npc.position().distance_to(waypoint) < ARRIVAL_THRESHOLD {
                    cursor += 1;
                }
            }
            ChaseState::Stopped => break,
        }
    }

    npc.reset_movement_state();
    npc.is_chasing.store(false, Ordering::Relaxed);

    // Evict our own registry entry so the NPC can be admitted again;
    // a newer entry under the same id is left alone
    let mut tasks = tasks.lock().await;
    if let Some(active) = tasks.get(&npc.id) {
        if Arc::ptr_eq(&active.cancel, &cancel) {
            tasks.remove(&npc.id);
        }
    }
}
