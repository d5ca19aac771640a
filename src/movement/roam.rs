//! Free-wander behavior: each roamer walks back and forth between its
//! start and a random reachable point sampled near it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::entities::Entity;
use crate::navigation::{NavMeshManager, Vec3};

use super::{advance_cursor, facing_between, ANIM_WALK, FRAME};

const ROAM_SPEED: f32 = 3.0;

/// How far from the NPC's position the roam point may land
const ROAM_RADIUS: f32 = 60.0;

const ARRIVAL_THRESHOLD: f32 = 0.1;

struct ActiveRoamer {
    npc: Arc<Entity>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Registry of roaming NPCs; one state-machine task per entry
pub struct RoamController {
    surfaces: Arc<NavMeshManager>,
    tasks: Mutex<HashMap<u64, ActiveRoamer>>,
}

impl RoamController {
    pub fn new(surfaces: Arc<NavMeshManager>) -> Self {
        Self {
            surfaces,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Admit an NPC and start its roam task. A second call while the task
    /// is live is a no-op. Admission fails quietly when no roam point can
    /// be sampled (surface missing or NPC off the mesh).
    pub async fn add_npc(&self, world: u32, zone: u32, npc: Arc<Entity>) {
        let Some(roam_point) = self
            .surfaces
            .random_point(world, zone, npc.position(), ROAM_RADIUS)
        else {
            warn!("No reachable roam point for {}; roam not started", npc.name);
            return;
        };

        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&npc.id) {
            if !existing.handle.is_finished() {
                debug!("{} is already roaming", npc.name);
                return;
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        npc.is_roaming.store(true, Ordering::Relaxed);

        let handle = tokio::spawn(roam_task(
            world,
            zone,
            npc.clone(),
            roam_point,
            self.surfaces.clone(),
            cancel.clone(),
        ));
        tasks.insert(npc.id, ActiveRoamer { npc, cancel, handle });
    }

    /// Cancel the NPC's task and reset its visible movement state. Safe to
    /// call while the task is mid-frame: the task is cancelled, drained,
    /// and only then is the final state written.
    pub async fn remove_npc(&self, npc: &Entity) {
        let active = self.tasks.lock().await.remove(&npc.id);
        if let Some(active) = active {
            active.cancel.store(true, Ordering::Relaxed);
            let _ = active.handle.await;
        }
        npc.is_roaming.store(false, Ordering::Relaxed);
        npc.reset_movement_state();
    }

    /// Cancel every roam task for one zone
    pub async fn remove_npcs_in_zone(&self, world: u32, zone: u32) {
        let removed: Vec<ActiveRoamer> = {
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
            active.npc.is_roaming.store(false, Ordering::Relaxed);
            active.npc.reset_movement_state();
        }

        if count > 0 {
            info!("Stopped {} roamers in world {} zone {}", count, world, zone);
        }
    }

    pub async fn is_active(&self, id: u64) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

enum RoamState {
    PlanPath,
    Travel,
    Stopped,
}

async fn roam_task(
    world: u32,
    zone: u32,
    npc: Arc<Entity>,
    roam_point: Vec3,
    surfaces: Arc<NavMeshManager>,
    cancel: Arc<AtomicBool>,
) {
    let mut path: Vec<Vec3> = Vec::new();
    let mut cursor = 0usize;
    let mut sign = 1i32;
    let mut state = RoamState::PlanPath;
    let mut last_update = Instant::now();

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        match state {
            RoamState::PlanPath => {
                path = surfaces.find_smooth_path(world, zone, npc.position(), roam_point);
                if path.len() < 2 {
                    debug!("No roam path for {}; stopping", npc.name);
                    state = RoamState::Stopped;
                    continue;
                }
                cursor = 0;
                sign = 1;
                npc.set_animation(ANIM_WALK);
                last_update = Instant::now();
                state = RoamState::Travel;
            }
            RoamState::Travel => {
                tokio::time::sleep(FRAME).await;
                let elapsed = last_update.elapsed().as_secs_f32();
                last_update = Instant::now();

                let target = path[cursor];
                let position = npc.position();
                let to_target = target - position;

                if let Some(direction) = to_target.normalized() {
                    npc.set_facing(facing_between(position, target));
                    let step = (ROAM_SPEED * elapsed).min(to_target.length());
                    let next = position + direction * step;
                    if next.is_finite() {
                        npc.set_position(next);
                    }
                }

                if npc.position().distance_to(target) < ARRIVAL_THRESHOLD {
                    let (next, next_sign) = advance_cursor(cursor, path.len(), sign);
                    cursor = next;
                    sign = next_sign;
                }
            }
            RoamState::Stopped => break,
        }
    }

    npc.reset_movement_state();
    npc.is_roaming.store(false, Ordering::Relaxed);
}
