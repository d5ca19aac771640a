//! Rooted behavior: the NPC stands in place and keeps its facing locked
//! onto a target until the behavior is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::entities::Entity;

use super::{facing_between, FRAME};

struct ActiveRooted {
    npc: Arc<Entity>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    origin_facing: u8,
}

/// Registry of rooted NPCs; one aiming task per entry
pub struct RootController {
    tasks: Mutex<HashMap<u64, ActiveRooted>>,
}

impl Default for RootController {
    fn default() -> Self {
        Self::new()
    }
}

impl RootController {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Admit an NPC and keep it facing `target`. A second call while the
    /// task is live is a no-op. The zone parameters are accepted for
    /// symmetry with the moving behaviors; a rooted NPC needs no surface.
    pub async fn add_npc(&self, _world: u32, _zone: u32, npc: Arc<Entity>, target: Arc<Entity>) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&npc.id) {
            if !existing.handle.is_finished() {
                debug!("{} is already rooted", npc.name);
                return;
            }
        }

        let origin_facing = npc.facing();
        let cancel = Arc::new(AtomicBool::new(false));
        npc.is_rooted.store(true, Ordering::Relaxed);

        let handle = tokio::spawn(root_task(npc.clone(), target, cancel.clone()));
        tasks.insert(npc.id, ActiveRooted { npc, cancel, handle, origin_facing });
    }

    /// Cancel the NPC's task and restore the facing it held before
    /// rooting. The task is drained before the restore so a final aim
    /// update cannot land on top of it.
    pub async fn remove_npc(&self, npc: &Entity) {
        let active = self.tasks.lock().await.remove(&npc.id);
        if let Some(active) = active {
            active.cancel.store(true, Ordering::Relaxed);
            let _ = active.handle.await;
            npc.set_facing(active.origin_facing);
        }
        npc.is_rooted.store(false, Ordering::Relaxed);
        npc.reset_movement_state();
    }

    /// Cancel every root task for one zone
    pub async fn remove_npcs_in_zone(&self, world: u32, zone: u32) {
        let removed: Vec<ActiveRooted> = {
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
            active.npc.set_facing(active.origin_facing);
            active.npc.is_rooted.store(false, Ordering::Relaxed);
            active.npc.reset_movement_state();
        }

        if count > 0 {
            info!("Stopped {} rooted NPCs in world {} zone {}", count, world, zone);
        }
    }

    pub async fn is_active(&self, id: u64) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

async fn root_task(npc: Arc<Entity>, target: Arc<Entity>, cancel: Arc<AtomicBool>) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        tokio::time::sleep(FRAME).await;
        npc.set_facing(facing_between(npc.position(), target.position()));
    }

    npc.reset_movement_state();
    npc.is_rooted.store(false, Ordering::Relaxed);
}
