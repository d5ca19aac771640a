//! Server-side entities and the registry the movement systems query.
//!
//! Movement controllers only ever mutate an entity's transform fields
//! (position, facing, animation, velocity) and its behavior flags;
//! identity is owned by the world simulation.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::navigation::Vec3;

/// How an NPC is configured to move when its zone is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoamKind {
    /// Stands where it spawned until something else moves it
    Stationary,
    /// Wanders freely around its spawn point
    Roamer,
    /// Follows a configured waypoint route
    Patroller,
}

#[derive(Debug)]
struct Transform {
    position: Vec3,
    facing: u8,
    animation: u8,
    velocity: [i8; 3],
}

/// One simulated creature or character
#[derive(Debug)]
pub struct Entity {
    pub id: u64,
    pub name: String,
    pub world: u32,
    pub zone: u32,
    pub roam_kind: RoamKind,
    transform: Mutex<Transform>,
    pub is_roaming: AtomicBool,
    pub is_patrolling: AtomicBool,
    pub is_chasing: AtomicBool,
    pub is_rooted: AtomicBool,
}

impl Entity {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        world: u32,
        zone: u32,
        roam_kind: RoamKind,
        position: Vec3,
        facing: u8,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            world,
            zone,
            roam_kind,
            transform: Mutex::new(Transform {
                position,
                facing,
                animation: 0,
                velocity: [0; 3],
            }),
            is_roaming: AtomicBool::new(false),
            is_patrolling: AtomicBool::new(false),
            is_chasing: AtomicBool::new(false),
            is_rooted: AtomicBool::new(false),
        }
    }

    fn transform(&self) -> MutexGuard<'_, Transform> {
        self.transform.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn position(&self) -> Vec3 {
        self.transform().position
    }

    pub fn set_position(&self, position: Vec3) {
        self.transform().position = position;
    }

    pub fn facing(&self) -> u8 {
        self.transform().facing
    }

    pub fn set_facing(&self, facing: u8) {
        self.transform().facing = facing;
    }

    pub fn animation(&self) -> u8 {
        self.transform().animation
    }

    pub fn set_animation(&self, animation: u8) {
        self.transform().animation = animation;
    }

    pub fn velocity(&self) -> [i8; 3] {
        self.transform().velocity
    }

    pub fn set_velocity(&self, velocity: [i8; 3]) {
        self.transform().velocity = velocity;
    }

    /// Zero velocity and idle animation; runs whenever a behavior stops
    pub fn reset_movement_state(&self) {
        let mut transform = self.transform();
        transform.velocity = [0; 3];
        transform.animation = 0;
    }
}

/// Lookup table over every live entity
#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<u64, Arc<Entity>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, Arc<Entity>>> {
        self.entities.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, entity: Arc<Entity>) {
        self.entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity.id, entity);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Entity>> {
        self.entities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Entity>> {
        self.read().get(&id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Entity>> {
        self.read().values().find(|e| e.name == name).cloned()
    }

    pub fn in_zone(&self, world: u32, zone: u32) -> Vec<Arc<Entity>> {
        self.read()
            .values()
            .filter(|e| e.world == world && e.zone == zone)
            .cloned()
            .collect()
    }

    pub fn roamers_in_zone(&self, world: u32, zone: u32) -> Vec<Arc<Entity>> {
        self.read()
            .values()
            .filter(|e| e.world == world && e.zone == zone && e.roam_kind == RoamKind::Roamer)
            .cloned()
            .collect()
    }

    pub fn patrollers_in_zone(&self, world: u32, zone: u32) -> Vec<Arc<Entity>> {
        self.read()
            .values()
            .filter(|e| e.world == world && e.zone == zone && e.roam_kind == RoamKind::Patroller)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64, name: &str, world: u32, zone: u32, kind: RoamKind) -> Arc<Entity> {
        Arc::new(Entity::new(id, name, world, zone, kind, Vec3::ZERO, 0))
    }

    #[test]
    fn test_registry_queries_by_zone_and_kind() {
        let registry = EntityRegistry::new();
        registry.insert(entity(1, "a gnoll pup", 0, 1, RoamKind::Roamer));
        registry.insert(entity(2, "a gnoll guard", 0, 1, RoamKind::Patroller));
        registry.insert(entity(3, "a bat", 0, 2, RoamKind::Roamer));
        registry.insert(entity(4, "Innkeeper Rolfe", 0, 1, RoamKind::Stationary));

        assert_eq!(registry.in_zone(0, 1).len(), 3);
        assert_eq!(registry.roamers_in_zone(0, 1).len(), 1);
        assert_eq!(registry.patrollers_in_zone(0, 1).len(), 1);
        assert_eq!(registry.roamers_in_zone(0, 2).len(), 1);
        assert!(registry.roamers_in_zone(1, 1).is_empty());
    }

    #[test]
    fn test_registry_name_lookup() {
        let registry = EntityRegistry::new();
        registry.insert(entity(7, "Guard Hyle", 0, 1, RoamKind::Patroller));

        assert!(registry.get_by_name("Guard Hyle").is_some());
        assert!(registry.get_by_name("Guard Mylo").is_none());
    }

    #[test]
    fn test_reset_movement_state() {
        let npc = entity(1, "a wolf", 0, 1, RoamKind::Roamer);
        npc.set_animation(1);
        npc.set_velocity([40, 0, -12]);

        npc.reset_movement_state();

        assert_eq!(npc.animation(), 0);
        assert_eq!(npc.velocity(), [0; 3]);
    }
}
