//! Zone-activity polling.
//!
//! The monitor walks every defined zone against a snapshot of player
//! positions once per second. A zone with a player inside gets its
//! surface loaded and its roaming/patrolling NPCs started, exactly once
//! per active period; the idle-unload sweep runs each cycle and clears
//! the started marker for whatever it reclaims, so a zone can come back
//! to life later.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info};

use crate::entities::EntityRegistry;
use crate::movement::MovementControllers;
use crate::navigation::{NavMeshManager, SurfaceKey, Vec3};

use super::ZoneDirectory;

/// How often zones are checked for player presence
pub const ZONE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Gap between per-NPC admissions when a zone starts, so dozens of path
/// requests do not land on the engine in the same instant
const ADMISSION_STAGGER: Duration = Duration::from_millis(5);

/// One connected player's whereabouts
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub world: u32,
    pub position: Vec3,
}

/// Polled snapshot of all connected players
pub trait PlayerPositions: Send + Sync {
    fn player_positions(&self) -> Vec<PlayerSnapshot>;
}

/// Drives surface lifecycle and NPC activation from player presence
pub struct ZoneMonitor {
    zones: ZoneDirectory,
    players: Arc<dyn PlayerPositions>,
    registry: Arc<EntityRegistry>,
    surfaces: Arc<NavMeshManager>,
    controllers: Arc<MovementControllers>,
    started: Mutex<HashSet<SurfaceKey>>,
}

impl ZoneMonitor {
    pub fn new(
        zones: ZoneDirectory,
        players: Arc<dyn PlayerPositions>,
        registry: Arc<EntityRegistry>,
        surfaces: Arc<NavMeshManager>,
        controllers: Arc<MovementControllers>,
    ) -> Self {
        Self {
            zones,
            players,
            registry,
            surfaces,
            controllers,
            started: Mutex::new(HashSet::new()),
        }
    }

    /// Poll until the shutdown flag is raised
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!("Zone monitor running over {} zones", self.zones.zone_count());

        while !shutdown.load(Ordering::Relaxed) {
            self.poll_once().await;
            tokio::time::sleep(ZONE_POLL_INTERVAL).await;
        }

        info!("Zone monitor stopped");
    }

    /// One polling cycle: activate zones with players, then reclaim idle
    /// surfaces
    pub async fn poll_once(&self) {
        let players = self.players.player_positions();

        for zone in self.zones.zones() {
            let occupied = players.iter().any(|p| zone.contains(p.world, p.position));
            if occupied {
                self.surfaces.load_if_needed(zone.world, zone.zone_id);
                self.start_npcs_if_needed(zone.world, zone.zone_id).await;
            }
        }

        let unloaded = self.surfaces.monitor_and_unload(&self.controllers).await;
        if !unloaded.is_empty() {
            let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            for key in unloaded {
                started.remove(&key);
            }
        }
    }

    /// Start the zone's NPCs once per active period, gated on the surface
    /// actually being loaded
    async fn start_npcs_if_needed(&self, world: u32, zone: u32) {
        let key = SurfaceKey { world, zone };

        {
            let started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            if started.contains(&key) {
                return;
            }
        }

        if !self.surfaces.is_loaded(world, zone) {
            return;
        }

        self.start_npcs(world, zone).await;

        self.started
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
    }

    async fn start_npcs(&self, world: u32, zone: u32) {
        let roamers = self.registry.roamers_in_zone(world, zone);
        let patrollers = self.registry.patrollers_in_zone(world, zone);

        if roamers.is_empty() && patrollers.is_empty() {
            debug!("No eligible NPCs in world {} zone {}", world, zone);
            return;
        }

        info!(
            "Starting {} roamers and {} patrollers in world {} zone {}",
            roamers.len(),
            patrollers.len(),
            world,
            zone
        );

        let mut admissions = Vec::new();

        for npc in roamers {
            let controllers = self.controllers.clone();
            admissions.push(tokio::spawn(async move {
                controllers.roam.add_npc(world, zone, npc).await;
            }));
            tokio::time::sleep(ADMISSION_STAGGER).await;
        }

        for npc in patrollers {
            let controllers = self.controllers.clone();
            admissions.push(tokio::spawn(async move {
                controllers.patrol.add_npc(world, zone, npc).await;
            }));
            tokio::time::sleep(ADMISSION_STAGGER).await;
        }

        let _ = join_all(admissions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Entity, RoamKind};
    use crate::world::{PatrolRoute, PatrolRouteSource, Zone};

    struct StubPlayers {
        players: Mutex<Vec<PlayerSnapshot>>,
    }

    impl StubPlayers {
        fn new() -> Arc<Self> {
            Arc::new(Self { players: Mutex::new(Vec::new()) })
        }

        fn set(&self, players: Vec<PlayerSnapshot>) {
            *self.players.lock().unwrap() = players;
        }
    }

    impl PlayerPositions for StubPlayers {
        fn player_positions(&self) -> Vec<PlayerSnapshot> {
            self.players.lock().unwrap().clone()
        }
    }

    fn test_zones() -> ZoneDirectory {
        let mut zones = ZoneDirectory::new();
        zones.insert(Zone::new(
            0,
            1,
            "Gnollhold",
            Vec3::new(-100.0, -50.0, -100.0),
            Vec3::new(100.0, 50.0, 100.0),
        ));
        zones
    }

    fn write_mesh_root(tag: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!(
            "npc-sim-monitor-{}-{}",
            std::process::id(),
            tag
        ));
        let dir = root.join("0");
        std::fs::create_dir_all(&dir).expect("mesh dir");
        std::fs::write(
            dir.join("1.json"),
            r#"{"min": [-100.0, -50.0, -100.0], "max": [100.0, 50.0, 100.0], "obstacles": []}"#,
        )
        .expect("mesh file");
        root
    }

    fn routes() -> Arc<PatrolRouteSource> {
        let routes = PatrolRouteSource::in_memory();
        if let Some(route) = PatrolRoute::new(
            vec![Vec3::new(5.0, 0.0, 5.0), Vec3::new(15.0, 0.0, 5.0)],
            vec![0, 0],
        ) {
            routes.insert("a gnoll guard", route);
        }
        Arc::new(routes)
    }

    struct Fixture {
        players: Arc<StubPlayers>,
        controllers: Arc<MovementControllers>,
        surfaces: Arc<NavMeshManager>,
        monitor: ZoneMonitor,
        roamer: Arc<Entity>,
        patroller: Arc<Entity>,
    }

    fn fixture(tag: &str, idle_timeout: Duration) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();

        let surfaces = Arc::new(NavMeshManager::with_idle_timeout(
            write_mesh_root(tag),
            idle_timeout,
        ));
        let controllers = Arc::new(MovementControllers::new(surfaces.clone(), routes()));
        let registry = Arc::new(EntityRegistry::new());
        let players = StubPlayers::new();

        let roamer = Arc::new(Entity::new(
            1,
            "a gnoll pup",
            0,
            1,
            RoamKind::Roamer,
            Vec3::new(0.0, 0.0, 0.0),
            0,
        ));
        let patroller = Arc::new(Entity::new(
            2,
            "a gnoll guard",
            0,
            1,
            RoamKind::Patroller,
            Vec3::new(5.0, 0.0, 5.0),
            0,
        ));
        registry.insert(roamer.clone());
        registry.insert(patroller.clone());

        let monitor = ZoneMonitor::new(
            test_zones(),
            players.clone(),
            registry,
            surfaces.clone(),
            controllers.clone(),
        );

        Fixture { players, controllers, surfaces, monitor, roamer, patroller }
    }

    fn player_in_zone() -> PlayerSnapshot {
        PlayerSnapshot { world: 0, position: Vec3::new(10.0, 0.0, 10.0) }
    }

    #[tokio::test]
    async fn test_player_presence_activates_zone() {
        let fx = fixture("activate", Duration::from_secs(20));

        // Nobody around: nothing loads, nothing starts
        fx.monitor.poll_once().await;
        assert!(!fx.surfaces.is_loaded(0, 1));
        assert_eq!(fx.controllers.roam.active_count().await, 0);

        fx.players.set(vec![player_in_zone()]);
        fx.monitor.poll_once().await;

        assert!(fx.surfaces.is_loaded(0, 1));
        assert!(fx.controllers.roam.is_active(fx.roamer.id).await);
        assert!(fx.controllers.patrol.is_active(fx.patroller.id).await);
    }

    #[tokio::test]
    async fn test_repeated_polls_start_npcs_once() {
        let fx = fixture("once", Duration::from_secs(20));
        fx.players.set(vec![player_in_zone()]);

        fx.monitor.poll_once().await;
        fx.monitor.poll_once().await;
        fx.monitor.poll_once().await;

        assert_eq!(fx.controllers.roam.active_count().await, 1);
        assert_eq!(fx.controllers.patrol.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_idle_zone_unloads_and_reactivates() {
        let fx = fixture("idle", Duration::from_millis(200));

        fx.players.set(vec![player_in_zone()]);
        fx.monitor.poll_once().await;
        assert!(fx.surfaces.is_loaded(0, 1));
        assert!(fx.controllers.roam.is_active(fx.roamer.id).await);

        // Everyone logs off; idle past the threshold
        fx.players.set(vec![]);
        tokio::time::sleep(Duration::from_millis(350)).await;
        fx.monitor.poll_once().await;

        assert!(!fx.surfaces.is_loaded(0, 1));
        assert!(!fx.controllers.roam.is_active(fx.roamer.id).await);
        assert!(!fx.controllers.patrol.is_active(fx.patroller.id).await);
        assert_eq!(fx.roamer.animation(), 0);
        assert_eq!(fx.patroller.velocity(), [0; 3]);

        // A player returns: the zone comes back
        fx.players.set(vec![player_in_zone()]);
        fx.monitor.poll_once().await;

        assert!(fx.surfaces.is_loaded(0, 1));
        assert!(fx.controllers.roam.is_active(fx.roamer.id).await);
        assert!(fx.controllers.patrol.is_active(fx.patroller.id).await);
    }

    #[tokio::test]
    async fn test_player_outside_zone_does_nothing() {
        let fx = fixture("outside", Duration::from_secs(20));
        fx.players.set(vec![PlayerSnapshot {
            world: 0,
            position: Vec3::new(5000.0, 0.0, 5000.0),
        }]);

        fx.monitor.poll_once().await;

        assert!(!fx.surfaces.is_loaded(0, 1));
        assert_eq!(fx.controllers.roam.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_player_in_other_world_does_nothing() {
        let fx = fixture("other-world", Duration::from_secs(20));
        fx.players.set(vec![PlayerSnapshot {
            world: 3,
            position: Vec3::new(10.0, 0.0, 10.0),
        }]);

        fx.monitor.poll_once().await;

        assert!(!fx.surfaces.is_loaded(0, 1));
        assert_eq!(fx.controllers.roam.active_count().await, 0);
    }
}
