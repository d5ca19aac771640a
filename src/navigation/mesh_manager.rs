//! Lifecycle of per-zone navigable surfaces.
//!
//! One surface handle exists per (world, zone) key while the zone is in
//! use. Surfaces are loaded on demand, touched by every query, and
//! reclaimed by the periodic unload sweep once idle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::movement::MovementControllers;

use super::bridge::PathfindingBridge;
use super::engine::NavMesh;
use super::Vec3;

/// How long a surface may sit unqueried before the sweep reclaims it
pub const SURFACE_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Key identifying one zone's surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceKey {
    pub world: u32,
    pub zone: u32,
}

impl std::fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.world, self.zone)
    }
}

struct SurfaceEntry {
    bridge: Arc<PathfindingBridge>,
    last_used: Instant,
}

/// Owns every loaded surface and its idle timer
pub struct NavMeshManager {
    surfaces: Mutex<HashMap<SurfaceKey, SurfaceEntry>>,
    mesh_root: PathBuf,
    idle_timeout: Duration,
}

impl NavMeshManager {
    pub fn new<P: Into<PathBuf>>(mesh_root: P) -> Self {
        Self::with_idle_timeout(mesh_root, SURFACE_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout<P: Into<PathBuf>>(mesh_root: P, idle_timeout: Duration) -> Self {
        Self {
            surfaces: Mutex::new(HashMap::new()),
            mesh_root: mesh_root.into(),
            idle_timeout,
        }
    }

    fn lock_surfaces(&self) -> std::sync::MutexGuard<'_, HashMap<SurfaceKey, SurfaceEntry>> {
        self.surfaces.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the zone's surface unless one is already registered.
    /// A registered surface only gets its idle timer reset. A failed load
    /// leaves nothing registered; the zone stays unnavigable until a later
    /// attempt succeeds.
    pub fn load_if_needed(&self, world: u32, zone: u32) {
        let key = SurfaceKey { world, zone };
        let mut surfaces = self.lock_surfaces();

        if let Some(entry) = surfaces.get_mut(&key) {
            entry.last_used = Instant::now();
            return;
        }

        let path = self
            .mesh_root
            .join(world.to_string())
            .join(format!("{}.json", zone));

        match NavMesh::load(&path) {
            Some(mesh) => {
                info!("Surface {} loaded from {:?}", key, path);
                surfaces.insert(key, SurfaceEntry {
                    bridge: Arc::new(PathfindingBridge::new(mesh)),
                    last_used: Instant::now(),
                });
            }
            None => {
                warn!("Surface {} failed to load; zone stays unnavigable", key);
            }
        }
    }

    /// Register a surface built in code. Used where zone data ships with
    /// the server instead of a mesh resource; a surface already registered
    /// under the key is kept.
    pub fn install(&self, world: u32, zone: u32, mesh: NavMesh) {
        let key = SurfaceKey { world, zone };
        let mut surfaces = self.lock_surfaces();

        if let Some(entry) = surfaces.get_mut(&key) {
            entry.last_used = Instant::now();
            return;
        }

        surfaces.insert(key, SurfaceEntry {
            bridge: Arc::new(PathfindingBridge::new(mesh)),
            last_used: Instant::now(),
        });
        info!("Surface {} installed", key);
    }

    /// Non-blocking existence check, used as a gate before starting behaviors
    pub fn is_loaded(&self, world: u32, zone: u32) -> bool {
        self.lock_surfaces().contains_key(&SurfaceKey { world, zone })
    }

    pub fn loaded_count(&self) -> usize {
        self.lock_surfaces().len()
    }

    /// Grab the zone's bridge and refresh its idle timer.
    /// A query already holding the returned handle keeps the surface alive
    /// until the call finishes, even across an unload.
    fn bridge(&self, world: u32, zone: u32) -> Option<Arc<PathfindingBridge>> {
        let mut surfaces = self.lock_surfaces();
        let entry = surfaces.get_mut(&SurfaceKey { world, zone })?;
        entry.last_used = Instant::now();
        Some(entry.bridge.clone())
    }

    /// Waypoints from `start` to `end`; empty when the surface is missing
    /// or has no route
    pub fn find_path(&self, world: u32, zone: u32, start: Vec3, end: Vec3) -> Vec<Vec3> {
        match self.bridge(world, zone) {
            Some(bridge) => bridge.find_path(start, end),
            None => Vec::new(),
        }
    }

    /// Corner-cutting variant of [`find_path`](Self::find_path)
    pub fn find_smooth_path(&self, world: u32, zone: u32, start: Vec3, end: Vec3) -> Vec<Vec3> {
        match self.bridge(world, zone) {
            Some(bridge) => bridge.find_smooth_path(start, end),
            None => Vec::new(),
        }
    }

    /// Random reachable point near `center`; `None` when the surface is
    /// missing or sampling fails
    pub fn random_point(&self, world: u32, zone: u32, center: Vec3, radius: f32) -> Option<Vec3> {
        self.bridge(world, zone)?.random_point(center, radius)
    }

    /// Straight-line reachability; `false` when the surface is missing
    pub fn line_of_sight(&self, world: u32, zone: u32, start: Vec3, end: Vec3) -> bool {
        match self.bridge(world, zone) {
            Some(bridge) => bridge.line_of_sight(start, end),
            None => false,
        }
    }

    /// Reclaim surfaces idle past the threshold. Each zone's movement
    /// tasks are stopped before its surface is dropped. Returns the keys
    /// that were unloaded so callers can clear their activation markers.
    pub async fn monitor_and_unload(&self, controllers: &MovementControllers) -> Vec<SurfaceKey> {
        let expired: Vec<SurfaceKey> = {
            let surfaces = self.lock_surfaces();
            surfaces
                .iter()
                .filter(|(_, entry)| entry.last_used.elapsed() >= self.idle_timeout)
                .map(|(key, _)| *key)
                .collect()
        };

        for key in &expired {
            debug!("Surface {} idle; stopping its movement tasks", key);
            controllers.remove_zone(key.world, key.zone).await;

            self.lock_surfaces().remove(key);
            info!("Surface {} unloaded after idle timeout", key);
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::PatrolRouteSource;

    fn test_mesh() -> NavMesh {
        NavMesh::new(Vec3::new(-50.0, -10.0, -50.0), Vec3::new(50.0, 10.0, 50.0), vec![])
    }

    fn write_mesh_file(world: u32, zone: u32) -> PathBuf {
        let root = std::env::temp_dir().join(format!("npc-sim-meshes-{}", std::process::id()));
        let dir = root.join(world.to_string());
        std::fs::create_dir_all(&dir).expect("mesh dir");
        std::fs::write(
            dir.join(format!("{}.json", zone)),
            r#"{"min": [-50.0, -10.0, -50.0], "max": [50.0, 10.0, 50.0], "obstacles": []}"#,
        )
        .expect("mesh file");
        root
    }

    fn controllers(manager: &Arc<NavMeshManager>) -> MovementControllers {
        MovementControllers::new(manager.clone(), Arc::new(PatrolRouteSource::in_memory()))
    }

    #[test]
    fn test_install_is_idempotent() {
        let manager = NavMeshManager::new("meshes");
        manager.install(0, 1, test_mesh());
        manager.install(0, 1, test_mesh());
        assert!(manager.is_loaded(0, 1));
        assert_eq!(manager.loaded_count(), 1);
    }

    #[test]
    fn test_load_failure_leaves_nothing_registered() {
        let manager = NavMeshManager::new("/nonexistent-mesh-root");
        manager.load_if_needed(0, 7);
        assert!(!manager.is_loaded(0, 7));
        assert_eq!(manager.loaded_count(), 0);
    }

    #[test]
    fn test_concurrent_load_yields_one_surface() {
        let root = write_mesh_file(3, 12);
        let manager = Arc::new(NavMeshManager::new(root));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || manager.load_if_needed(3, 12)));
        }
        for handle in handles {
            handle.join().expect("load thread");
        }

        assert!(manager.is_loaded(3, 12));
        assert_eq!(manager.loaded_count(), 1);
    }

    #[test]
    fn test_queries_without_surface_return_empty() {
        let manager = NavMeshManager::new("meshes");
        let path = manager.find_path(9, 9, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert!(path.is_empty());
        assert!(manager.random_point(9, 9, Vec3::ZERO, 10.0).is_none());
        assert!(!manager.line_of_sight(9, 9, Vec3::ZERO, Vec3::ZERO));
    }

    #[tokio::test]
    async fn test_idle_surface_is_unloaded() {
        let manager = Arc::new(NavMeshManager::with_idle_timeout(
            "meshes",
            Duration::from_millis(200),
        ));
        let controllers = controllers(&manager);

        manager.install(0, 1, test_mesh());
        assert!(manager.is_loaded(0, 1));

        // Still fresh: the sweep leaves it alone
        let unloaded = manager.monitor_and_unload(&controllers).await;
        assert!(unloaded.is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let unloaded = manager.monitor_and_unload(&controllers).await;
        assert_eq!(unloaded, vec![SurfaceKey { world: 0, zone: 1 }]);
        assert!(!manager.is_loaded(0, 1));
    }

    #[tokio::test]
    async fn test_query_resets_idle_timer() {
        let manager = Arc::new(NavMeshManager::with_idle_timeout(
            "meshes",
            Duration::from_millis(300),
        ));
        let controllers = controllers(&manager);

        manager.install(0, 2, test_mesh());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = manager.find_path(0, 2, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        tokio::time::sleep(Duration::from_millis(150)).await;

        // 300 ms since install but only 150 ms since the query
        let unloaded = manager.monitor_and_unload(&controllers).await;
        assert!(unloaded.is_empty());
        assert!(manager.is_loaded(0, 2));
    }
}
