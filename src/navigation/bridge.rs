//! Safe query boundary around one loaded navigable surface.
//!
//! The underlying engine must never service two calls against the same
//! surface concurrently, so every query goes through the surface lock.
//! Failures come back as empty/zero results, never as errors: "no path"
//! and "surface not ready" are ordinary outcomes for the callers.

use std::sync::Mutex;

use super::engine::NavMesh;
use super::Vec3;

pub struct PathfindingBridge {
    mesh: Mutex<NavMesh>,
}

impl PathfindingBridge {
    pub fn new(mesh: NavMesh) -> Self {
        Self { mesh: Mutex::new(mesh) }
    }

    fn mesh(&self) -> std::sync::MutexGuard<'_, NavMesh> {
        self.mesh.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Waypoints from `start` to `end`; empty when no route exists
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Vec<Vec3> {
        self.mesh().find_path(start, end).unwrap_or_default()
    }

    /// Corner-cutting variant of [`find_path`](Self::find_path)
    pub fn find_smooth_path(&self, start: Vec3, end: Vec3) -> Vec<Vec3> {
        self.mesh().find_smooth_path(start, end).unwrap_or_default()
    }

    /// Random reachable point within `radius` of `center`
    pub fn random_point(&self, center: Vec3, radius: f32) -> Option<Vec3> {
        self.mesh().random_point(center, radius)
    }

    /// Straight-line reachability between two points
    pub fn line_of_sight(&self, start: Vec3, end: Vec3) -> bool {
        self.mesh().line_of_sight(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> PathfindingBridge {
        PathfindingBridge::new(NavMesh::new(
            Vec3::new(-50.0, -10.0, -50.0),
            Vec3::new(50.0, 10.0, 50.0),
            vec![],
        ))
    }

    #[test]
    fn test_no_route_is_an_empty_path() {
        let bridge = bridge();
        // Goal outside the surface bounds
        let path = bridge.find_path(Vec3::ZERO, Vec3::new(500.0, 0.0, 0.0));
        assert!(path.is_empty());
    }

    #[test]
    fn test_queries_share_one_surface() {
        let bridge = std::sync::Arc::new(bridge());
        let mut handles = Vec::new();

        for i in 0..8 {
            let bridge = bridge.clone();
            handles.push(std::thread::spawn(move || {
                let end = Vec3::new(10.0 + i as f32, 0.0, 5.0);
                bridge.find_path(Vec3::ZERO, end)
            }));
        }

        for handle in handles {
            let path = handle.join().expect("query thread");
            assert_eq!(path.len(), 2);
        }
    }
}
