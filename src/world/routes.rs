//! Static patrol routes, resolved per NPC by display name.
//!
//! A route file lives at `<dir>/<Name_With_Underscores>.json` and holds an
//! ordered list of waypoint records: `[{"x": .., "y": .., "z": .., "pause": ..}, ..]`.
//! A missing or malformed file keeps that one NPC from patrolling and
//! nothing else.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use log::{error, warn};

use crate::navigation::Vec3;

/// Ordered waypoints with a pause (milliseconds) at each one
#[derive(Debug, Clone)]
pub struct PatrolRoute {
    pub waypoints: Vec<Vec3>,
    pub pauses: Vec<u64>,
}

impl PatrolRoute {
    /// Build a route. The waypoint and pause lists must match in length
    /// and describe at least two stops; anything else is a configuration
    /// error and yields `None`.
    pub fn new(waypoints: Vec<Vec3>, pauses: Vec<u64>) -> Option<Self> {
        if waypoints.len() != pauses.len() {
            error!(
                "Patrol route has {} waypoints but {} pauses",
                waypoints.len(),
                pauses.len()
            );
            return None;
        }
        if waypoints.len() < 2 {
            error!("Patrol route needs at least two waypoints, got {}", waypoints.len());
            return None;
        }
        Some(Self { waypoints, pauses })
    }
}

/// Resolves patrol routes by NPC display name, from route files or
/// programmatic registration
pub struct PatrolRouteSource {
    dir: Option<PathBuf>,
    routes: Mutex<HashMap<String, PatrolRoute>>,
}

impl PatrolRouteSource {
    /// Source backed by a directory of per-NPC route files
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: Some(dir.into()),
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Source holding only routes registered in code
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Register a route under an NPC display name
    pub fn insert(&self, name: &str, route: PatrolRoute) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), route);
    }

    /// Look up the route for an NPC. File-backed routes are loaded on
    /// first use and cached.
    pub fn route_for(&self, name: &str) -> Option<PatrolRoute> {
        {
            let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(route) = routes.get(name) {
                return Some(route.clone());
            }
        }

        let dir = self.dir.as_ref()?;
        let path = dir.join(route_file_name(name));
        let route = load_route_file(&path)?;

        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), route.clone());
        Some(route)
    }
}

/// "Guard Hyle" resolves to "Guard_Hyle.json"
fn route_file_name(name: &str) -> String {
    format!("{}.json", name.replace(' ', "_"))
}

fn load_route_file(path: &std::path::Path) -> Option<PatrolRoute> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read route file {:?}: {}", path, e);
            }
            return None;
        }
    };

    let json: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to parse route file {:?}: {}", path, e);
            return None;
        }
    };

    let Some(entries) = json.as_array() else {
        error!("Route file {:?} root is not an array", path);
        return None;
    };

    let mut waypoints = Vec::new();
    let mut pauses = Vec::new();

    for entry in entries {
        let Some(obj) = entry.as_object() else {
            error!("Route file {:?} has a non-object waypoint entry", path);
            return None;
        };

        let x = obj.get("x").and_then(|v| v.as_f64());
        let y = obj.get("y").and_then(|v| v.as_f64());
        let z = obj.get("z").and_then(|v| v.as_f64());
        let pause = obj.get("pause").and_then(|v| v.as_u64()).unwrap_or(0);

        match (x, y, z) {
            (Some(x), Some(y), Some(z)) => {
                waypoints.push(Vec3::new(x as f32, y as f32, z as f32));
                pauses.push(pause);
            }
            _ => {
                error!("Route file {:?} has a waypoint without x/y/z", path);
                return None;
            }
        }
    }

    PatrolRoute::new(waypoints, pauses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_route_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("npc-sim-routes-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("route dir");
        dir
    }

    #[test]
    fn test_route_length_mismatch_is_rejected() {
        let route = PatrolRoute::new(
            vec![Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)],
            vec![0],
        );
        assert!(route.is_none());
    }

    #[test]
    fn test_route_needs_two_waypoints() {
        assert!(PatrolRoute::new(vec![Vec3::ZERO], vec![0]).is_none());
        assert!(PatrolRoute::new(vec![], vec![]).is_none());
    }

    #[test]
    fn test_route_file_resolution_by_display_name() {
        let dir = temp_route_dir();
        std::fs::write(
            dir.join("Guard_Hyle.json"),
            r#"[
                {"x": 0.0, "y": 0.0, "z": 0.0, "pause": 2000},
                {"x": 10.0, "y": 0.0, "z": 0.0},
                {"x": 10.0, "y": 0.0, "z": 10.0, "pause": 500}
            ]"#,
        )
        .expect("route file");

        let source = PatrolRouteSource::new(&dir);
        let route = source.route_for("Guard Hyle").expect("route");

        assert_eq!(route.waypoints.len(), 3);
        assert_eq!(route.pauses, vec![2000, 0, 500]);
        assert_eq!(route.waypoints[1], Vec3::new(10.0, 0.0, 0.0));

        // Second lookup comes from the cache
        assert!(source.route_for("Guard Hyle").is_some());
    }

    #[test]
    fn test_missing_route_is_recoverable() {
        let source = PatrolRouteSource::new(temp_route_dir());
        assert!(source.route_for("Guard Nobody").is_none());
    }

    #[test]
    fn test_malformed_route_file_is_rejected() {
        let dir = temp_route_dir();
        std::fs::write(
            dir.join("Guard_Mylo.json"),
            r#"[{"x": 1.0, "z": 2.0, "pause": 100}]"#,
        )
        .expect("route file");

        let source = PatrolRouteSource::new(&dir);
        assert!(source.route_for("Guard Mylo").is_none());
    }

    #[test]
    fn test_in_memory_registration() {
        let source = PatrolRouteSource::in_memory();
        let route = PatrolRoute::new(
            vec![Vec3::ZERO, Vec3::new(5.0, 0.0, 5.0)],
            vec![0, 1000],
        )
        .expect("route");

        source.insert("a gnoll guard", route);
        assert!(source.route_for("a gnoll guard").is_some());
        assert!(source.route_for("a gnoll pup").is_none());
    }
}
