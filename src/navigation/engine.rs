//! Per-zone navigable surface data and path queries.
//!
//! A `NavMesh` holds the walkable rectangle of one zone plus its obstacle
//! set, loaded from a `meshes/{world}/{zone}.json` resource. Queries are
//! purely computational; serialization of concurrent access is handled a
//! layer up by [`PathfindingBridge`](super::PathfindingBridge).

use std::path::Path;

use log::{debug, error};
use rand::Rng;
use serde::Deserialize;

use super::Vec3;

/// Radius NPCs occupy for walkability checks
const AGENT_RADIUS: f32 = 0.6;

/// Size of each grid cell used by the waypoint search
const GRID_SIZE: f32 = 1.0;

/// Step used when sampling a segment for line of sight
const LOS_STEP: f32 = 0.5;

/// Iteration cap for the waypoint search
const MAX_SEARCH_ITERATIONS: usize = 2000;

/// Attempts when sampling a random reachable point
const SAMPLE_ATTEMPTS: usize = 100;

/// A single blocked region of the surface
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Obstacle {
    /// Cylindrical blocker (pillars, trees, etc.)
    #[serde(rename = "circle")]
    Circle { center_x: f32, center_z: f32, radius: f32 },
    /// Axis-aligned box blocker (buildings, walls, etc.)
    #[serde(rename = "box")]
    Box { center_x: f32, center_z: f32, half_width: f32, half_depth: f32 },
}

impl Obstacle {
    /// Check whether a circle of `radius` at (x, z) overlaps this obstacle
    fn blocks(&self, x: f32, z: f32, radius: f32) -> bool {
        match *self {
            Obstacle::Circle { center_x, center_z, radius: r } => {
                let dx = x - center_x;
                let dz = z - center_z;
                let min_dist = radius + r;
                dx * dx + dz * dz < min_dist * min_dist
            }
            Obstacle::Box { center_x, center_z, half_width, half_depth } => {
                // Closest point on the box to the circle center
                let closest_x = x.clamp(center_x - half_width, center_x + half_width);
                let closest_z = z.clamp(center_z - half_depth, center_z + half_depth);
                let dx = x - closest_x;
                let dz = z - closest_z;
                dx * dx + dz * dz < radius * radius
            }
        }
    }
}

/// On-disk shape of a zone mesh resource
#[derive(Debug, Deserialize)]
struct MeshFile {
    min: [f32; 3],
    max: [f32; 3],
    #[serde(default)]
    obstacles: Vec<Obstacle>,
}

/// Navigable-area data for one zone
#[derive(Debug)]
pub struct NavMesh {
    min: Vec3,
    max: Vec3,
    obstacles: Vec<Obstacle>,
}

/// A node in the waypoint search grid
#[derive(Clone)]
struct PathNode {
    x: f32,
    z: f32,
    g_cost: f32,
    h_cost: f32,
    parent: Option<usize>,
}

impl PathNode {
    fn f_cost(&self) -> f32 {
        self.g_cost + self.h_cost
    }
}

impl NavMesh {
    pub fn new(min: Vec3, max: Vec3, obstacles: Vec<Obstacle>) -> Self {
        Self { min, max, obstacles }
    }

    /// Load a zone mesh resource from disk.
    /// Returns `None` if the file is missing or malformed; the zone simply
    /// stays unnavigable in that case.
    pub fn load<P: AsRef<Path>>(path: P) -> Option<NavMesh> {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Mesh resource {:?} not readable: {}", path, e);
                return None;
            }
        };

        let file: MeshFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to parse mesh resource {:?}: {}", path, e);
                return None;
            }
        };

        Some(NavMesh::new(file.min.into(), file.max.into(), file.obstacles))
    }

    /// Whether an NPC-sized circle can stand at (x, z)
    fn walkable(&self, x: f32, z: f32) -> bool {
        if x < self.min.x || x > self.max.x || z < self.min.z || z > self.max.z {
            return false;
        }
        !self.obstacles.iter().any(|o| o.blocks(x, z, AGENT_RADIUS))
    }

    /// Check straight-line reachability between two points on the surface
    pub fn line_of_sight(&self, start: Vec3, end: Vec3) -> bool {
        let dist = start.ground_distance_to(end);
        if dist < LOS_STEP {
            return self.walkable(end.x, end.z);
        }

        let steps = (dist / LOS_STEP).ceil() as usize;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let x = start.x + (end.x - start.x) * t;
            let z = start.z + (end.z - start.z) * t;
            if !self.walkable(x, z) {
                return false;
            }
        }
        true
    }

    /// Find a walkable path from `start` to `end`, including both endpoints.
    /// Returns `None` when no route exists.
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Option<Vec<Vec3>> {
        if !self.walkable(end.x, end.z) {
            return None;
        }

        // Direct route wins when nothing is in the way
        if self.line_of_sight(start, end) {
            return Some(vec![start, end]);
        }

        self.grid_search(start, end)
    }

    /// Like [`find_path`](Self::find_path), with redundant intermediate
    /// waypoints pulled out so NPCs cut corners naturally.
    pub fn find_smooth_path(&self, start: Vec3, end: Vec3) -> Option<Vec<Vec3>> {
        let path = self.find_path(start, end)?;
        if path.len() <= 2 {
            return Some(path);
        }
        Some(self.string_pull(&path))
    }

    /// Sample a random reachable point within `radius` of `center`
    pub fn random_point(&self, center: Vec3, radius: f32) -> Option<Vec3> {
        let mut rng = rand::thread_rng();

        for _ in 0..SAMPLE_ATTEMPTS {
            let angle = rng.gen_range(0.0..std::f32::consts::TAU);
            let dist = rng.gen_range(0.0..radius.max(f32::MIN_POSITIVE));
            let x = center.x + angle.cos() * dist;
            let z = center.z + angle.sin() * dist;

            if self.walkable(x, z) {
                return Some(Vec3::new(x, center.y, z));
            }
        }

        None
    }

    /// Grid-based A* search, 8-neighborhood
    fn grid_search(&self, start: Vec3, end: Vec3) -> Option<Vec<Vec3>> {
        const DIRECTIONS: [(f32, f32); 8] = [
            (1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0),
            (1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0),
        ];

        let mut open_list: Vec<PathNode> = vec![PathNode {
            x: start.x,
            z: start.z,
            g_cost: 0.0,
            h_cost: start.ground_distance_to(end),
            parent: None,
        }];
        let mut closed_list: Vec<PathNode> = Vec::new();
        let mut iterations = 0;

        while !open_list.is_empty() && iterations < MAX_SEARCH_ITERATIONS {
            iterations += 1;

            // Pop the node with the lowest f cost
            let mut best_idx = 0;
            let mut best_f = open_list[0].f_cost();
            for (i, node) in open_list.iter().enumerate().skip(1) {
                if node.f_cost() < best_f {
                    best_f = node.f_cost();
                    best_idx = i;
                }
            }

            let current = open_list.remove(best_idx);
            let current_idx = closed_list.len();

            let dist_to_goal = {
                let dx = end.x - current.x;
                let dz = end.z - current.z;
                (dx * dx + dz * dz).sqrt()
            };
            if dist_to_goal < GRID_SIZE {
                // Reconstruct waypoints from the parent chain
                let mut path = vec![end];
                let mut trace = &current;
                loop {
                    path.push(Vec3::new(trace.x, start.y, trace.z));
                    match trace.parent {
                        Some(parent_idx) => trace = &closed_list[parent_idx],
                        None => break,
                    }
                }
                path.reverse();
                return Some(path);
            }

            closed_list.push(current.clone());

            for &(dx, dz) in &DIRECTIONS {
                let nx = current.x + dx * GRID_SIZE;
                let nz = current.z + dz * GRID_SIZE;

                if !self.walkable(nx, nz) {
                    continue;
                }

                let in_closed = closed_list
                    .iter()
                    .any(|n| (n.x - nx).abs() < 0.1 && (n.z - nz).abs() < 0.1);
                if in_closed {
                    continue;
                }

                let move_cost = if dx.abs() > 0.5 && dz.abs() > 0.5 { 1.414 } else { 1.0 };
                let g_cost = current.g_cost + move_cost;
                let h_cost = {
                    let hx = end.x - nx;
                    let hz = end.z - nz;
                    (hx * hx + hz * hz).sqrt()
                };

                let existing = open_list
                    .iter_mut()
                    .find(|n| (n.x - nx).abs() < 0.1 && (n.z - nz).abs() < 0.1);

                match existing {
                    Some(node) if node.g_cost > g_cost => {
                        node.g_cost = g_cost;
                        node.parent = Some(current_idx);
                    }
                    None => {
                        open_list.push(PathNode {
                            x: nx,
                            z: nz,
                            g_cost,
                            h_cost,
                            parent: Some(current_idx),
                        });
                    }
                    _ => {}
                }
            }
        }

        None
    }

    /// Drop waypoints the previous kept point can already see
    fn string_pull(&self, path: &[Vec3]) -> Vec<Vec3> {
        let mut smoothed = vec![path[0]];
        let mut anchor = 0;

        for i in 2..path.len() {
            if !self.line_of_sight(path[anchor], path[i]) {
                smoothed.push(path[i - 1]);
                anchor = i - 1;
            }
        }

        if let Some(&last) = path.last() {
            smoothed.push(last);
        }
        smoothed
    }
}
