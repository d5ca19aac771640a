//! World zones and zone-activity monitoring.

mod monitor;
mod routes;

pub use monitor::{PlayerPositions, PlayerSnapshot, ZoneMonitor, ZONE_POLL_INTERVAL};
pub use routes::{PatrolRoute, PatrolRouteSource};

use std::collections::HashMap;
use std::path::Path;

use log::{error, info, warn};

use crate::navigation::Vec3;

/// One rectangular sub-region of a world; the unit of surface load/unload
/// and NPC activation
#[derive(Debug, Clone)]
pub struct Zone {
    pub world: u32,
    pub zone_id: u32,
    pub name: String,
    pub min: Vec3,
    pub max: Vec3,
}

impl Zone {
    pub fn new(world: u32, zone_id: u32, name: impl Into<String>, min: Vec3, max: Vec3) -> Self {
        Self {
            world,
            zone_id,
            name: name.into(),
            min,
            max,
        }
    }

    /// Whether a position in `world` falls inside this zone's rectangle.
    /// Height is ignored; zones span the full vertical range.
    pub fn contains(&self, world: u32, position: Vec3) -> bool {
        world == self.world
            && position.x >= self.min.x
            && position.x <= self.max.x
            && position.z >= self.min.z
            && position.z <= self.max.z
    }
}

/// All defined zones, grouped per world
#[derive(Debug, Default)]
pub struct ZoneDirectory {
    zones_by_world: HashMap<u32, Vec<Zone>>,
}

impl ZoneDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a zones.json file, falling back to the
    /// built-in defaults when the file is missing or unreadable.
    pub fn load_or_defaults<P: AsRef<Path>>(path: P) -> Self {
        let mut directory = Self::new();
        if directory.load_from_json(&path) {
            return directory;
        }

        info!("No zone file found, using built-in default zones");
        Self::with_defaults()
    }

    /// Hardcoded zone layout used when no zones.json ships with the server
    pub fn with_defaults() -> Self {
        let mut directory = Self::new();

        directory.insert(Zone::new(
            0,
            0,
            "Western Plains",
            Vec3::new(-1000.0, -500.0, -1000.0),
            Vec3::new(0.0, 500.0, 1000.0),
        ));
        directory.insert(Zone::new(
            0,
            1,
            "Eastern Plains",
            Vec3::new(0.0, -500.0, -1000.0),
            Vec3::new(1000.0, 500.0, 1000.0),
        ));
        directory.insert(Zone::new(
            1,
            0,
            "Sunken Harbor",
            Vec3::new(-500.0, -500.0, -500.0),
            Vec3::new(500.0, 500.0, 500.0),
        ));

        info!("ZoneDirectory initialized with {} default zones", directory.zone_count());
        directory
    }

    pub fn insert(&mut self, zone: Zone) {
        self.zones_by_world.entry(zone.world).or_default().push(zone);
    }

    /// Load zone definitions from a JSON file keyed by world id.
    /// Returns true if the file was read and parsed.
    pub fn load_from_json<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read zone file {:?}: {}", path, e);
                }
                return false;
            }
        };

        let json: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to parse {:?}: {}", path, e);
                return false;
            }
        };

        let Some(obj) = json.as_object() else {
            error!("Zone file root is not an object");
            return false;
        };

        for (world_str, zones_value) in obj {
            let world: u32 = match world_str.parse() {
                Ok(w) => w,
                Err(_) => {
                    warn!("Invalid world id in zone file: {}", world_str);
                    continue;
                }
            };

            let Some(zones) = zones_value.as_array() else {
                warn!("World {} zone list is not an array", world);
                continue;
            };

            for value in zones {
                if let Some(zone) = parse_zone(world, value) {
                    self.insert(zone);
                } else {
                    warn!("Skipping malformed zone entry in world {}", world);
                }
            }
        }

        info!("Loaded {} zones from {:?}", self.zone_count(), path);
        true
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones_by_world.values().flatten()
    }

    pub fn zone_count(&self) -> usize {
        self.zones_by_world.values().map(|v| v.len()).sum()
    }

    /// Find the zone containing a position, if any
    pub fn zone_at(&self, world: u32, position: Vec3) -> Option<&Zone> {
        self.zones_by_world
            .get(&world)?
            .iter()
            .find(|z| z.contains(world, position))
    }
}

/// Parse a single zone entry from the zone file
fn parse_zone(world: u32, value: &serde_json::Value) -> Option<Zone> {
    let obj = value.as_object()?;

    let zone_id = obj.get("zone_id")?.as_u64()? as u32;
    let name = obj.get("name")?.as_str()?.to_string();
    let min = parse_point(obj.get("min")?)?;
    let max = parse_point(obj.get("max")?)?;

    Some(Zone::new(world, zone_id, name, min, max))
}

fn parse_point(value: &serde_json::Value) -> Option<Vec3> {
    let arr = value.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    Some(Vec3::new(
        arr[0].as_f64()? as f32,
        arr[1].as_f64()? as f32,
        arr[2].as_f64()? as f32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::new(
            0,
            3,
            "Gnollhold",
            Vec3::new(-100.0, -50.0, -100.0),
            Vec3::new(100.0, 50.0, 100.0),
        )
    }

    #[test]
    fn test_zone_contains_checks_world_and_rectangle() {
        let zone = zone();

        assert!(zone.contains(0, Vec3::new(0.0, 0.0, 0.0)));
        assert!(zone.contains(0, Vec3::new(-100.0, 0.0, 100.0)));
        // Height never excludes a position
        assert!(zone.contains(0, Vec3::new(0.0, 4000.0, 0.0)));

        assert!(!zone.contains(1, Vec3::new(0.0, 0.0, 0.0)));
        assert!(!zone.contains(0, Vec3::new(101.0, 0.0, 0.0)));
        assert!(!zone.contains(0, Vec3::new(0.0, 0.0, -101.0)));
    }

    #[test]
    fn test_directory_zone_at() {
        let directory = ZoneDirectory::with_defaults();

        let west = directory.zone_at(0, Vec3::new(-10.0, 0.0, 0.0)).expect("west zone");
        assert_eq!(west.name, "Western Plains");

        let east = directory.zone_at(0, Vec3::new(10.0, 0.0, 0.0)).expect("east zone");
        assert_eq!(east.name, "Eastern Plains");

        assert!(directory.zone_at(5, Vec3::ZERO).is_none());
    }

    #[test]
    fn test_load_from_json() {
        let dir = std::env::temp_dir().join(format!("npc-sim-zones-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("zone dir");
        let path = dir.join("zones.json");
        std::fs::write(
            &path,
            r#"{
                "2": [
                    {"zone_id": 7, "name": "Cinder Flats", "min": [0, -10, 0], "max": [200, 10, 200]},
                    {"zone_id": "broken"}
                ]
            }"#,
        )
        .expect("zone file");

        let mut directory = ZoneDirectory::new();
        assert!(directory.load_from_json(&path));
        assert_eq!(directory.zone_count(), 1);
        assert!(directory.zone_at(2, Vec3::new(50.0, 0.0, 50.0)).is_some());
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let directory = ZoneDirectory::load_or_defaults("/nonexistent/zones.json");
        assert!(directory.zone_count() > 0);
    }
}
