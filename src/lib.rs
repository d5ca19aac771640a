//! NPC movement simulation for a persistent-world game server.
//!
//! NPCs roam, patrol fixed routes, chase targets, or stand rooted facing
//! a target, with movement constrained to per-zone navigable surfaces.
//! The surrounding world-tick driver owns networking and persistence;
//! this crate owns the movement state machines, the surface lifecycle,
//! and the zone-activity monitor that ties them together.

pub mod entities;
pub mod movement;
pub mod navigation;
pub mod world;

pub use entities::{Entity, EntityRegistry, RoamKind};
pub use movement::{
    ChaseController, MovementControllers, PatrolController, RoamController, RootController,
};
pub use navigation::{NavMesh, NavMeshManager, PathfindingBridge, SurfaceKey, Vec3};
pub use world::{
    PatrolRoute, PatrolRouteSource, PlayerPositions, PlayerSnapshot, Zone, ZoneDirectory,
    ZoneMonitor,
};
