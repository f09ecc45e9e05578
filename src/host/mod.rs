//! Host world capabilities
//!
//! The engine never talks to a live simulation directly; it consumes the
//! narrow capability surface defined here. A real game-server binding
//! implements these traits, [`MemorySim`](memory::MemorySim) is the
//! in-process reference host used by tests and benches.

pub mod memory;
pub mod scheduler;

pub use memory::MemorySim;
pub use scheduler::{TaskControl, TickScheduler};

use glam::DVec3;

use crate::core::types::Result;
use crate::math::{RegionBounds, VoxelPos};
use crate::snapshot::entity::EntityRecord;
use crate::snapshot::incidental::IncidentalState;
use crate::voxel::VoxelState;

/// A sentient/player-controlled actor present in a world
#[derive(Debug, Clone, PartialEq)]
pub struct Occupant {
    /// Host-assigned stable id
    pub id: u64,
    /// Display name, for log messages
    pub name: String,
    /// World the occupant is in
    pub world: String,
    /// Current position
    pub pos: DVec3,
}

/// World-name resolution, callable off the host step
pub trait WorldResolver: Send + Sync {
    /// Whether the named world is currently available
    fn world_exists(&self, world: &str) -> bool;
}

/// Full capability surface consumed from the host simulation
///
/// Methods take `&self`; implementations use interior mutability. Anything
/// that mutates live world state must only be called from a
/// [`TickScheduler`] task, i.e. on the host simulation step.
pub trait WorldHost: WorldResolver {
    /// Read the voxel at a coordinate; unset positions read as air
    fn voxel_at(&self, world: &str, pos: VoxelPos) -> Result<VoxelState>;

    /// Write one voxel
    fn set_voxel(&self, world: &str, pos: VoxelPos, state: &VoxelState) -> Result<()>;

    /// Write a batch of voxels
    ///
    /// The provided implementation loops over [`set_voxel`]; hosts with a
    /// bulk write accelerator may override it, with identical observable
    /// results.
    ///
    /// [`set_voxel`]: WorldHost::set_voxel
    fn set_voxels(&self, world: &str, batch: &[(VoxelPos, VoxelState)]) -> Result<()> {
        for (pos, state) in batch {
            self.set_voxel(world, *pos, state)?;
        }
        Ok(())
    }

    /// Enumerate occupants whose position falls inside the box
    fn occupants_in(&self, world: &str, bounds: &RegionBounds) -> Vec<Occupant>;

    /// Enumerate serializable, non-player entities inside the box
    fn entities_in(&self, world: &str, bounds: &RegionBounds) -> Vec<(DVec3, EntityRecord)>;

    /// Enumerate incidental overlays attached to voxels inside the box
    fn incidental_in(&self, world: &str, bounds: &RegionBounds)
        -> Vec<(VoxelPos, IncidentalState)>;

    /// Force-incapacitate an occupant
    fn incapacitate(&self, occupant: &Occupant);

    /// Teleport an occupant to the world's designated safe point
    fn teleport_to_safe_point(&self, occupant: &Occupant);

    /// Execute an operator-configured follow-up action for an occupant
    fn run_followup(&self, occupant: &Occupant, action: &str);

    /// Re-spawn a captured entity at a position
    fn spawn_entity(&self, world: &str, pos: DVec3, record: &EntityRecord) -> Result<()>;

    /// Restore a container-like voxel's incidental state
    fn apply_incidental(&self, world: &str, pos: VoxelPos, state: &IncidentalState) -> Result<()>;

    /// Request a client-visible refresh of one chunk
    fn request_chunk_refresh(&self, world: &str, chunk: VoxelPos);
}
