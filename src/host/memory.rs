//! In-memory reference host
//!
//! A multi-world simulation double implementing the full host capability
//! surface. Used by the crate's own tests and benches, and handy as a
//! reference when binding a real host.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use glam::DVec3;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::host::{Occupant, WorldHost, WorldResolver};
use crate::math::{RegionBounds, VoxelPos};
use crate::snapshot::entity::EntityRecord;
use crate::snapshot::incidental::IncidentalState;
use crate::voxel::VoxelState;

#[derive(Default)]
struct WorldData {
    voxels: HashMap<VoxelPos, VoxelState>,
    entities: Vec<(DVec3, EntityRecord)>,
    incidental: HashMap<VoxelPos, IncidentalState>,
    occupants: Vec<Occupant>,
    safe_point: DVec3,
    refreshed: Vec<VoxelPos>,
    followups: Vec<(u64, String)>,
    incapacitated: HashSet<u64>,
}

/// In-memory multi-world host
pub struct MemorySim {
    worlds: RwLock<HashMap<String, WorldData>>,
    write_count: AtomicU64,
    batch_calls: AtomicU64,
    /// When false, `set_voxels` uses the generic per-voxel path
    bulk_enabled: bool,
}

impl MemorySim {
    pub fn new() -> Self {
        Self {
            worlds: RwLock::new(HashMap::new()),
            write_count: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
            bulk_enabled: false,
        }
    }

    /// Host with the bulk-write accelerator enabled
    pub fn with_bulk_writes() -> Self {
        Self {
            bulk_enabled: true,
            ..Self::new()
        }
    }

    pub fn create_world(&self, name: &str) {
        self.worlds.write().unwrap().entry(name.to_string()).or_default();
    }

    pub fn remove_world(&self, name: &str) {
        self.worlds.write().unwrap().remove(name);
    }

    pub fn set_safe_point(&self, world: &str, point: DVec3) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(world) {
            w.safe_point = point;
        }
    }

    pub fn add_occupant(&self, world: &str, id: u64, name: &str, pos: DVec3) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(world) {
            w.occupants.push(Occupant {
                id,
                name: name.to_string(),
                world: world.to_string(),
                pos,
            });
        }
    }

    pub fn occupant_pos(&self, world: &str, id: u64) -> Option<DVec3> {
        self.worlds
            .read()
            .unwrap()
            .get(world)?
            .occupants
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.pos)
    }

    pub fn is_incapacitated(&self, world: &str, id: u64) -> bool {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .is_some_and(|w| w.incapacitated.contains(&id))
    }

    pub fn followups(&self, world: &str) -> Vec<(u64, String)> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| w.followups.clone())
            .unwrap_or_default()
    }

    pub fn spawned_entities(&self, world: &str) -> Vec<(DVec3, EntityRecord)> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| w.entities.clone())
            .unwrap_or_default()
    }

    pub fn incidental_at(&self, world: &str, pos: VoxelPos) -> Option<IncidentalState> {
        self.worlds.read().unwrap().get(world)?.incidental.get(&pos).cloned()
    }

    pub fn set_incidental(&self, world: &str, pos: VoxelPos, state: IncidentalState) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(world) {
            w.incidental.insert(pos, state);
        }
    }

    pub fn add_entity(&self, world: &str, pos: DVec3, record: EntityRecord) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(world) {
            w.entities.push((pos, record));
        }
    }

    pub fn refreshed_chunks(&self, world: &str) -> Vec<VoxelPos> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| w.refreshed.clone())
            .unwrap_or_default()
    }

    /// Total voxel writes performed since construction
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    /// Number of accelerated batch calls taken
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemorySim {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldResolver for MemorySim {
    fn world_exists(&self, world: &str) -> bool {
        self.worlds.read().unwrap().contains_key(world)
    }
}

impl WorldHost for MemorySim {
    fn voxel_at(&self, world: &str, pos: VoxelPos) -> Result<VoxelState> {
        let worlds = self.worlds.read().unwrap();
        let w = worlds
            .get(world)
            .ok_or_else(|| Error::WorldUnavailable(world.to_string()))?;
        Ok(w.voxels.get(&pos).cloned().unwrap_or_else(VoxelState::air))
    }

    fn set_voxel(&self, world: &str, pos: VoxelPos, state: &VoxelState) -> Result<()> {
        let mut worlds = self.worlds.write().unwrap();
        let w = worlds
            .get_mut(world)
            .ok_or_else(|| Error::WorldUnavailable(world.to_string()))?;
        if state.is_air() {
            w.voxels.remove(&pos);
        } else {
            w.voxels.insert(pos, state.clone());
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_voxels(&self, world: &str, batch: &[(VoxelPos, VoxelState)]) -> Result<()> {
        if !self.bulk_enabled {
            for (pos, state) in batch {
                self.set_voxel(world, *pos, state)?;
            }
            return Ok(());
        }

        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut worlds = self.worlds.write().unwrap();
        let w = worlds
            .get_mut(world)
            .ok_or_else(|| Error::WorldUnavailable(world.to_string()))?;
        for (pos, state) in batch {
            if state.is_air() {
                w.voxels.remove(pos);
            } else {
                w.voxels.insert(*pos, state.clone());
            }
            self.write_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn occupants_in(&self, world: &str, bounds: &RegionBounds) -> Vec<Occupant> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| {
                w.occupants
                    .iter()
                    .filter(|o| bounds.contains_point(o.pos.x, o.pos.y, o.pos.z))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn entities_in(&self, world: &str, bounds: &RegionBounds) -> Vec<(DVec3, EntityRecord)> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| {
                w.entities
                    .iter()
                    .filter(|(pos, _)| bounds.contains_point(pos.x, pos.y, pos.z))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn incidental_in(
        &self,
        world: &str,
        bounds: &RegionBounds,
    ) -> Vec<(VoxelPos, IncidentalState)> {
        self.worlds
            .read()
            .unwrap()
            .get(world)
            .map(|w| {
                w.incidental
                    .iter()
                    .filter(|(pos, _)| bounds.contains(**pos))
                    .map(|(pos, state)| (*pos, state.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn incapacitate(&self, occupant: &Occupant) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(&occupant.world) {
            w.incapacitated.insert(occupant.id);
        }
    }

    fn teleport_to_safe_point(&self, occupant: &Occupant) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(&occupant.world) {
            let safe = w.safe_point;
            if let Some(o) = w.occupants.iter_mut().find(|o| o.id == occupant.id) {
                o.pos = safe;
            }
        }
    }

    fn run_followup(&self, occupant: &Occupant, action: &str) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(&occupant.world) {
            w.followups.push((occupant.id, action.to_string()));
        }
    }

    fn spawn_entity(&self, world: &str, pos: DVec3, record: &EntityRecord) -> Result<()> {
        let mut worlds = self.worlds.write().unwrap();
        let w = worlds
            .get_mut(world)
            .ok_or_else(|| Error::WorldUnavailable(world.to_string()))?;
        w.entities.push((pos, record.clone()));
        Ok(())
    }

    fn apply_incidental(&self, world: &str, pos: VoxelPos, state: &IncidentalState) -> Result<()> {
        let mut worlds = self.worlds.write().unwrap();
        let w = worlds
            .get_mut(world)
            .ok_or_else(|| Error::WorldUnavailable(world.to_string()))?;
        w.incidental.insert(pos, state.clone());
        Ok(())
    }

    fn request_chunk_refresh(&self, world: &str, chunk: VoxelPos) {
        if let Some(w) = self.worlds.write().unwrap().get_mut(world) {
            if !w.refreshed.contains(&chunk) {
                w.refreshed.push(chunk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_voxel_reads_air() {
        let sim = MemorySim::new();
        sim.create_world("w");
        assert!(sim.voxel_at("w", VoxelPos::new(0, 0, 0)).unwrap().is_air());
        assert!(sim.voxel_at("missing", VoxelPos::new(0, 0, 0)).is_err());
    }

    #[test]
    fn test_set_and_count_writes() {
        let sim = MemorySim::new();
        sim.create_world("w");
        let stone = VoxelState::new("stone");
        sim.set_voxel("w", VoxelPos::new(1, 2, 3), &stone).unwrap();
        assert_eq!(sim.voxel_at("w", VoxelPos::new(1, 2, 3)).unwrap(), stone);
        assert_eq!(sim.write_count(), 1);
    }

    #[test]
    fn test_bulk_path_same_result() {
        let batch: Vec<_> = (0..4)
            .map(|i| (VoxelPos::new(i, 0, 0), VoxelState::new("stone")))
            .collect();

        let generic = MemorySim::new();
        generic.create_world("w");
        generic.set_voxels("w", &batch).unwrap();

        let bulk = MemorySim::with_bulk_writes();
        bulk.create_world("w");
        bulk.set_voxels("w", &batch).unwrap();

        for (pos, state) in &batch {
            assert_eq!(generic.voxel_at("w", *pos).unwrap(), *state);
            assert_eq!(bulk.voxel_at("w", *pos).unwrap(), *state);
        }
        assert_eq!(generic.batch_calls(), 0);
        assert_eq!(bulk.batch_calls(), 1);
        assert_eq!(generic.write_count(), bulk.write_count());
    }

    #[test]
    fn test_occupants_in_box() {
        let sim = MemorySim::new();
        sim.create_world("w");
        sim.add_occupant("w", 1, "alice", DVec3::new(2.5, 1.0, 2.5));
        sim.add_occupant("w", 2, "bob", DVec3::new(50.0, 1.0, 50.0));

        let bounds = RegionBounds::new(VoxelPos::new(0, 0, 0), VoxelPos::new(5, 5, 5));
        let inside = sim.occupants_in("w", &bounds);
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].id, 1);
    }

    #[test]
    fn test_teleport_and_incapacitate() {
        let sim = MemorySim::new();
        sim.create_world("w");
        sim.set_safe_point("w", DVec3::new(100.0, 64.0, 100.0));
        sim.add_occupant("w", 7, "carol", DVec3::new(1.0, 1.0, 1.0));

        let occupant = sim.occupants_in(
            "w",
            &RegionBounds::new(VoxelPos::new(0, 0, 0), VoxelPos::new(2, 2, 2)),
        )[0]
        .clone();
        sim.teleport_to_safe_point(&occupant);
        sim.incapacitate(&occupant);

        assert_eq!(sim.occupant_pos("w", 7).unwrap(), DVec3::new(100.0, 64.0, 100.0));
        assert!(sim.is_incapacitated("w", 7));
    }
}
