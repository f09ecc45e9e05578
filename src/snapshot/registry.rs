//! Region registry and dirty tracking
//!
//! Both are explicit owner objects rather than process-wide state: the
//! registry is created at startup, shared by handle, and torn down with its
//! owner. Access is internally synchronized.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::RegionBounds;
use crate::snapshot::region::RegionSnapshot;

/// Table of all known regions, keyed by name
pub struct RegionRegistry {
    regions: RwLock<HashMap<String, Arc<RegionSnapshot>>>,
}

impl RegionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            regions: RwLock::new(HashMap::new()),
        })
    }

    pub fn insert(&self, snapshot: Arc<RegionSnapshot>) {
        self.regions
            .write()
            .unwrap()
            .insert(snapshot.name().to_string(), snapshot);
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegionSnapshot>> {
        self.regions.read().unwrap().get(name).cloned()
    }

    /// Like [`get`](Self::get) but with the standard unknown-region error
    pub fn require(&self, name: &str) -> Result<Arc<RegionSnapshot>> {
        self.get(name).ok_or_else(|| Error::UnknownRegion(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<RegionSnapshot>> {
        self.regions.write().unwrap().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.regions.read().unwrap().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.regions.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.read().unwrap().is_empty()
    }

    /// Regions in `world` whose bounding box intersects `bounds`, excluding
    /// at most one region by name (inclusive bounds on all axes)
    pub fn overlapping(
        &self,
        world: &str,
        bounds: &RegionBounds,
        exclude: Option<&str>,
    ) -> Vec<String> {
        self.regions
            .read()
            .unwrap()
            .values()
            .filter(|snap| Some(snap.name()) != exclude)
            .filter(|snap| snap.world() == world)
            .filter(|snap| snap.bounds().intersects(bounds))
            .map(|snap| snap.name().to_string())
            .collect()
    }
}

/// Set of regions mutated since the last successful persistence flush
pub struct DirtyTracker {
    dirty: Mutex<HashSet<String>>,
}

impl DirtyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dirty: Mutex::new(HashSet::new()),
        })
    }

    /// Mark a region as needing a flush
    pub fn mark(&self, region: &str) {
        self.dirty.lock().unwrap().insert(region.to_string());
    }

    /// Forget a region entirely (it was deleted)
    pub fn forget(&self, region: &str) {
        self.dirty.lock().unwrap().remove(region);
    }

    pub fn is_dirty(&self, region: &str) -> bool {
        self.dirty.lock().unwrap().contains(region)
    }

    pub fn len(&self) -> usize {
        self.dirty.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.lock().unwrap().is_empty()
    }

    /// Take the current dirty set, leaving it empty
    ///
    /// The flush cycle re-marks any region whose write fails.
    pub fn take(&self) -> HashSet<String> {
        std::mem::take(&mut *self.dirty.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::VoxelPos;
    use crate::snapshot::region::{RegionMetadata, SnapshotContents};
    use crate::snapshot::store::FORMAT_VERSION;
    use std::path::PathBuf;

    fn snap(name: &str, world: &str, origin: VoxelPos, size: i32) -> Arc<RegionSnapshot> {
        let meta = RegionMetadata {
            creator: "op".into(),
            created_at: 0,
            world: world.into(),
            source_version: "1".into(),
            format_version: FORMAT_VERSION,
            origin,
            width: size,
            height: size,
            depth: size,
        };
        Arc::new(RegionSnapshot::from_capture(
            name,
            PathBuf::from(format!("/tmp/{}.region", name)),
            meta,
            SnapshotContents::default(),
        ))
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = RegionRegistry::new();
        registry.insert(snap("a", "w", VoxelPos::new(0, 0, 0), 4));
        assert!(registry.contains("a"));
        assert!(registry.require("a").is_ok());
        assert!(matches!(registry.require("b"), Err(Error::UnknownRegion(_))));
        registry.remove("a");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_overlapping_same_world_only() {
        let registry = RegionRegistry::new();
        // [0,0,0]-[5,5,5]
        registry.insert(snap("a", "w", VoxelPos::new(0, 0, 0), 6));
        registry.insert(snap("other_world", "w2", VoxelPos::new(0, 0, 0), 6));

        // [5,5,5]-[10,10,10] touches "a" at the shared corner
        let touching = RegionBounds::new(VoxelPos::new(5, 5, 5), VoxelPos::new(10, 10, 10));
        assert_eq!(registry.overlapping("w", &touching, None), vec!["a"]);
        assert!(registry.overlapping("w", &touching, Some("a")).is_empty());

        // [5,5,5]-[10,10,10] vs [0,0,0]-[4,4,4]: disjoint
        let registry2 = RegionRegistry::new();
        registry2.insert(snap("b", "w", VoxelPos::new(0, 0, 0), 5));
        assert!(registry2.overlapping("w", &touching, None).is_empty());
    }

    #[test]
    fn test_dirty_take_and_remark() {
        let dirty = DirtyTracker::new();
        dirty.mark("a");
        dirty.mark("b");
        dirty.mark("a");
        assert_eq!(dirty.len(), 2);

        let taken = dirty.take();
        assert_eq!(taken.len(), 2);
        assert!(dirty.is_empty());

        dirty.mark("b"); // failed flush re-marks
        assert!(dirty.is_dirty("b"));
    }
}
