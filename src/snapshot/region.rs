//! In-memory region snapshot aggregate
//!
//! A [`RegionSnapshot`] holds everything captured for one named region:
//! metadata, sectioned voxel maps, entity records, incidental overlays, the
//! modified-voxel diff, spawn point and lock flag. Maps sit behind internal
//! locks because the persistence flush and a regeneration job may read them
//! while capture or resize mutates them.
//!
//! Load state is owned here too: a snapshot is either fully loaded or fully
//! deferred, with at most one disk read in flight (`ensure_loaded` is
//! single-flight; concurrent callers await the same read).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use glam::DVec3;
use tokio::sync::watch;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::host::WorldResolver;
use crate::math::{RegionBounds, VoxelPos};
use crate::snapshot::entity::EntityRecord;
use crate::snapshot::incidental::IncidentalState;
use crate::snapshot::store::SnapshotStore;

/// Section name for a chunk coordinate
pub fn section_name(chunk: VoxelPos) -> String {
    format!("c_{}_{}_{}", chunk.x, chunk.y, chunk.z)
}

/// Section map: section name -> voxel coordinate -> voxel token
pub type SectionMap = BTreeMap<String, BTreeMap<VoxelPos, String>>;

/// Optional anchor location + facing, independent of voxel data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint {
    pub pos: DVec3,
    pub yaw: f32,
    pub pitch: f32,
}

/// Snapshot metadata, mirrored in the file header
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMetadata {
    pub creator: String,
    /// Creation time, seconds since the Unix epoch
    pub created_at: u64,
    /// Source world identifier
    pub world: String,
    /// Host/source version tag at capture time
    pub source_version: String,
    /// Format version the snapshot was last written with
    pub format_version: u32,
    pub origin: VoxelPos,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

impl RegionMetadata {
    /// Bounding box defined by origin + extents
    pub fn bounds(&self) -> RegionBounds {
        RegionBounds::from_origin_extent(self.origin, self.width, self.height, self.depth)
    }
}

/// An entity record with its capture position
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpawn {
    pub pos: DVec3,
    pub record: EntityRecord,
}

/// Plain data aggregate moved between the store and a snapshot
#[derive(Debug, Clone, Default)]
pub struct SnapshotContents {
    pub sections: SectionMap,
    pub entities: Vec<EntitySpawn>,
    pub incidental: BTreeMap<VoxelPos, IncidentalState>,
    pub modified: BTreeMap<VoxelPos, String>,
}

impl SnapshotContents {
    pub fn is_empty(&self) -> bool {
        self.sections.values().all(|s| s.is_empty())
            && self.entities.is_empty()
            && self.incidental.is_empty()
            && self.modified.is_empty()
    }
}

#[derive(Clone)]
enum LoadOutcome {
    Ok,
    Failed(String),
}

enum LoadState {
    Unloaded,
    Loading {
        task: Option<tokio::task::Id>,
        rx: watch::Receiver<Option<LoadOutcome>>,
    },
    Loaded,
}

/// One named region's snapshot
pub struct RegionSnapshot {
    name: String,
    path: PathBuf,
    meta: RwLock<RegionMetadata>,
    sections: RwLock<SectionMap>,
    entities: RwLock<Vec<EntitySpawn>>,
    incidental: RwLock<BTreeMap<VoxelPos, IncidentalState>>,
    modified: RwLock<BTreeMap<VoxelPos, String>>,
    spawn: RwLock<Option<SpawnPoint>>,
    locked: AtomicBool,
    load: Mutex<LoadState>,
}

impl RegionSnapshot {
    /// Create a deferred (unloaded) snapshot holding only metadata
    pub fn deferred(name: impl Into<String>, path: PathBuf, meta: RegionMetadata) -> Self {
        Self {
            name: name.into(),
            path,
            meta: RwLock::new(meta),
            sections: RwLock::new(SectionMap::new()),
            entities: RwLock::new(Vec::new()),
            incidental: RwLock::new(BTreeMap::new()),
            modified: RwLock::new(BTreeMap::new()),
            spawn: RwLock::new(None),
            locked: AtomicBool::new(false),
            load: Mutex::new(LoadState::Unloaded),
        }
    }

    /// Create a fully-loaded snapshot from freshly captured contents
    pub fn from_capture(
        name: impl Into<String>,
        path: PathBuf,
        meta: RegionMetadata,
        contents: SnapshotContents,
    ) -> Self {
        let snapshot = Self::deferred(name, path, meta);
        snapshot.install(contents, None, false);
        snapshot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> RegionMetadata {
        self.meta.read().unwrap().clone()
    }

    pub fn bounds(&self) -> RegionBounds {
        self.meta.read().unwrap().bounds()
    }

    pub fn world(&self) -> String {
        self.meta.read().unwrap().world.clone()
    }

    pub fn locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn spawn_point(&self) -> Option<SpawnPoint> {
        *self.spawn.read().unwrap()
    }

    pub fn set_spawn_point(&self, spawn: Option<SpawnPoint>) {
        *self.spawn.write().unwrap() = spawn;
    }

    pub fn loaded(&self) -> bool {
        matches!(*self.load.lock().unwrap(), LoadState::Loaded)
    }

    /// Total captured voxel count across sections
    pub fn voxel_count(&self) -> u64 {
        self.sections.read().unwrap().values().map(|s| s.len() as u64).sum()
    }

    /// Whether the snapshot has nothing worth persisting
    pub fn is_empty(&self) -> bool {
        self.sections.read().unwrap().values().all(|s| s.is_empty())
            && self.entities.read().unwrap().is_empty()
            && self.incidental.read().unwrap().is_empty()
            && self.modified.read().unwrap().is_empty()
    }

    /// Section names in stable (sorted) order
    pub fn section_names(&self) -> Vec<String> {
        self.sections.read().unwrap().keys().cloned().collect()
    }

    /// One section's voxels in stable (coordinate) order
    pub fn section_voxels(&self, section: &str) -> Option<Vec<(VoxelPos, String)>> {
        self.sections
            .read()
            .unwrap()
            .get(section)
            .map(|s| s.iter().map(|(p, t)| (*p, t.clone())).collect())
    }

    pub fn entities(&self) -> Vec<EntitySpawn> {
        self.entities.read().unwrap().clone()
    }

    pub fn incidental(&self) -> BTreeMap<VoxelPos, IncidentalState> {
        self.incidental.read().unwrap().clone()
    }

    pub fn modified_diff(&self) -> BTreeMap<VoxelPos, String> {
        self.modified.read().unwrap().clone()
    }

    /// Record the original token for a voxel observed to differ from the
    /// snapshot. First observation wins; later writes keep the original.
    pub fn record_modified(&self, pos: VoxelPos, original_token: String) {
        self.modified.write().unwrap().entry(pos).or_insert(original_token);
    }

    /// Drop diff entries; used when a full regeneration resets everything
    pub fn clear_modified(&self) {
        self.modified.write().unwrap().clear();
    }

    /// Copy out all contents (used by the persistence flush)
    pub fn contents(&self) -> SnapshotContents {
        SnapshotContents {
            sections: self.sections.read().unwrap().clone(),
            entities: self.entities.read().unwrap().clone(),
            incidental: self.incidental.read().unwrap().clone(),
            modified: self.modified.read().unwrap().clone(),
        }
    }

    /// Install contents, replacing whatever was present
    ///
    /// Used by capture, resize-replace and disk load. Marks the snapshot
    /// loaded.
    pub fn install(&self, contents: SnapshotContents, spawn: Option<SpawnPoint>, locked: bool) {
        *self.sections.write().unwrap() = contents.sections;
        *self.entities.write().unwrap() = contents.entities;
        *self.incidental.write().unwrap() = contents.incidental;
        *self.modified.write().unwrap() = contents.modified;
        if spawn.is_some() {
            *self.spawn.write().unwrap() = spawn;
        }
        self.locked.store(locked, Ordering::SeqCst);
        *self.load.lock().unwrap() = LoadState::Loaded;
    }

    /// Replace metadata and contents on resize
    pub fn replace(&self, meta: RegionMetadata, contents: SnapshotContents) {
        *self.meta.write().unwrap() = meta;
        self.install(contents, None, self.locked());
    }

    /// Clear all fields; the region is being destroyed
    pub fn clear(&self) {
        *self.sections.write().unwrap() = SectionMap::new();
        self.entities.write().unwrap().clear();
        self.incidental.write().unwrap().clear();
        self.modified.write().unwrap().clear();
        *self.spawn.write().unwrap() = None;
        self.locked.store(false, Ordering::SeqCst);
        *self.load.lock().unwrap() = LoadState::Unloaded;
    }

    /// Ensure voxel/entity/incidental data is resident
    ///
    /// Already loaded: returns immediately. Load in flight: awaits the same
    /// read (no duplicate disk IO); re-entry from the loading task itself
    /// fails fast with [`Error::RecursiveLoad`]. Otherwise verifies the
    /// backing file and the source world before reading.
    pub async fn ensure_loaded(
        &self,
        store: &SnapshotStore,
        resolver: &dyn WorldResolver,
    ) -> Result<()> {
        enum Role {
            AlreadyLoaded,
            Waiter(watch::Receiver<Option<LoadOutcome>>),
            Loader(watch::Sender<Option<LoadOutcome>>),
        }

        let role = {
            let mut state = self.load.lock().unwrap();
            match &*state {
                LoadState::Loaded => Role::AlreadyLoaded,
                LoadState::Loading { task, rx } => {
                    let current = tokio::task::try_id();
                    if task.is_some() && *task == current {
                        return Err(Error::RecursiveLoad(self.name.clone()));
                    }
                    Role::Waiter(rx.clone())
                }
                LoadState::Unloaded => {
                    let (tx, rx) = watch::channel(None);
                    *state = LoadState::Loading {
                        task: tokio::task::try_id(),
                        rx,
                    };
                    Role::Loader(tx)
                }
            }
        };

        match role {
            Role::AlreadyLoaded => Ok(()),
            Role::Waiter(mut rx) => loop {
                {
                    let outcome = rx.borrow_and_update();
                    match &*outcome {
                        Some(LoadOutcome::Ok) => return Ok(()),
                        Some(LoadOutcome::Failed(msg)) => {
                            return Err(Error::LoadFailed(msg.clone()))
                        }
                        None => {}
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(Error::LoadFailed(format!(
                        "load of region '{}' was abandoned",
                        self.name
                    )));
                }
            },
            Role::Loader(tx) => {
                // If this future is dropped mid-load (a caller timing out,
                // for instance), the state must not stay Loading forever:
                // reset to Unloaded so the next ensure_loaded can retry.
                struct ResetOnDrop<'a> {
                    load: &'a Mutex<LoadState>,
                    armed: bool,
                }
                impl Drop for ResetOnDrop<'_> {
                    fn drop(&mut self) {
                        if self.armed {
                            *self.load.lock().unwrap() = LoadState::Unloaded;
                        }
                    }
                }
                let mut guard = ResetOnDrop {
                    load: &self.load,
                    armed: true,
                };

                let result = self.load_from_disk(store, resolver).await;
                guard.armed = false;
                let outcome = match &result {
                    Ok(()) => {
                        *self.load.lock().unwrap() = LoadState::Loaded;
                        LoadOutcome::Ok
                    }
                    Err(e) => {
                        *self.load.lock().unwrap() = LoadState::Unloaded;
                        LoadOutcome::Failed(e.to_string())
                    }
                };
                let _ = tx.send(Some(outcome));
                result
            }
        }
    }

    async fn load_from_disk(
        &self,
        store: &SnapshotStore,
        resolver: &dyn WorldResolver,
    ) -> Result<()> {
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            Error::LoadFailed(format!(
                "snapshot file {} is not readable: {}",
                self.path.display(),
                e
            ))
        })?;
        if !meta.is_file() {
            return Err(Error::LoadFailed(format!(
                "{} is not a file",
                self.path.display()
            )));
        }

        let world = self.world();
        if !resolver.world_exists(&world) {
            return Err(Error::WorldUnavailable(world));
        }

        let loaded = store.read(&self.path).await?;
        log::debug!(
            "loaded region '{}': {} sections, {} entities",
            self.name,
            loaded.contents.sections.len(),
            loaded.contents.entities.len()
        );
        *self.meta.write().unwrap() = loaded.meta;
        // install() flips the load state to Loaded; the caller resets it on
        // the error paths above.
        self.install(loaded.contents, loaded.spawn, loaded.locked);
        Ok(())
    }
}
