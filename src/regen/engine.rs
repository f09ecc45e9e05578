//! Regeneration engine and region lifecycle
//!
//! One engine instance owns admission (at most one job per region), the
//! load stage that precedes every job, and the create/resize/delete
//! lifecycle. The voxel work itself runs on the host step via a
//! [`TickScheduler`] task; the async side only loads, schedules and awaits.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::host::{TaskControl, TickScheduler, WorldHost, WorldResolver};
use crate::math::{RegionBounds, VoxelPos};
use crate::regen::job::{RegenJob, RegenReport, StepOutcome};
use crate::regen::options::RegenOptions;
use crate::snapshot::region::{
    section_name, EntitySpawn, RegionMetadata, RegionSnapshot, SectionMap, SnapshotContents,
    SpawnPoint,
};
use crate::snapshot::registry::{DirtyTracker, RegionRegistry};
use crate::snapshot::store::{SnapshotStore, StreamingWriter, FORMAT_VERSION};
use crate::voxel::codec::encode_token;

/// Upper bound on one snapshot load attempt
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Load attempts before a job gives up
const LOAD_ATTEMPTS: u32 = 3;
const LOAD_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Everything needed to capture a new region
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub name: String,
    pub world: String,
    /// Corners in any order; the captured box is inclusive of both
    pub corner_a: VoxelPos,
    pub corner_b: VoxelPos,
    pub creator: String,
    /// Host/source version tag recorded in the header
    pub source_version: String,
    /// Write the snapshot file incrementally during capture instead of
    /// leaving it to the periodic flush. Performs blocking IO; call from a
    /// worker context.
    pub stream_to_disk: bool,
}

enum Phase {
    Prepare,
    Apply { job: RegenJob, locked_here: bool },
}

/// Owner of region lifecycle and regeneration jobs
pub struct RegenerationEngine {
    registry: Arc<RegionRegistry>,
    dirty: Arc<DirtyTracker>,
    store: Arc<SnapshotStore>,
    host: Arc<dyn WorldHost>,
    ticks: Arc<TickScheduler>,
    dir: PathBuf,
    /// Region name -> cancel flag for the in-flight job
    in_flight: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl RegenerationEngine {
    pub fn new(
        registry: Arc<RegionRegistry>,
        dirty: Arc<DirtyTracker>,
        store: Arc<SnapshotStore>,
        host: Arc<dyn WorldHost>,
        ticks: Arc<TickScheduler>,
        dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dirty,
            store,
            host,
            ticks,
            dir,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    /// Whether a job is currently running for the region
    pub fn is_regenerating(&self, name: &str) -> bool {
        self.in_flight.lock().unwrap().contains_key(name)
    }

    /// Request cancellation of an in-flight job; true if one was running
    ///
    /// The job observes the flag on its next step, so cancellation is not
    /// instantaneous.
    pub fn cancel(&self, name: &str) -> bool {
        match self.in_flight.lock().unwrap().get(name) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Set or clear a region's spawn anchor
    pub fn set_spawn(&self, name: &str, spawn: Option<SpawnPoint>) -> Result<()> {
        let snapshot = self.registry.require(name)?;
        snapshot.set_spawn_point(spawn);
        self.dirty.mark(name);
        Ok(())
    }

    /// Toggle a region's lock flag outside of any job
    pub fn set_locked(&self, name: &str, locked: bool) -> Result<()> {
        let snapshot = self.registry.require(name)?;
        snapshot.set_locked(locked);
        self.dirty.mark(name);
        Ok(())
    }

    /// Names of registered regions in `world` intersecting the given box
    pub fn overlapping(
        &self,
        world: &str,
        corner_a: VoxelPos,
        corner_b: VoxelPos,
        exclude: Option<&str>,
    ) -> Vec<String> {
        let bounds = RegionBounds::new(corner_a, corner_b);
        self.registry.overlapping(world, &bounds, exclude)
    }

    /// Capture a new region and register it
    ///
    /// The whole box is captured, air included, so regeneration can clear
    /// intrusions as well as rebuild. A capture that finds nothing but air
    /// is rejected. Any failure leaves no trace: the region is registered
    /// only after every read has succeeded.
    pub fn create_region(&self, req: CaptureRequest) -> Result<Arc<RegionSnapshot>> {
        if self.registry.contains(&req.name) {
            return Err(Error::RegionExists(req.name));
        }
        if !self.host.world_exists(&req.world) {
            return Err(Error::WorldUnavailable(req.world));
        }

        let bounds = RegionBounds::new(req.corner_a, req.corner_b);
        let path = SnapshotStore::snapshot_path(&self.dir, &req.name);
        let meta = RegionMetadata {
            creator: req.creator.clone(),
            created_at: unix_now(),
            world: req.world.clone(),
            source_version: req.source_version.clone(),
            format_version: FORMAT_VERSION,
            origin: bounds.min,
            width: bounds.width(),
            height: bounds.height(),
            depth: bounds.depth(),
        };

        let contents = if req.stream_to_disk {
            let mut writer = self.store.start_streaming_write(
                &path,
                &meta,
                None,
                false,
                bounds.chunk_count() as u32,
            )?;
            let contents = match self.capture_streamed(&mut writer, &req, &bounds) {
                Ok(contents) => contents,
                Err(e) => {
                    writer.abort();
                    return Err(e);
                }
            };
            writer.finalize(&contents.entities, &contents.incidental, &contents.modified)?;
            contents
        } else {
            let (sections, any_non_air) = self.capture_sections(&req.world, &bounds)?;
            if !any_non_air {
                return Err(Error::NoVoxelsCaptured(req.name));
            }
            SnapshotContents {
                sections,
                entities: self.capture_entities(&req.world, &bounds),
                incidental: self.capture_incidental(&req.world, &bounds),
                modified: BTreeMap::new(),
            }
        };

        let snapshot = Arc::new(RegionSnapshot::from_capture(
            req.name.clone(),
            path,
            meta,
            contents,
        ));
        self.registry.insert(snapshot.clone());
        if !req.stream_to_disk {
            self.dirty.mark(&req.name);
        }
        log::info!(
            "captured region '{}' in '{}': {} voxels, {} entities",
            req.name,
            req.world,
            snapshot.voxel_count(),
            snapshot.entities().len()
        );
        Ok(snapshot)
    }

    /// Re-capture a region over new bounds, replacing its contents
    pub fn resize_region(&self, name: &str, corner_a: VoxelPos, corner_b: VoxelPos) -> Result<()> {
        if self.is_regenerating(name) {
            return Err(Error::RegenerationInProgress(name.to_string()));
        }
        let snapshot = self.registry.require(name)?;
        let world = snapshot.world();
        if !self.host.world_exists(&world) {
            return Err(Error::WorldUnavailable(world));
        }

        let bounds = RegionBounds::new(corner_a, corner_b);
        let (sections, any_non_air) = self.capture_sections(&world, &bounds)?;
        if !any_non_air {
            return Err(Error::NoVoxelsCaptured(name.to_string()));
        }
        let contents = SnapshotContents {
            sections,
            entities: self.capture_entities(&world, &bounds),
            incidental: self.capture_incidental(&world, &bounds),
            modified: BTreeMap::new(),
        };

        let mut meta = snapshot.metadata();
        meta.origin = bounds.min;
        meta.width = bounds.width();
        meta.height = bounds.height();
        meta.depth = bounds.depth();
        snapshot.replace(meta, contents);
        self.dirty.mark(name);
        Ok(())
    }

    /// Remove a region, its snapshot file and its backup
    ///
    /// An in-flight job is cancelled; it exits on its next step.
    pub async fn delete_region(&self, name: &str) -> Result<()> {
        let snapshot = self.registry.require(name)?;
        self.cancel(name);
        self.registry.remove(name);
        self.dirty.forget(name);
        snapshot.clear();

        let path = snapshot.path().to_path_buf();
        let backup = {
            let mut os = path.as_os_str().to_os_string();
            os.push(".bak");
            PathBuf::from(os)
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove snapshot file {}: {}", path.display(), e);
            }
        }
        let _ = tokio::fs::remove_file(&backup).await;
        log::info!("deleted region '{}'", name);
        Ok(())
    }

    /// Start a regeneration job for a region
    ///
    /// Returns immediately with a receiver for the final report; the work
    /// itself runs across subsequent host steps. At most one job per region:
    /// a second request while one is running is rejected.
    pub fn regenerate(
        self: &Arc<Self>,
        name: &str,
        options: RegenOptions,
    ) -> Result<oneshot::Receiver<Result<RegenReport>>> {
        let snapshot = self.registry.require(name)?;
        let world = snapshot.world();
        if !self.host.world_exists(&world) {
            return Err(Error::WorldUnavailable(world));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.contains_key(name) {
                return Err(Error::RegenerationInProgress(name.to_string()));
            }
            in_flight.insert(name.to_string(), cancel.clone());
        }

        let (tx, rx) = oneshot::channel();
        let engine = self.clone();
        tokio::spawn(async move {
            let name = snapshot.name().to_string();
            let result = engine.run_job(&snapshot, options, &cancel).await;
            engine.in_flight.lock().unwrap().remove(&name);
            match &result {
                Ok(report) => log::info!(
                    "regenerated '{}': {} voxels reset in {:?}",
                    name,
                    report.voxels_reset,
                    report.elapsed
                ),
                Err(e) => log::warn!("regeneration of '{}' ended: {}", name, e),
            }
            let _ = tx.send(result);
        });
        Ok(rx)
    }

    async fn run_job(
        &self,
        snapshot: &Arc<RegionSnapshot>,
        options: RegenOptions,
        cancel: &Arc<AtomicBool>,
    ) -> Result<RegenReport> {
        let name = snapshot.name().to_string();

        let mut attempt = 0;
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Cancelled(name));
            }
            let load = snapshot.ensure_loaded(&self.store, self.host.as_ref() as &dyn WorldResolver);
            match tokio::time::timeout(LOAD_TIMEOUT, load).await {
                Err(_) => return Err(Error::LoadTimeout(name)),
                Ok(Ok(())) => break,
                Ok(Err(e)) => {
                    attempt += 1;
                    if attempt >= LOAD_ATTEMPTS {
                        return Err(e);
                    }
                    log::warn!(
                        "load attempt {} for region '{}' failed: {}; retrying",
                        attempt,
                        name,
                        e
                    );
                    tokio::time::sleep(LOAD_RETRY_BACKOFF).await;
                }
            }
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.schedule_job(snapshot.clone(), options, cancel.clone(), done_tx);
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled(name)),
        }
    }

    /// Install the per-step state machine on the host scheduler
    fn schedule_job(
        &self,
        snapshot: Arc<RegionSnapshot>,
        options: RegenOptions,
        cancel: Arc<AtomicBool>,
        done_tx: oneshot::Sender<Result<RegenReport>>,
    ) {
        let host = self.host.clone();
        let dirty = self.dirty.clone();
        let mut done_tx = Some(done_tx);
        let mut phase = Some(Phase::Prepare);

        self.ticks.schedule_repeating(move |_| {
            let mut finish = |result: Result<RegenReport>| {
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(result);
                }
            };

            if cancel.load(Ordering::SeqCst) {
                if let Some(Phase::Apply { locked_here: true, .. }) = &phase {
                    snapshot.set_locked(false);
                    // The lock flag was flushed dirty when set; the unlock
                    // must reach disk too or a restart resurrects it.
                    dirty.mark(snapshot.name());
                }
                finish(Err(Error::Cancelled(snapshot.name().to_string())));
                return TaskControl::Done;
            }

            match phase.take() {
                None => TaskControl::Done,
                Some(Phase::Prepare) => {
                    let world = snapshot.world();
                    let occupants = host.occupants_in(&world, &snapshot.bounds());
                    if !occupants.is_empty() {
                        if options.occupants.cancel_on_occupant {
                            log::info!(
                                "regeneration of '{}' aborted: {} occupant(s) inside",
                                snapshot.name(),
                                occupants.len()
                            );
                            finish(Err(Error::Cancelled(snapshot.name().to_string())));
                            return TaskControl::Done;
                        }
                        for occupant in &occupants {
                            if options.occupants.incapacitate {
                                host.incapacitate(occupant);
                            }
                            if options.occupants.teleport_to_safe_point {
                                host.teleport_to_safe_point(occupant);
                            }
                            for action in &options.occupants.followup_actions {
                                host.run_followup(occupant, action);
                            }
                        }
                    }

                    let locked_here = options.lock_during_regen && !snapshot.locked();
                    if locked_here {
                        snapshot.set_locked(true);
                        dirty.mark(snapshot.name());
                    }
                    phase = Some(Phase::Apply {
                        job: RegenJob::new(snapshot.clone(), &options),
                        locked_here,
                    });
                    TaskControl::Continue
                }
                Some(Phase::Apply { mut job, locked_here }) => match job.step(host.as_ref()) {
                    Ok(StepOutcome::InProgress { .. }) => {
                        phase = Some(Phase::Apply { job, locked_here });
                        TaskControl::Continue
                    }
                    Ok(StepOutcome::Finished) => {
                        let report = job.complete(host.as_ref());
                        if locked_here {
                            snapshot.set_locked(false);
                        }
                        dirty.mark(snapshot.name());
                        finish(Ok(report));
                        TaskControl::Done
                    }
                    Err(e) => {
                        if locked_here {
                            snapshot.set_locked(false);
                            dirty.mark(snapshot.name());
                        }
                        finish(Err(e));
                        TaskControl::Done
                    }
                },
            }
        });
    }

    // --- Capture ---

    fn capture_sections(&self, world: &str, bounds: &RegionBounds) -> Result<(SectionMap, bool)> {
        let mut sections = SectionMap::new();
        let mut any_non_air = false;
        for chunk in bounds.chunks() {
            let section = sections.entry(section_name(chunk)).or_default();
            let Some(clip) = bounds.clip_chunk(chunk) else {
                continue;
            };
            for pos in clip.iter() {
                let state = self.host.voxel_at(world, pos)?;
                if !state.is_air() {
                    any_non_air = true;
                }
                section.insert(pos, encode_token(&state));
            }
        }
        Ok((sections, any_non_air))
    }

    /// Capture per chunk, writing each section to disk as it is produced
    fn capture_streamed(
        &self,
        writer: &mut StreamingWriter,
        req: &CaptureRequest,
        bounds: &RegionBounds,
    ) -> Result<SnapshotContents> {
        let mut sections = SectionMap::new();
        let mut any_non_air = false;
        for chunk in bounds.chunks() {
            let name = section_name(chunk);
            let mut section = BTreeMap::new();
            if let Some(clip) = bounds.clip_chunk(chunk) {
                for pos in clip.iter() {
                    let state = self.host.voxel_at(&req.world, pos)?;
                    if !state.is_air() {
                        any_non_air = true;
                    }
                    section.insert(pos, encode_token(&state));
                }
            }
            writer.write_section(&name, section.iter())?;
            sections.insert(name, section);
        }
        if !any_non_air {
            return Err(Error::NoVoxelsCaptured(req.name.clone()));
        }

        Ok(SnapshotContents {
            sections,
            entities: self.capture_entities(&req.world, bounds),
            incidental: self.capture_incidental(&req.world, bounds),
            modified: BTreeMap::new(),
        })
    }

    fn capture_entities(&self, world: &str, bounds: &RegionBounds) -> Vec<EntitySpawn> {
        self.host
            .entities_in(world, bounds)
            .into_iter()
            .map(|(pos, record)| EntitySpawn { pos, record })
            .collect()
    }

    fn capture_incidental(
        &self,
        world: &str,
        bounds: &RegionBounds,
    ) -> BTreeMap<VoxelPos, crate::snapshot::incidental::IncidentalState> {
        self.host.incidental_in(world, bounds).into_iter().collect()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
