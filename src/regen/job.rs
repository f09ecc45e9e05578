//! Resumable budgeted voxel restore
//!
//! A [`RegenJob`] walks the snapshot's sections in stable order, carrying a
//! cursor (section index + in-section offset) between host steps so each
//! step does a bounded amount of work. Writes go through the host's batch
//! path so accelerated hosts take one call per sub-batch rather than one per
//! voxel.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::Result;
use crate::host::WorldHost;
use crate::math::VoxelPos;
use crate::regen::options::RegenOptions;
use crate::snapshot::region::RegionSnapshot;
use crate::voxel::codec::decode_token_or_air;
use crate::voxel::VoxelState;

/// Sub-batch size handed to the host's bulk write path
const WRITE_BATCH: usize = 4_096;

/// Progress of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More sections remain; `processed` voxels were examined this step
    InProgress { processed: u32 },
    /// All sections applied; the job is ready for completion
    Finished,
}

/// Final accounting for a finished job
#[derive(Debug, Clone, PartialEq)]
pub struct RegenReport {
    pub region: String,
    pub elapsed: Duration,
    /// Voxels actually written back to the world
    pub voxels_reset: u64,
    pub entities_respawned: usize,
    pub incidental_restored: usize,
}

/// One in-flight regeneration's voxel state machine
pub struct RegenJob {
    region: String,
    world: String,
    snapshot: Arc<RegionSnapshot>,
    only_modified: bool,
    budget: u32,
    sections: Vec<String>,
    section_idx: usize,
    current: Vec<(VoxelPos, String)>,
    offset: usize,
    refresh: BTreeSet<VoxelPos>,
    voxels_reset: u64,
    started: Instant,
}

impl RegenJob {
    pub fn new(snapshot: Arc<RegionSnapshot>, options: &RegenOptions) -> Self {
        let sections = snapshot.section_names();
        Self {
            region: snapshot.name().to_string(),
            world: snapshot.world(),
            snapshot,
            only_modified: options.only_modified,
            budget: options.budget.writes_per_step(),
            sections,
            section_idx: 0,
            current: Vec::new(),
            offset: 0,
            refresh: BTreeSet::new(),
            voxels_reset: 0,
            started: Instant::now(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Voxels written so far
    pub fn voxels_reset(&self) -> u64 {
        self.voxels_reset
    }

    /// Load the next section's voxels into the cursor; false when exhausted
    fn advance_section(&mut self) -> bool {
        while self.section_idx < self.sections.len() {
            let name = &self.sections[self.section_idx];
            self.section_idx += 1;
            if let Some(voxels) = self.snapshot.section_voxels(name) {
                if !voxels.is_empty() {
                    self.current = voxels;
                    self.offset = 0;
                    return true;
                }
            }
        }
        false
    }

    /// Apply up to the budget's worth of voxels
    ///
    /// Every examined voxel counts toward the budget, so a step is bounded
    /// even in only-modified mode when nothing differs. Only voxels actually
    /// written count toward the reset tally.
    pub fn step(&mut self, host: &dyn WorldHost) -> Result<StepOutcome> {
        let mut processed = 0u32;
        let mut batch: Vec<(VoxelPos, VoxelState)> = Vec::new();

        while processed < self.budget {
            if self.offset >= self.current.len() {
                if !self.advance_section() {
                    self.flush(host, &mut batch)?;
                    return Ok(StepOutcome::Finished);
                }
                continue;
            }

            let (pos, token) = &self.current[self.offset];
            let pos = *pos;
            self.offset += 1;
            processed += 1;

            let target = decode_token_or_air(token);
            if self.only_modified {
                let live = host.voxel_at(&self.world, pos)?;
                if live == target {
                    continue;
                }
                self.snapshot.record_modified(pos, token.clone());
            }

            self.refresh.insert(pos.chunk());
            self.voxels_reset += 1;
            batch.push((pos, target));
            if batch.len() >= WRITE_BATCH {
                self.flush(host, &mut batch)?;
            }
        }

        self.flush(host, &mut batch)?;
        Ok(StepOutcome::InProgress { processed })
    }

    fn flush(&self, host: &dyn WorldHost, batch: &mut Vec<(VoxelPos, VoxelState)>) -> Result<()> {
        if !batch.is_empty() {
            host.set_voxels(&self.world, batch)?;
            batch.clear();
        }
        Ok(())
    }

    /// Run completion actions after the last [`step`](Self::step)
    ///
    /// Entity respawn and incidental restore are best-effort: a failing
    /// record is logged and skipped rather than failing the job. Touched
    /// chunks get a client refresh, and the diff is dropped since everything
    /// it tracked has been restored.
    pub fn complete(self, host: &dyn WorldHost) -> RegenReport {
        let mut entities_respawned = 0;
        for spawn in self.snapshot.entities() {
            match host.spawn_entity(&self.world, spawn.pos, &spawn.record) {
                Ok(()) => entities_respawned += 1,
                Err(e) => log::warn!(
                    "region '{}': could not respawn {} entity at {}: {}",
                    self.region,
                    spawn.record.kind,
                    spawn.pos,
                    e
                ),
            }
        }

        let mut incidental_restored = 0;
        for (pos, state) in self.snapshot.incidental() {
            match host.apply_incidental(&self.world, pos, &state) {
                Ok(()) => incidental_restored += 1,
                Err(e) => log::warn!(
                    "region '{}': could not restore {} state at {}: {}",
                    self.region,
                    state.kind(),
                    pos,
                    e
                ),
            }
        }

        for chunk in &self.refresh {
            host.request_chunk_refresh(&self.world, *chunk);
        }
        self.snapshot.clear_modified();

        RegenReport {
            region: self.region,
            elapsed: self.started.elapsed(),
            voxels_reset: self.voxels_reset,
            entities_respawned,
            incidental_restored,
        }
    }
}
